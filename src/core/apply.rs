//! Apply gateway
//!
//! Hands a fully compiled ruleset file to the external restore script and
//! reports the outcome. The gateway performs no interpretation of the
//! ruleset content and implements no rollback: the restore mechanism is
//! expected to leave the active kernel ruleset unchanged on failure.

use std::path::Path;
use std::process::Command;

use tracing::{error, info, warn};

use crate::core::error::{Error, Result};

/// Invokes the restore script on a persisted ruleset and returns its
/// captured standard output.
///
/// # Errors
///
/// Returns [`Error::Restore`] with the script's stderr and exit code when
/// the restore reports failure, or [`Error::Io`] when it cannot be spawned.
pub fn apply(script: &Path, ruleset: &Path) -> Result<String> {
    if !nix::unistd::geteuid().is_root() {
        warn!("not running as root; the restore step will likely be refused by the kernel");
    }

    info!(script = %script.display(), ruleset = %ruleset.display(), "applying ruleset");

    let output = Command::new("bash").arg(script).arg(ruleset).output()?;

    if output.status.success() {
        info!("ruleset applied");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        error!("restore failed: {}", stderr.trim());
        Err(Error::Restore {
            message: format!("restore script exited with {}", output.status),
            stderr: Some(stderr),
            exit_code: output.status.code(),
        })
    }
}

/// Captures the `iptables -V` banner for the generated-ruleset header.
/// Best-effort: probing failures just leave the header without a banner.
pub fn restore_version(iptables: &Path) -> Option<String> {
    let output = Command::new(iptables).arg("-V").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let banner = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if banner.is_empty() { None } else { Some(banner) }
}
