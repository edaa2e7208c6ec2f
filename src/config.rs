//! Engine configuration
//!
//! The engine takes an explicit [`EngineConfig`] instead of ambient path
//! globals; every collaborator that touches the filesystem gets its path
//! from here. Defaults point at the production layout under
//! `/usr/local/etc/firewall/`, and every field can be overridden from a
//! JSON config file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::error::Result;

/// Production directory holding the grant sources and generated ruleset.
pub const BASE_DIR: &str = "/usr/local/etc/firewall";

/// Restore script written on first run. Kept non-destructive on failure:
/// iptables-restore leaves the active ruleset untouched when it rejects
/// its input.
const RESTORE_SCRIPT: &str = r#"#!/bin/bash

print_datetime() {
    date +"%Y-%m-%d %H:%M:%S"
}

if ! /usr/sbin/iptables-restore < "$1"; then
    echo "$(print_datetime): error occurred while restoring iptables rules." >&2
    exit 1
else
    echo "$(print_datetime): iptables rules restored successfully."
    exit 0
fi
"#;

/// Paths the pipeline reads from and writes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Admin allowlist source: one address-or-name per line.
    #[serde(default = "default_admin_file")]
    pub admin_file: PathBuf,
    /// Entity grant source: `name:port,port` per line.
    #[serde(default = "default_entity_file")]
    pub entity_file: PathBuf,
    /// Address grant source: `address:port,port` per line.
    #[serde(default = "default_address_file")]
    pub address_file: PathBuf,
    /// Public-port source: one comma-separated list.
    #[serde(default = "default_public_ports_file")]
    pub public_ports_file: PathBuf,
    /// Where the compiled ruleset is persisted before applying.
    #[serde(default = "default_ruleset_file")]
    pub ruleset_file: PathBuf,
    /// External restore script invoked by the apply gateway.
    #[serde(default = "default_restore_script")]
    pub restore_script: PathBuf,
    /// iptables binary probed for the header banner.
    #[serde(default = "default_iptables_binary")]
    pub iptables_binary: PathBuf,
}

fn base_join(file: &str) -> PathBuf {
    Path::new(BASE_DIR).join(file)
}

fn default_admin_file() -> PathBuf {
    base_join("admin_access_domains.txt")
}

fn default_entity_file() -> PathBuf {
    base_join("entity_access_domains.txt")
}

fn default_address_file() -> PathBuf {
    base_join("authorized_access_ips.txt")
}

fn default_public_ports_file() -> PathBuf {
    base_join("public_ports.txt")
}

fn default_ruleset_file() -> PathBuf {
    base_join("compiled.rules")
}

fn default_restore_script() -> PathBuf {
    base_join("set_firewall.sh")
}

fn default_iptables_binary() -> PathBuf {
    PathBuf::from("/usr/sbin/iptables")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            admin_file: default_admin_file(),
            entity_file: default_entity_file(),
            address_file: default_address_file(),
            public_ports_file: default_public_ports_file(),
            ruleset_file: default_ruleset_file(),
            restore_script: default_restore_script(),
            iptables_binary: default_iptables_binary(),
        }
    }
}

/// Loads the config from a JSON file, or returns defaults when no path is
/// given. Unspecified fields fall back to their defaults.
///
/// # Errors
///
/// Returns `Err` when the given file cannot be read or parsed.
pub fn load(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        }
        None => Ok(EngineConfig::default()),
    }
}

/// Ensures the on-disk layout exists: parent directories, empty grant
/// sources, and the restore script.
///
/// Seeding empty sources keeps a fresh host on the safe path: an empty
/// admin source still aborts the run, while the optional sources simply
/// contribute nothing.
///
/// # Errors
///
/// Returns `Err` when a directory or file cannot be created.
pub fn ensure_layout(config: &EngineConfig) -> std::io::Result<()> {
    let files = [
        &config.admin_file,
        &config.entity_file,
        &config.address_file,
        &config.public_ports_file,
        &config.ruleset_file,
        &config.restore_script,
    ];

    for file in files {
        if let Some(dir) = file.parent() {
            std::fs::create_dir_all(dir)?;
        }
    }

    for source in [
        &config.admin_file,
        &config.entity_file,
        &config.address_file,
        &config.public_ports_file,
    ] {
        if !source.exists() {
            std::fs::File::create(source)?;
            info!(path = %source.display(), "seeded empty grant source");
        }
    }

    if !config.restore_script.exists() {
        std::fs::write(&config.restore_script, RESTORE_SCRIPT)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                &config.restore_script,
                std::fs::Permissions::from_mode(0o755),
            )?;
        }
        info!(path = %config.restore_script.display(), "wrote restore script");
    }

    Ok(())
}
