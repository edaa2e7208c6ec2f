//! Directory and PATH helpers
//!
//! Runtime state (the audit log) lives under the XDG state directory;
//! binary lookup mirrors the shell's PATH search.

use directories::ProjectDirs;
use std::path::PathBuf;

pub fn state_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "rampart", "rampart")
        .and_then(|pd| pd.state_dir().map(std::path::Path::to_path_buf))
}

pub fn ensure_state_dir() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        if let Some(dir) = state_dir() {
            let mut builder = DirBuilder::new();
            builder.mode(0o700); // User read/write/execute only
            builder.recursive(true);
            builder.create(dir)?;
        }
    }

    #[cfg(not(unix))]
    {
        if let Some(dir) = state_dir() {
            std::fs::create_dir_all(dir)?;
        }
    }

    Ok(())
}

/// True when `name` is an executable file on the current PATH.
pub fn binary_on_path(name: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(name).is_file())
}
