//! Path utilities for llamactl data directories.
//!
//! Resolution order for the data root:
//! 1. `LLAMACTL_DATA_DIR` environment variable (highest priority)
//! 2. System data directory (e.g., `~/.local/share/llamactl`)

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Environment variable overriding the data root.
pub const DATA_DIR_ENV: &str = "LLAMACTL_DATA_DIR";

/// Environment variable overriding the configuration file location.
pub const CONFIG_ENV: &str = "LLAMACTL_CONFIG";

pub const REGISTRY_FILE_NAME: &str = "registry.json";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Errors that can occur during path resolution.
#[derive(Debug, Error)]
pub enum PathError {
    /// Could not determine the system data directory.
    #[error("Cannot determine system data directory")]
    NoDataDir,

    /// Failed to create a directory.
    #[error("Failed to create directory {path}: {reason}")]
    CreateFailed { path: PathBuf, reason: String },
}

/// Get the root directory for application data (registry, default config).
pub fn data_root() -> Result<PathBuf, PathError> {
    if let Ok(path) = env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(path));
    }

    let data_dir = dirs::data_local_dir().ok_or(PathError::NoDataDir)?;
    let root = data_dir.join("llamactl");
    ensure_dir(&root)?;
    Ok(root)
}

/// Default location of the process registry file.
pub fn registry_path() -> Result<PathBuf, PathError> {
    Ok(data_root()?.join(REGISTRY_FILE_NAME))
}

/// Default location of the configuration file.
///
/// `LLAMACTL_CONFIG` wins over `<data root>/config.json`.
pub fn config_path() -> Result<PathBuf, PathError> {
    if let Ok(path) = env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    Ok(data_root()?.join(CONFIG_FILE_NAME))
}

/// Create `path` (and parents) if missing.
pub fn ensure_dir(path: &Path) -> Result<(), PathError> {
    if path.exists() {
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|e| PathError::CreateFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_under_data_root() {
        let registry = registry_path().expect("registry_path failed");
        let data = data_root().expect("data_root failed");
        assert!(registry.starts_with(&data));
        assert!(registry.ends_with(REGISTRY_FILE_NAME));
    }

    #[test]
    fn ensure_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        ensure_dir(&nested).unwrap();
    }
}
