//! CLI bootstrap: the composition root.
//!
//! Loads the configuration file and wires the `nvidia-smi` detector and
//! process registry into a [`LifecycleManager`].

use std::path::{Path, PathBuf};

use llamactl_core::{AppConfig, config_path};
use llamactl_runtime::LifecycleManager;
use tracing::debug;

use crate::error::CliError;

/// Everything a command handler needs.
#[derive(Debug)]
pub struct CliContext {
    config_path: PathBuf,
    manager: LifecycleManager,
}

impl CliContext {
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub const fn manager(&self) -> &LifecycleManager {
        &self.manager
    }
}

/// Resolve the configuration path and build the manager.
///
/// An explicit path wins over `LLAMACTL_CONFIG` and the data directory.
pub fn bootstrap(config: Option<PathBuf>) -> Result<CliContext, CliError> {
    let config_path = match config {
        Some(path) => path,
        None => config_path()?,
    };
    let app_config = AppConfig::load(&config_path)?;
    debug!(
        path = %config_path.display(),
        models = app_config.models.len(),
        "Configuration loaded"
    );
    let manager = LifecycleManager::from_config(app_config)?;
    Ok(CliContext {
        config_path,
        manager,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = bootstrap(Some(dir.path().join("absent.json"))).unwrap_err();
        assert_eq!(err.exit_code(), 78);
    }

    #[test]
    fn minimal_config_bootstraps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let registry = dir.path().join("registry.json");
        let json = format!(
            r#"{{"settings": {{"registry_path": {registry:?}, "gpu_detection": {{"enabled": false}}}}, "models": []}}"#
        );
        std::fs::write(&path, json).unwrap();

        let ctx = bootstrap(Some(path.clone())).unwrap();
        assert_eq!(ctx.config_path(), path);
        assert!(ctx.manager().available_models().is_empty());
        assert_eq!(ctx.manager().registry().path(), registry);
    }
}
