//! Configuration file loading and validation.
//!
//! The configuration is a single JSON document:
//!
//! ```json
//! {
//!   "settings": { "executable_path": "/opt/llama.cpp/llama-server" },
//!   "models": [
//!     { "id": "qwen-7b", "name": "Qwen 7B", "path": "/models/qwen.gguf",
//!       "parameters": { "cli_params": { "ngl": 99, "c": 8192 } } }
//!   ]
//! }
//! ```
//!
//! Loading validates settings and models and migrates legacy parameter
//! fields into `cli_params`, so the rest of the system only sees the
//! flexible form.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::ModelConfig;
use crate::settings::{Settings, SettingsError, validate_settings};

/// Accepted model artifact extensions (lowercase).
pub const MODEL_EXTENSIONS: &[&str] = &["gguf", "bin"];

/// Configuration loading error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(
        "Invalid model ID '{0}': only alphanumeric characters, hyphens, and underscores are allowed"
    )]
    InvalidModelId(String),

    #[error("Duplicate model ID: {0}")]
    DuplicateModelId(String),

    #[error("Model '{id}': file not found at {path}")]
    ModelFileMissing { id: String, path: PathBuf },

    #[error("Model '{id}': path is not a file: {path}")]
    ModelPathNotFile { id: String, path: PathBuf },

    #[error("Model '{id}': expected a .gguf or .bin file, got {path}")]
    InvalidModelExtension { id: String, path: PathBuf },
}

/// Everything read from the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub settings: Settings,
    pub models: Vec<ModelConfig>,
}

impl AppConfig {
    /// Parse, migrate and validate a configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(json)?;
        config.migrate_legacy();
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Loading configuration");
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn get_model(&self, id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|model| model.id == id)
    }

    pub fn model_ids(&self) -> Vec<&str> {
        self.models.iter().map(|model| model.id.as_str()).collect()
    }

    fn migrate_legacy(&mut self) {
        for model in &mut self.models {
            if model.parameters.has_legacy_fields() {
                warn!(
                    model_id = %model.id,
                    "Model uses deprecated parameter fields; move them into cli_params"
                );
                model.parameters.migrate_legacy();
            }
        }
    }

    /// Check settings and every model definition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_settings(&self.settings)?;

        let mut seen = HashSet::new();
        for model in &self.models {
            validate_model(model)?;
            if !seen.insert(model.id.as_str()) {
                return Err(ConfigError::DuplicateModelId(model.id.clone()));
            }
        }
        Ok(())
    }
}

/// Check a model's id and artifact path.
pub fn validate_model(model: &ModelConfig) -> Result<(), ConfigError> {
    let id_ok = !model.id.trim().is_empty()
        && model
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !id_ok {
        return Err(ConfigError::InvalidModelId(model.id.clone()));
    }

    let path = &model.path;
    if !path.exists() {
        return Err(ConfigError::ModelFileMissing {
            id: model.id.clone(),
            path: path.clone(),
        });
    }
    if !path.is_file() {
        return Err(ConfigError::ModelPathNotFile {
            id: model.id.clone(),
            path: path.clone(),
        });
    }
    let extension_ok = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MODEL_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
    if !extension_ok {
        return Err(ConfigError::InvalidModelExtension {
            id: model.id.clone(),
            path: path.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn model_json(id: &str, path: &Path) -> String {
        format!(
            r#"{{"id": "{id}", "name": "Model {id}", "path": {}}}"#,
            serde_json::to_string(path).unwrap()
        )
    }

    fn artifact(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, b"GGUF").unwrap();
        path
    }

    #[test]
    fn loads_valid_config_and_migrates_legacy_fields() {
        let dir = TempDir::new().unwrap();
        let path = artifact(&dir, "a.gguf");
        let json = format!(
            r#"{{"models": [{{"id": "m1", "name": "M1", "path": {}, "parameters": {{"n_ctx": 2048}}}}]}}"#,
            serde_json::to_string(&path).unwrap()
        );
        let config = AppConfig::from_json_str(&json).unwrap();
        let model = config.get_model("m1").unwrap();
        assert!(!model.parameters.has_legacy_fields());
        assert_eq!(model.parameters.to_cli_args(), vec!["--ctx-size", "2048"]);
        assert_eq!(config.settings, Settings::with_defaults());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let dir = TempDir::new().unwrap();
        let path = artifact(&dir, "a.gguf");
        let json = format!(
            r#"{{"models": [{}, {}]}}"#,
            model_json("m1", &path),
            model_json("m1", &path)
        );
        assert!(matches!(
            AppConfig::from_json_str(&json),
            Err(ConfigError::DuplicateModelId(id)) if id == "m1"
        ));
    }

    #[test]
    fn rejects_bad_ids_and_paths() {
        let dir = TempDir::new().unwrap();
        let good = artifact(&dir, "a.GGUF");
        let wrong_ext = artifact(&dir, "a.txt");

        let cases = [
            model_json("bad id", &good),
            model_json("m1", &dir.path().join("missing.gguf")),
            model_json("m1", dir.path()),
            model_json("m1", &wrong_ext),
        ];
        let results: Vec<_> = cases
            .iter()
            .map(|model| AppConfig::from_json_str(&format!(r#"{{"models": [{model}]}}"#)))
            .collect();

        assert!(matches!(results[0], Err(ConfigError::InvalidModelId(_))));
        assert!(matches!(results[1], Err(ConfigError::ModelFileMissing { .. })));
        assert!(matches!(results[2], Err(ConfigError::ModelPathNotFile { .. })));
        assert!(matches!(results[3], Err(ConfigError::InvalidModelExtension { .. })));
    }

    #[test]
    fn invalid_settings_surface() {
        let json = r#"{"settings": {"log_capacity": 0}}"#;
        assert!(matches!(
            AppConfig::from_json_str(json),
            Err(ConfigError::Settings(SettingsError::ZeroLogCapacity))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = AppConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
