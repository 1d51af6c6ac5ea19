//! Handlers run end to end against a configuration on disk.

use std::path::Path;

use llamactl_cli::{CliContext, bootstrap, handlers};
use tempfile::TempDir;

fn write_config(dir: &Path) -> std::path::PathBuf {
    let model = dir.join("tiny.gguf");
    std::fs::write(&model, b"GGUF").unwrap();

    let config = serde_json::json!({
        "settings": {
            "registry_path": dir.join("registry.json"),
            "gpu_detection": { "enabled": false }
        },
        "models": [{
            "id": "tiny",
            "name": "Tiny Model",
            "path": model,
            "parameters": { "n_ctx": 2048 },
            "metadata": { "parameter_count": "1B", "quantization": "Q4_K_M" }
        }]
    });
    let path = dir.join("config.json");
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    path
}

fn context(dir: &TempDir) -> CliContext {
    bootstrap(Some(write_config(dir.path()))).unwrap()
}

#[test]
fn models_lists_configuration() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);

    let models = ctx.manager().available_models();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].metadata.quantization, "Q4_K_M");
    assert!(!models[0].loaded);

    handlers::models::execute(&ctx, false).unwrap();
    handlers::models::execute(&ctx, true).unwrap();
}

#[tokio::test]
async fn hardware_without_detection_prints_cpu() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);

    handlers::hardware::execute(&ctx, false).await.unwrap();
    handlers::hardware::execute(&ctx, true).await.unwrap();
    assert!(!ctx.manager().hardware_snapshot().await.detection_enabled);
}

#[test]
fn registry_is_empty_on_first_run() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);

    handlers::registry::execute(&ctx).unwrap();
    assert!(ctx.manager().registry().is_empty());
}

#[tokio::test]
async fn run_rejects_unknown_model() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);

    let err = handlers::run::execute(&ctx, "missing", "0", 10)
        .await
        .unwrap_err();
    let cli_err = err.downcast_ref::<llamactl_cli::CliError>().unwrap();
    assert_eq!(cli_err.exit_code(), 2);
}

#[test]
fn invalid_config_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"settings": {"log_capacity": 0}}"#).unwrap();

    let err = bootstrap(Some(path)).unwrap_err();
    assert_eq!(err.exit_code(), 78);
}
