//! Settings, models and GPU captures for lifecycle tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use llamactl_core::{
    AppConfig, CliValue, GpuPorts, ModelConfig, ModelMetadata, ModelParameters, Scalar, Settings,
    Timeouts,
};
use llamactl_runtime::LifecycleManager;
use tempfile::TempDir;

use super::engine::{dead_port, fake_engine, spawn_health_stub};

/// Two RTX 3090s, rendered from per-device used memory.
pub fn nvidia_smi_output(used_mib: [u64; 2]) -> String {
    format!(
        "\
+-----------------------------------------------------------------------------------------+
| NVIDIA-SMI 550.54.14              Driver Version: 550.54.14      CUDA Version: 12.4     |
|-----------------------------------------+------------------------+----------------------+
| GPU  Name                 Persistence-M | Bus-Id          Disp.A | Volatile Uncorr. ECC |
| Fan  Temp   Perf          Pwr:Usage/Cap |           Memory-Usage | GPU-Util  Compute M. |
|=========================================+========================+======================|
|   0  NVIDIA GeForce RTX 3090        Off |   00000000:01:00.0 Off |                  N/A |
| 30%   35C    P8             20W /  350W |   {:>5}MiB /  24576MiB |      0%      Default |
+-----------------------------------------+------------------------+----------------------+
|   1  NVIDIA GeForce RTX 3090        Off |   00000000:02:00.0 Off |                  N/A |
| 30%   33C    P8             18W /  350W |   {:>5}MiB /  24576MiB |      0%      Default |
+-----------------------------------------+------------------------+----------------------+

+-----------------------------------------------------------------------------------------+
| Processes:                                                                              |
|  GPU   GI   CI        PID   Type   Process name                              GPU Memory |
|        ID   ID                                                               Usage      |
|=========================================================================================|
+-----------------------------------------------------------------------------------------+
",
        used_mib[0], used_mib[1]
    )
}

/// An isolated manager environment.
///
/// GPU 0 and GPU 1 have health stubs on their ports; GPU 2 and up map to
/// a port nobody listens on, so loads there never become ready.
pub struct TestEnv {
    pub dir: TempDir,
    pub settings: Settings,
    pub models: Vec<ModelConfig>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let gpu0 = spawn_health_stub().await;
        let gpu1 = spawn_health_stub().await;
        let unreachable = dead_port();

        let mut settings = Settings::with_defaults();
        settings.executable_path = fake_engine();
        settings.gpu_ports = GpuPorts {
            gpu0,
            gpu1,
            // GPU 2 lands on `unreachable`
            base: unreachable - 14,
        };
        settings.restart_on_crash = false;
        settings.timeouts = Timeouts {
            readiness_secs: 2,
            health_probe_secs: 1,
            health_poll_interval_ms: 50,
            unload_grace_secs: 2,
            kill_grace_secs: 1,
            switch_pause_ms: 10,
        };
        settings.gpu_detection.mock_mode = true;
        settings.gpu_detection.mock_data_path = dir.path().join("gpu.txt");
        settings.registry_path = Some(dir.path().join("registry.json"));

        let models = vec![
            model(dir.path(), "m1", "Model One"),
            model(dir.path(), "m2", "Model Two"),
        ];

        let env = Self {
            dir,
            settings,
            models,
        };
        env.set_gpu_memory([1, 1]);
        env
    }

    /// Build a manager through the same path the CLI uses.
    pub fn manager(&self) -> LifecycleManager {
        LifecycleManager::from_config(AppConfig {
            settings: self.settings.clone(),
            models: self.models.clone(),
        })
        .unwrap()
    }

    /// Rewrite the detector capture.
    pub fn set_gpu_memory(&self, used_mib: [u64; 2]) {
        std::fs::write(
            &self.settings.gpu_detection.mock_data_path,
            nvidia_smi_output(used_mib),
        )
        .unwrap();
    }

    pub fn registry_path(&self) -> PathBuf {
        self.dir.path().join("registry.json")
    }
}

fn model(dir: &Path, id: &str, name: &str) -> ModelConfig {
    let path = dir.join(format!("{id}.gguf"));
    std::fs::write(&path, b"GGUF").unwrap();

    let mut parameters = ModelParameters::default();
    parameters
        .cli_params
        .insert("ctx-size".into(), CliValue::Scalar(Scalar::from(4096_i64)));
    parameters.cli_params.insert("flash-attn".into(), CliValue::Flag);

    ModelConfig {
        id: id.to_string(),
        name: name.to_string(),
        path,
        parameters,
        metadata: ModelMetadata {
            family: "test".into(),
            ..ModelMetadata::default()
        },
    }
}
