//! Settings domain types and validation.
//!
//! Settings are read once at startup (see [`crate::config`]) and are
//! immutable for the lifetime of the process.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{DEFAULT_MEMORY_THRESHOLD_MIB, MAX_DEVICE_INDEX, ResourceKey};

/// Default llama-server port for GPU 0.
pub const DEFAULT_GPU0_PORT: u16 = 8081;

/// Default llama-server port for GPU 1.
pub const DEFAULT_GPU1_PORT: u16 = 8088;

/// Default base for ports of GPUs 2 and up (`base + 7 * index`).
pub const DEFAULT_PORT_BASE: u16 = 8081;

/// Spacing between derived ports.
pub const PORT_STRIDE: u16 = 7;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_EXECUTABLE: &str = "llama-server";
pub const DEFAULT_HEALTH_PATH: &str = "/health";
pub const DEFAULT_DEVICE_ENV_VAR: &str = "CUDA_VISIBLE_DEVICES";
pub const DEFAULT_DETECTION_COMMAND: &str = "nvidia-smi";
pub const DEFAULT_MOCK_DATA_PATH: &str = "data/gpu.txt";

/// Lines of engine output kept per instance.
pub const DEFAULT_LOG_CAPACITY: usize = 300;

pub const DEFAULT_MAX_RESTART_ATTEMPTS: u32 = 3;

/// Fixed ports for the first two GPUs and a derived range for the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuPorts {
    pub gpu0: u16,
    pub gpu1: u16,
    pub base: u16,
}

impl Default for GpuPorts {
    fn default() -> Self {
        Self {
            gpu0: DEFAULT_GPU0_PORT,
            gpu1: DEFAULT_GPU1_PORT,
            base: DEFAULT_PORT_BASE,
        }
    }
}

impl GpuPorts {
    /// Port for the device with the given index.
    ///
    /// Saturates instead of wrapping; `validate_settings` rejects bases
    /// that would overflow for [`MAX_DEVICE_INDEX`].
    pub fn port_for_index(&self, index: u32) -> u16 {
        match index {
            0 => self.gpu0,
            1 => self.gpu1,
            n => {
                let offset = u16::try_from(n).unwrap_or(u16::MAX).saturating_mul(PORT_STRIDE);
                self.base.saturating_add(offset)
            }
        }
    }

    /// Port for a resource key, taken from its smallest device index.
    pub fn port_for(&self, key: &ResourceKey) -> u16 {
        self.port_for_index(key.primary())
    }
}

/// GPU detection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuDetectionSettings {
    pub enabled: bool,
    /// Used memory above this is "occupied".
    pub memory_threshold_mib: u64,
    /// Read `mock_data_path` instead of running `command`.
    pub mock_mode: bool,
    pub mock_data_path: PathBuf,
    pub command: String,
    pub timeout_secs: u64,
}

impl Default for GpuDetectionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            memory_threshold_mib: DEFAULT_MEMORY_THRESHOLD_MIB,
            mock_mode: false,
            mock_data_path: PathBuf::from(DEFAULT_MOCK_DATA_PATH),
            command: DEFAULT_DETECTION_COMMAND.to_string(),
            timeout_secs: 10,
        }
    }
}

/// Timing knobs for load, unload and health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// How long a load waits for the engine to report healthy.
    pub readiness_secs: u64,
    pub health_probe_secs: u64,
    pub health_poll_interval_ms: u64,
    /// SIGTERM grace period on unload.
    pub unload_grace_secs: u64,
    /// Wait after SIGKILL.
    pub kill_grace_secs: u64,
    /// Pause between unload and load during a switch.
    pub switch_pause_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            readiness_secs: 60,
            health_probe_secs: 5,
            health_poll_interval_ms: 1000,
            unload_grace_secs: 30,
            kill_grace_secs: 5,
            switch_pause_ms: 1000,
        }
    }
}

impl Timeouts {
    pub const fn readiness(&self) -> Duration {
        Duration::from_secs(self.readiness_secs)
    }

    pub const fn health_probe(&self) -> Duration {
        Duration::from_secs(self.health_probe_secs)
    }

    pub const fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms)
    }

    pub const fn unload_grace(&self) -> Duration {
        Duration::from_secs(self.unload_grace_secs)
    }

    pub const fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    pub const fn switch_pause(&self) -> Duration {
        Duration::from_millis(self.switch_pause_ms)
    }
}

/// Application settings structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// llama-server executable.
    pub executable_path: PathBuf,

    /// Host the engines bind to and are probed on.
    pub default_host: String,

    pub gpu_ports: GpuPorts,

    pub gpu_detection: GpuDetectionSettings,

    /// Passed to the engine as `--api-key` and sent as a bearer token.
    pub api_key: Option<String>,

    pub restart_on_crash: bool,

    pub max_restart_attempts: u32,

    pub timeouts: Timeouts,

    /// Engine output lines kept per instance.
    pub log_capacity: usize,

    /// Environment variable used to pin an engine to its devices.
    pub device_env_var: String,

    pub health_path: String,

    /// Registry file; defaults to `<data root>/registry.json`.
    pub registry_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Settings {
    /// Create settings with sensible defaults.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            executable_path: PathBuf::from(DEFAULT_EXECUTABLE),
            default_host: DEFAULT_HOST.to_string(),
            gpu_ports: GpuPorts::default(),
            gpu_detection: GpuDetectionSettings::default(),
            api_key: None,
            restart_on_crash: true,
            max_restart_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
            timeouts: Timeouts::default(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            device_env_var: DEFAULT_DEVICE_ENV_VAR.to_string(),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            registry_path: None,
        }
    }
}

/// Settings validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("Port should be >= 1024 (privileged ports require root), got {0}")]
    InvalidPort(u16),

    #[error("Port base {0} overflows for the highest GPU index")]
    PortOverflow(u16),

    #[error("Timeout '{0}' must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("Log capacity must be greater than zero")]
    ZeroLogCapacity,

    #[error("Memory threshold must be greater than zero")]
    ZeroThreshold,

    #[error("Executable path cannot be empty")]
    EmptyExecutablePath,

    #[error("Host cannot be empty")]
    EmptyHost,

    #[error("Device environment variable name cannot be empty")]
    EmptyDeviceEnvVar,

    #[error("Health path must start with '/', got {0:?}")]
    InvalidHealthPath(String),
}

/// Validate settings values.
pub fn validate_settings(settings: &Settings) -> Result<(), SettingsError> {
    let ports = settings.gpu_ports;
    for port in [ports.gpu0, ports.gpu1, ports.base] {
        if port < 1024 {
            return Err(SettingsError::InvalidPort(port));
        }
    }

    let max_offset = u16::try_from(MAX_DEVICE_INDEX).unwrap_or(u16::MAX).saturating_mul(PORT_STRIDE);
    if ports.base.checked_add(max_offset).is_none() {
        return Err(SettingsError::PortOverflow(ports.base));
    }

    let timeouts = &settings.timeouts;
    let named = [
        ("readiness_secs", timeouts.readiness_secs),
        ("health_probe_secs", timeouts.health_probe_secs),
        ("health_poll_interval_ms", timeouts.health_poll_interval_ms),
        ("unload_grace_secs", timeouts.unload_grace_secs),
        ("kill_grace_secs", timeouts.kill_grace_secs),
    ];
    if let Some((name, _)) = named.iter().find(|(_, value)| *value == 0) {
        return Err(SettingsError::ZeroTimeout(*name));
    }
    if settings.gpu_detection.timeout_secs == 0 {
        return Err(SettingsError::ZeroTimeout("gpu_detection.timeout_secs"));
    }

    if settings.log_capacity == 0 {
        return Err(SettingsError::ZeroLogCapacity);
    }

    if settings.gpu_detection.memory_threshold_mib == 0 {
        return Err(SettingsError::ZeroThreshold);
    }

    if settings.executable_path.as_os_str().is_empty() {
        return Err(SettingsError::EmptyExecutablePath);
    }

    if settings.default_host.trim().is_empty() {
        return Err(SettingsError::EmptyHost);
    }

    if settings.device_env_var.trim().is_empty() {
        return Err(SettingsError::EmptyDeviceEnvVar);
    }

    if !settings.health_path.starts_with('/') {
        return Err(SettingsError::InvalidHealthPath(settings.health_path.clone()));
    }

    Ok(())
}
