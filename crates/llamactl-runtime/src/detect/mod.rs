//! GPU hardware detection via `nvidia-smi`.
//!
//! [`GpuDetector`] implements the core `HardwareProbe` port. It either runs
//! the monitoring command or, in mock mode, reads a captured output file.
//! Failures never propagate: they are logged and reported as a single CPU
//! record.

mod parse;

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use llamactl_core::{GpuDetectionSettings, GpuHardwareRecord, HardwareProbe};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

pub use parse::parse_nvidia_smi;

/// Why a detection attempt produced no devices.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    NonZeroExit {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("{command} timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("Failed to read mock data {path}: {source}")]
    Fixture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No GPUs found in output")]
    NoDevices,
}

/// Where raw monitoring output comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorSource {
    /// Run this command (`nvidia-smi`).
    Command(String),
    /// Read captured output from a file.
    Fixture(PathBuf),
}

/// `nvidia-smi` backed hardware probe.
#[derive(Debug, Clone)]
pub struct GpuDetector {
    source: DetectorSource,
    timeout: Duration,
}

impl GpuDetector {
    pub const fn new(source: DetectorSource, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    /// Build from detection settings, honouring mock mode.
    pub fn from_settings(settings: &GpuDetectionSettings) -> Self {
        let source = if settings.mock_mode {
            DetectorSource::Fixture(settings.mock_data_path.clone())
        } else {
            DetectorSource::Command(settings.command.clone())
        };
        Self::new(source, Duration::from_secs(settings.timeout_secs))
    }

    pub const fn source(&self) -> &DetectorSource {
        &self.source
    }

    /// Run detection, surfacing the failure reason instead of falling back.
    pub async fn try_detect(&self) -> Result<Vec<GpuHardwareRecord>, DetectionError> {
        let output = self.read_output().await?;
        let records = parse_nvidia_smi(&output);
        if records.is_empty() {
            return Err(DetectionError::NoDevices);
        }
        debug!(count = records.len(), "Detected GPUs");
        Ok(records)
    }

    async fn read_output(&self) -> Result<String, DetectionError> {
        match &self.source {
            DetectorSource::Fixture(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|source| DetectionError::Fixture {
                    path: path.clone(),
                    source,
                }),
            DetectorSource::Command(command) => self.run_command(command).await,
        }
    }

    async fn run_command(&self, command: &str) -> Result<String, DetectionError> {
        let child = Command::new(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DetectionError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| DetectionError::Timeout {
                command: command.to_string(),
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|source| DetectionError::Spawn {
                command: command.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(DetectionError::NonZeroExit {
                command: command.to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl HardwareProbe for GpuDetector {
    async fn detect(&self) -> Vec<GpuHardwareRecord> {
        match self.try_detect().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "GPU detection failed, falling back to CPU");
                vec![GpuHardwareRecord::cpu_fallback()]
            }
        }
    }
}
