//! Core domain types, settings and ports for llamactl.
//!
//! This crate is pure: no processes, sockets or signal handling. The
//! runtime crate implements [`ports::HardwareProbe`] and the lifecycle
//! manager on top of these types.

#![deny(unused_crate_dependencies)]

pub mod config;
pub mod domain;
pub mod error;
pub mod paths;
pub mod ports;
pub mod settings;

pub use config::{AppConfig, ConfigError, MODEL_EXTENSIONS, validate_model};
pub use domain::{
    CliValue, DeviceOwnership, GpuHardwareRecord, GpuProcessInfo, GpuState, GpuStatus,
    HardwareSnapshot, HealthSummary, InstanceStatus, ModelConfig, ModelMetadata,
    ModelParameters, ModelSummary, OperationResult, ProcessStatus, ResourceError, ResourceKey,
    ResourceSpec, Scalar, classify,
};
pub use error::{ErrorKind, LifecycleError};
pub use paths::{PathError, config_path, data_root, registry_path};
pub use ports::HardwareProbe;
pub use settings::{
    GpuDetectionSettings, GpuPorts, Settings, SettingsError, Timeouts, validate_settings,
};
