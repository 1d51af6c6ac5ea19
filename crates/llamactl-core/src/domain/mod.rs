//! Core domain types.
//!
//! These types represent the pure domain model, independent of any
//! infrastructure concerns (processes, filesystem, HTTP).
//!
//! # Structure
//!
//! - `resource` - GPU selections (`ResourceSpec`) and normalized keys (`ResourceKey`)
//! - `gpu` - Hardware records and the derived per-device status
//! - `model` - Model definitions and engine parameters
//! - `status` - Instance snapshots and operation results

pub mod gpu;
pub mod model;
pub mod resource;
pub mod status;

pub use gpu::{
    CPU_DEVICE_INDEX, DEFAULT_MEMORY_THRESHOLD_MIB, DeviceOwnership, GpuHardwareRecord,
    GpuProcessInfo, GpuState, GpuStatus, HardwareSnapshot, OCCUPIED_BY_OTHERS_LABEL, classify,
};
pub use model::{CliValue, ModelConfig, ModelMetadata, ModelParameters, SHORT_FLAGS, Scalar, flag_for};
pub use resource::{MAX_DEVICE_INDEX, ResourceError, ResourceKey, ResourceSpec};
pub use status::{HealthSummary, InstanceStatus, ModelSummary, OperationResult, ProcessStatus};
