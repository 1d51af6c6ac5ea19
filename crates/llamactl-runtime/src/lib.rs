//! Process runtime for llamactl.
//!
//! Everything that touches the OS lives here: `nvidia-smi` detection,
//! spawning and supervising `llama-server`, the on-disk process registry,
//! and the [`LifecycleManager`] that ties them to GPU allocation.
#![deny(unsafe_code)]

pub mod detect;
pub mod lifecycle;
pub mod process;
pub mod registry;

// Re-export the manager and the types it hands out
pub use lifecycle::{EngineInstance, LifecycleManager, NO_MODELS_LOADED};

// Re-export the hardware probe implementation
pub use detect::{DetectionError, DetectorSource, GpuDetector, parse_nvidia_smi};

// Re-export supervision primitives for direct use
pub use process::{EngineSupervisor, LaunchSpec, ProxyResponse, SupervisorConfig, SupervisorError};

pub use registry::{ProcessRecord, ProcessRegistry, RegistryError};
