//! Port definitions (trait abstractions) for external systems.
//!
//! Core owns the traits; `llamactl-runtime` provides the implementations
//! and the CLI injects them.

use async_trait::async_trait;

use crate::domain::GpuHardwareRecord;

/// Source of raw GPU hardware records.
///
/// Detection is advisory: implementations never fail. When no device can
/// be read they return a single [`GpuHardwareRecord::cpu_fallback`].
#[async_trait]
pub trait HardwareProbe: Send + Sync {
    async fn detect(&self) -> Vec<GpuHardwareRecord>;
}
