//! One engine bound to a resource key.

use std::sync::{Mutex, OnceLock, PoisonError};

use chrono::{DateTime, Utc};
use llamactl_core::{GpuHardwareRecord, InstanceStatus, ModelConfig, ProcessStatus, ResourceKey};

use crate::process::EngineSupervisor;

/// A model running (or being started/stopped) on a set of devices.
#[derive(Debug)]
pub struct EngineInstance {
    key: ResourceKey,
    port: u16,
    host: String,
    model: ModelConfig,
    supervisor: EngineSupervisor,
    loaded_at: OnceLock<DateTime<Utc>>,
    memory_mib: Mutex<Option<u64>>,
}

impl EngineInstance {
    pub(crate) fn new(
        key: ResourceKey,
        port: u16,
        host: String,
        model: ModelConfig,
        supervisor: EngineSupervisor,
    ) -> Self {
        Self {
            key,
            port,
            host,
            model,
            supervisor,
            loaded_at: OnceLock::new(),
            memory_mib: Mutex::new(None),
        }
    }

    pub const fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    pub const fn model(&self) -> &ModelConfig {
        &self.model
    }

    pub const fn supervisor(&self) -> &EngineSupervisor {
        &self.supervisor
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at.get().copied()
    }

    pub(crate) fn mark_loaded(&self) {
        let _ = self.loaded_at.set(Utc::now());
    }

    /// Most recent memory snapshot, in MiB.
    pub fn memory_mib(&self) -> Option<u64> {
        *self.memory_mib.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the memory snapshot from fresh detector output.
    pub(crate) fn refresh_memory(&self, records: &[GpuHardwareRecord]) -> Option<u64> {
        let memory = memory_for(&self.key, records);
        *self.memory_mib.lock().unwrap_or_else(PoisonError::into_inner) = memory;
        memory
    }

    /// Snapshot with `phase` overriding the supervisor's status.
    pub(crate) fn snapshot(&self, phase: Option<ProcessStatus>) -> InstanceStatus {
        let supervisor = &self.supervisor;
        InstanceStatus {
            resource: self.key.clone(),
            model_id: self.model.id.clone(),
            model_name: self.model.name.clone(),
            status: phase.unwrap_or_else(|| supervisor.status()),
            host: self.host.clone(),
            port: self.port,
            pid: supervisor.pid(),
            loaded_at: self.loaded_at(),
            uptime_seconds: supervisor.uptime().map(|d| d.as_secs()),
            memory_usage_mib: self.memory_mib(),
            restart_count: supervisor.restart_count(),
        }
    }
}

/// Used memory summed over the key's devices; `None` when none were detected.
pub fn memory_for(key: &ResourceKey, records: &[GpuHardwareRecord]) -> Option<u64> {
    let matching: Vec<u64> = records
        .iter()
        .filter(|record| record.device_index().is_some_and(|index| key.contains(index)))
        .map(|record| record.memory_used_mib)
        .collect();
    (!matching.is_empty()).then(|| matching.iter().sum())
}
