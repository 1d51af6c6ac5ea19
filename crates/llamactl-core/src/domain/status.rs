//! Status snapshots and operation results returned by the lifecycle manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::ModelMetadata;
use super::resource::ResourceKey;

/// Lifecycle state of one engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
    Error,
}

impl ProcessStatus {
    /// States from which `start` is accepted.
    pub const fn can_start(self) -> bool {
        matches!(self, Self::Stopped | Self::Crashed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub resource: ResourceKey,
    pub model_id: String,
    pub model_name: String,
    pub status: ProcessStatus,
    pub host: String,
    pub port: u16,
    pub pid: Option<u32>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub uptime_seconds: Option<u64>,
    /// Used memory summed over the instance's devices, in MiB.
    pub memory_usage_mib: Option<u64>,
    pub restart_count: u32,
}

/// Outcome of load, unload and switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    pub model_id: Option<String>,
    pub previous_model_id: Option<String>,
    pub status: Option<InstanceStatus>,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            model_id: None,
            previous_model_id: None,
            status: None,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    #[must_use]
    pub fn with_previous(mut self, previous: Option<String>) -> Self {
        self.previous_model_id = previous;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Entry in the model listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub id: String,
    pub name: String,
    pub loaded: bool,
    /// Resource keys the model currently runs on.
    pub resources: Vec<ResourceKey>,
    pub metadata: ModelMetadata,
}

/// Result of the aggregate health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub healthy: bool,
    pub status: ProcessStatus,
    pub message: String,
    pub resource: Option<ResourceKey>,
    pub uptime_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_stopped_or_crashed_can_start() {
        assert!(ProcessStatus::Stopped.can_start());
        assert!(ProcessStatus::Crashed.can_start());
        assert!(!ProcessStatus::Running.can_start());
        assert!(!ProcessStatus::Error.can_start());
    }

    #[test]
    fn operation_result_builder() {
        let result = OperationResult::ok("done")
            .with_model("m2")
            .with_previous(Some("m1".into()));
        assert!(result.success);
        assert_eq!(result.model_id.as_deref(), Some("m2"));
        assert_eq!(result.previous_model_id.as_deref(), Some("m1"));
        assert!(result.status.is_none());
    }
}
