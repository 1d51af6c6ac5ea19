//! Errors crossing the lifecycle boundary.
//!
//! Every variant maps to an [`ErrorKind`] so adapters (CLI, HTTP) can pick
//! exit codes or status codes without matching on message text.

use thiserror::Error;

use crate::domain::{ProcessStatus, ResourceError, ResourceKey};

/// Machine-distinguishable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Spawn,
    ReadinessTimeout,
    Crash,
    Stop,
    Internal,
}

/// Error returned by load, unload, switch and friends.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Malformed resource spec or other invalid input.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Model '{0}' not found in configuration")]
    ModelNotFound(String),

    /// Requested devices overlap an instance that is running, loading or unloading.
    #[error("GPU(s) {devices:?} already in use by '{owner}' (model {model_id})")]
    Conflict {
        devices: Vec<u32>,
        owner: ResourceKey,
        model_id: String,
    },

    /// The key is mid-load or mid-unload.
    #[error("Resource {resource} is busy ({state})")]
    Busy {
        resource: ResourceKey,
        state: &'static str,
    },

    #[error("Failed to start engine on {resource}: {reason}")]
    Spawn {
        resource: ResourceKey,
        reason: String,
    },

    #[error("Engine on {resource} did not become ready within {timeout_secs}s")]
    ReadinessTimeout {
        resource: ResourceKey,
        timeout_secs: u64,
    },

    #[error("Engine on {resource} entered state '{status}' while loading")]
    Crashed {
        resource: ResourceKey,
        status: ProcessStatus,
    },

    #[error("Failed to stop engine on {resource}: {reason}")]
    Stop {
        resource: ResourceKey,
        reason: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LifecycleError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::ModelNotFound(_) => ErrorKind::NotFound,
            Self::Conflict { .. } | Self::Busy { .. } => ErrorKind::Conflict,
            Self::Spawn { .. } => ErrorKind::Spawn,
            Self::ReadinessTimeout { .. } => ErrorKind::ReadinessTimeout,
            Self::Crashed { .. } => ErrorKind::Crash,
            Self::Stop { .. } => ErrorKind::Stop,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status an adapter would typically return for this error.
    pub const fn suggested_status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::ReadinessTimeout => 504,
            ErrorKind::Spawn | ErrorKind::Crash | ErrorKind::Stop | ErrorKind::Internal => 500,
        }
    }

    /// Whether retrying the same request later could succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Conflict | ErrorKind::ReadinessTimeout
        )
    }
}

impl From<ResourceError> for LifecycleError {
    fn from(err: ResourceError) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResourceSpec;

    #[test]
    fn resource_errors_are_validation() {
        let err: LifecycleError = ResourceSpec::from("9").normalize().unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.suggested_status_code(), 400);
        assert!(!err.is_retryable());
    }

    #[test]
    fn conflict_message_names_owner() {
        let err = LifecycleError::Conflict {
            devices: vec![0],
            owner: "0,1".parse().unwrap(),
            model_id: "m1".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.suggested_status_code(), 409);
        let message = err.to_string();
        assert!(message.contains("0,1"));
        assert!(message.contains("m1"));
    }
}
