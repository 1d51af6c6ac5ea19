//! CLI error type and exit code mapping.

use llamactl_core::{ConfigError, ErrorKind, LifecycleError, PathError};
use thiserror::Error;

/// CLI-specific error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be found, parsed or validated.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The request itself was wrong (bad GPU spec, unknown model).
    #[error("Invalid arguments: {0}")]
    Arguments(String),

    /// The devices are taken or mid-transition.
    #[error("{0}")]
    Conflict(String),

    /// The engine could not be started, became unhealthy, or would not stop.
    #[error("Process error: {0}")]
    Process(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl CliError {
    /// Exit codes follow sysexits.h where a category fits.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Arguments(_) => 2, // EX_USAGE
            Self::Conflict(_) => 75, // EX_TEMPFAIL
            Self::Process(_) => 71,  // EX_OSERR
            Self::Io(_) => 74,       // EX_IOERR
            Self::Config(_) => 78,   // EX_CONFIG
        }
    }
}

impl From<LifecycleError> for CliError {
    fn from(err: LifecycleError) -> Self {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::Validation | ErrorKind::NotFound => Self::Arguments(message),
            ErrorKind::Conflict => Self::Conflict(message),
            ErrorKind::Spawn
            | ErrorKind::ReadinessTimeout
            | ErrorKind::Crash
            | ErrorKind::Stop
            | ErrorKind::Internal => Self::Process(message),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<PathError> for CliError {
    fn from(err: PathError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
