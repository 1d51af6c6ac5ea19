//! Engine process supervision.
//!
//! # Structure
//!
//! - `EngineSupervisor` - owns one llama-server child, its monitor task and log buffer
//! - `LaunchSpec` / command building - what gets spawned and how
//! - `LogBuffer` - bounded ring buffer of engine output
//! - `shutdown_child` / `pid_exists` - signal handling
//! - Health probes over HTTP

mod command;
mod health;
mod logs;
pub mod shutdown;
mod stream;
mod supervisor;

pub use command::{LaunchSpec, build_args, command_line};
pub use health::{build_client, probe};
pub use logs::LogBuffer;
pub use shutdown::{pid_exists, shutdown_child};
pub use supervisor::{
    EngineSupervisor, MAX_RESTART_BACKOFF, ProxyResponse, SupervisorConfig, SupervisorError,
    restart_backoff,
};
