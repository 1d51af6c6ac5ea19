//! Command handlers.
//!
//! Each handler takes the [`crate::CliContext`], calls the lifecycle
//! manager and formats the result for the terminal.

pub mod hardware;
pub mod models;
pub mod registry;
pub mod run;
