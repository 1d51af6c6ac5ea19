//! Common test utilities.
//!
//! Integration tests run real child processes: a shell script stands in
//! for `llama-server`, and an in-process HTTP stub answers its health
//! checks. GPU state comes from a rewritable `nvidia-smi` capture.

pub mod engine;
pub mod fixtures;
