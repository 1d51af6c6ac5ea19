//! Command builder for llama-server.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use super::supervisor::SupervisorConfig;

/// Everything needed to (re)launch one engine process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub model_path: PathBuf,
    /// Rendered engine parameters, appended after the fixed arguments.
    pub parameters: Vec<String>,
    pub host: String,
    pub port: u16,
    /// Exported as the device-visibility variable when set.
    pub device_selector: Option<String>,
}

impl LaunchSpec {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Arguments after the executable: `-m <model> --host <h> --port <p> [--api-key <k>] <params>`.
pub fn build_args(config: &SupervisorConfig, spec: &LaunchSpec) -> Vec<String> {
    let mut args = vec![
        "-m".to_string(),
        spec.model_path.to_string_lossy().into_owned(),
        "--host".to_string(),
        spec.host.clone(),
        "--port".to_string(),
        spec.port.to_string(),
    ];
    if let Some(key) = &config.api_key {
        args.push("--api-key".to_string());
        args.push(key.clone());
    }
    args.extend(spec.parameters.iter().cloned());
    args
}

/// Full command line, executable first, as recorded in the registry.
pub fn command_line(config: &SupervisorConfig, spec: &LaunchSpec) -> Vec<String> {
    let mut line = vec![config.executable.to_string_lossy().into_owned()];
    line.extend(build_args(config, spec));
    line
}

/// Build the engine command with piped output and device pinning.
pub fn build_command(config: &SupervisorConfig, spec: &LaunchSpec) -> Command {
    let mut cmd = Command::new(&config.executable);
    cmd.args(build_args(config, spec))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(selector) = &spec.device_selector {
        cmd.env(&config.device_env_var, selector);
    }
    cmd
}
