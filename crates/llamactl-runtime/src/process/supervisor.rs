//! Single-process engine supervisor.
//!
//! An [`EngineSupervisor`] owns at most one llama-server child at a time.
//! `start` spawns the child and a monitor task; the monitor is the only
//! reader of the child's output and the only place exits are observed.
//! On an unexpected exit it marks the supervisor `crashed` and, when
//! configured, relaunches with exponential backoff. `stop` hands the child
//! back to the monitor for shutdown and joins it.
//!
//! ```text
//! stopped → starting → running → stopping → stopped
//!                        │  ▲
//!                 crash  ▼  │ restart
//!                      crashed → error (attempts exhausted)
//! ```

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use llamactl_core::{ProcessStatus, Settings};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::command::{LaunchSpec, build_command};
use super::health::{build_client, probe};
use super::logs::LogBuffer;
use super::shutdown::{pid_exists, shutdown_child};
use super::stream::spawn_stream_reader;

/// Upper bound on the delay between automatic restarts.
pub const MAX_RESTART_BACKOFF: Duration = Duration::from_secs(60);

/// How long to keep draining output after the child has exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Delay before restart attempt `attempt` (zero based): `min(2^attempt, 60)` seconds.
pub fn restart_backoff(attempt: u32) -> Duration {
    let secs = 2u64.saturating_pow(attempt);
    Duration::from_secs(secs).min(MAX_RESTART_BACKOFF)
}

/// Errors from supervisor operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Cannot start engine while {0}")]
    InvalidState(ProcessStatus),

    #[error("Model file not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Failed to spawn {executable}: {source}")]
    Spawn {
        executable: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Failed to stop engine: {0}")]
    Stop(#[source] io::Error),

    #[error("Engine is not running (status: {0})")]
    NotRunning(ProcessStatus),

    #[error("Unsupported proxy method: {0}")]
    UnsupportedMethod(String),

    #[error("Proxy request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Monitor task failed: {0}")]
    Monitor(String),
}

/// Per-supervisor configuration, derived from [`Settings`].
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub executable: PathBuf,
    pub api_key: Option<String>,
    pub restart_on_crash: bool,
    pub max_restart_attempts: u32,
    pub log_capacity: usize,
    pub device_env_var: String,
    pub health_path: String,
    pub health_timeout: Duration,
    pub kill_grace: Duration,
}

impl SupervisorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            executable: settings.executable_path.clone(),
            api_key: settings.api_key.clone(),
            restart_on_crash: settings.restart_on_crash,
            max_restart_attempts: settings.max_restart_attempts,
            log_capacity: settings.log_capacity,
            device_env_var: settings.device_env_var.clone(),
            health_path: settings.health_path.clone(),
            health_timeout: settings.timeouts.health_probe(),
            kill_grace: settings.timeouts.kill_grace(),
        }
    }
}

/// Response of a proxied request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyResponse {
    pub status: u16,
    /// JSON body, or the raw text as a JSON string when it is not JSON.
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, Copy)]
struct StopRequest {
    graceful: bool,
    grace: Duration,
}

#[derive(Debug, Clone)]
struct Endpoint {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug)]
struct State {
    status: ProcessStatus,
    pid: Option<u32>,
    started_at: Option<Instant>,
    restart_count: u32,
    logs: LogBuffer,
    endpoint: Option<Endpoint>,
}

#[derive(Debug)]
struct Shared {
    config: SupervisorConfig,
    state: Mutex<State>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: ProcessStatus) {
        self.state().status = status;
    }

    fn push_line(&self, line: String) {
        self.state().logs.push(line);
    }
}

struct MonitorHandle {
    stop_tx: oneshot::Sender<StopRequest>,
    join: JoinHandle<Result<(), SupervisorError>>,
}

/// Supervisor for one engine process.
pub struct EngineSupervisor {
    shared: Arc<Shared>,
    /// Serializes `start` and `stop`; holds the running monitor.
    control: tokio::sync::Mutex<Option<MonitorHandle>>,
}

impl std::fmt::Debug for EngineSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state();
        f.debug_struct("EngineSupervisor")
            .field("status", &state.status)
            .field("pid", &state.pid)
            .field("restart_count", &state.restart_count)
            .finish_non_exhaustive()
    }
}

impl EngineSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let logs = LogBuffer::new(config.log_capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State {
                    status: ProcessStatus::Stopped,
                    pid: None,
                    started_at: None,
                    restart_count: 0,
                    logs,
                    endpoint: None,
                }),
            }),
            control: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.shared.config
    }

    pub fn status(&self) -> ProcessStatus {
        self.shared.state().status
    }

    pub fn pid(&self) -> Option<u32> {
        self.shared.state().pid
    }

    pub fn restart_count(&self) -> u32 {
        self.shared.state().restart_count
    }

    /// Time since the current incarnation was spawned.
    pub fn uptime(&self) -> Option<Duration> {
        self.shared.state().started_at.map(|t| t.elapsed())
    }

    /// The last `n` output lines, oldest first. `n` is capped at the buffer capacity.
    pub fn get_logs(&self, n: usize) -> Vec<String> {
        let state = self.shared.state();
        state.logs.tail(n.min(state.logs.capacity()))
    }

    /// Spawn the engine.
    ///
    /// Accepted only from `stopped` or `crashed`. Returns the child's pid.
    pub async fn start(&self, spec: LaunchSpec) -> Result<u32, SupervisorError> {
        let mut control = self.control.lock().await;

        let current = self.status();
        if !current.can_start() {
            return Err(SupervisorError::InvalidState(current));
        }

        // A crashed monitor may still be waiting out its backoff.
        if let Some(previous) = control.take() {
            drop(previous.stop_tx);
            let _ = previous.join.await;
        }

        if !spec.model_path.is_file() {
            self.shared.set_status(ProcessStatus::Error);
            return Err(SupervisorError::ModelNotFound(spec.model_path));
        }

        self.shared.set_status(ProcessStatus::Starting);
        let config = &self.shared.config;

        let client = match build_client(config.health_timeout) {
            Ok(client) => client,
            Err(e) => {
                self.shared.set_status(ProcessStatus::Error);
                return Err(SupervisorError::Client(e));
            }
        };

        let (child, lines) = match spawn_engine(config, &spec) {
            Ok(spawned) => spawned,
            Err(source) => {
                self.shared.set_status(ProcessStatus::Error);
                return Err(SupervisorError::Spawn {
                    executable: config.executable.clone(),
                    source,
                });
            }
        };

        let pid = child.id().unwrap_or_default();
        {
            let mut state = self.shared.state();
            state.status = ProcessStatus::Running;
            state.pid = child.id();
            state.started_at = Some(Instant::now());
            state.restart_count = 0;
            state.logs.clear();
            state.endpoint = Some(Endpoint {
                client,
                base_url: spec.base_url(),
            });
        }
        info!(pid, port = spec.port, model = %spec.model_path.display(), "Engine started");

        let (stop_tx, stop_rx) = oneshot::channel();
        let join = tokio::spawn(monitor(
            Arc::clone(&self.shared),
            spec,
            child,
            lines,
            stop_rx,
        ));
        *control = Some(MonitorHandle { stop_tx, join });

        Ok(pid)
    }

    /// Stop the engine and join its monitor.
    ///
    /// Idempotent: stopping a stopped supervisor succeeds immediately.
    /// Graceful stops send SIGTERM and wait up to `grace` before SIGKILL.
    pub async fn stop(&self, graceful: bool, grace: Duration) -> Result<(), SupervisorError> {
        let mut control = self.control.lock().await;

        let Some(handle) = control.take() else {
            let mut state = self.shared.state();
            state.status = ProcessStatus::Stopped;
            state.pid = None;
            state.started_at = None;
            state.endpoint = None;
            return Ok(());
        };

        self.shared.set_status(ProcessStatus::Stopping);
        // The monitor may already have finished (crash without restart).
        let _ = handle.stop_tx.send(StopRequest { graceful, grace });

        let outcome = match handle.join.await {
            Ok(result) => result,
            Err(e) => Err(SupervisorError::Monitor(e.to_string())),
        };

        let mut state = self.shared.state();
        state.endpoint = None;
        state.started_at = None;
        match outcome {
            Ok(()) => {
                state.status = ProcessStatus::Stopped;
                state.pid = None;
                info!("Engine stopped");
                Ok(())
            }
            Err(e) => {
                state.status = ProcessStatus::Error;
                error!(error = %e, "Engine stop failed");
                Err(e)
            }
        }
    }

    /// Running, process alive, and the health endpoint answers `200`.
    pub async fn is_healthy(&self) -> bool {
        let (endpoint, pid) = {
            let state = self.shared.state();
            if state.status != ProcessStatus::Running {
                return false;
            }
            let Some(endpoint) = state.endpoint.clone() else {
                return false;
            };
            (endpoint, state.pid)
        };

        if let Some(pid) = pid
            && !pid_exists(pid)
        {
            return false;
        }

        let config = &self.shared.config;
        let url = format!("{}{}", endpoint.base_url, config.health_path);
        probe(
            &endpoint.client,
            &url,
            config.api_key.as_deref(),
            config.health_timeout,
        )
        .await
    }

    /// Forward a request to the running engine.
    pub async fn proxy(
        &self,
        endpoint: &str,
        method: &str,
        body: Option<&serde_json::Value>,
        headers: &HashMap<String, String>,
    ) -> Result<ProxyResponse, SupervisorError> {
        let target = {
            let state = self.shared.state();
            if state.status != ProcessStatus::Running {
                return Err(SupervisorError::NotRunning(state.status));
            }
            state
                .endpoint
                .clone()
                .ok_or(SupervisorError::NotRunning(state.status))?
        };

        let method = match method.to_ascii_uppercase().as_str() {
            "GET" => reqwest::Method::GET,
            "POST" => reqwest::Method::POST,
            "PUT" => reqwest::Method::PUT,
            "DELETE" => reqwest::Method::DELETE,
            "PATCH" => reqwest::Method::PATCH,
            other => return Err(SupervisorError::UnsupportedMethod(other.to_string())),
        };

        let path = endpoint.trim_start_matches('/');
        let url = format!("{}/{}", target.base_url, path);
        debug!(%url, %method, "Proxying request to engine");

        let mut request = target.client.request(method, &url);
        if let Some(key) = &self.shared.config.api_key {
            request = request.bearer_auth(key);
        }
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
        Ok(ProxyResponse { status, body })
    }
}

type Spawned = (Child, mpsc::UnboundedReceiver<String>);

fn spawn_engine(config: &SupervisorConfig, spec: &LaunchSpec) -> io::Result<Spawned> {
    let mut child = build_command(config, spec).spawn()?;
    let (tx, rx) = mpsc::unbounded_channel();

    // stderr is merged into the same buffer as stdout
    if let Some(stdout) = child.stdout.take() {
        spawn_stream_reader(stdout, spec.port, "stdout", tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_stream_reader(stderr, spec.port, "stderr", tx);
    }
    Ok((child, rx))
}

async fn drain_output(shared: &Shared, lines: &mut mpsc::UnboundedReceiver<String>) {
    let drained = timeout(OUTPUT_DRAIN_TIMEOUT, async {
        while let Some(line) = lines.recv().await {
            shared.push_line(line);
        }
    })
    .await;
    if drained.is_err() {
        debug!("Output still open after engine exit, stopped draining");
    }
}

/// Watch one engine across restarts until stopped or given up on.
async fn monitor(
    shared: Arc<Shared>,
    spec: LaunchSpec,
    mut child: Child,
    mut lines: mpsc::UnboundedReceiver<String>,
    mut stop_rx: oneshot::Receiver<StopRequest>,
) -> Result<(), SupervisorError> {
    loop {
        let exit = loop {
            tokio::select! {
                request = &mut stop_rx => {
                    // A dropped sender means the supervisor is gone: kill.
                    let request = request.unwrap_or(StopRequest {
                        graceful: false,
                        grace: Duration::ZERO,
                    });
                    let result = shutdown_child(
                        &mut child,
                        request.graceful,
                        request.grace,
                        shared.config.kill_grace,
                    )
                    .await;
                    drain_output(&shared, &mut lines).await;
                    return result.map(|status| {
                        debug!(%status, "Engine exited after stop request");
                    })
                    .map_err(SupervisorError::Stop);
                }
                Some(line) = lines.recv() => shared.push_line(line),
                status = child.wait() => break status,
            }
        };

        drain_output(&shared, &mut lines).await;

        let attempts = {
            let mut state = shared.state();
            if state.status == ProcessStatus::Stopping {
                // Exit raced with a stop request; nothing to report.
                return Ok(());
            }
            state.status = ProcessStatus::Crashed;
            state.endpoint = None;
            state.started_at = None;
            state.restart_count
        };

        match &exit {
            Ok(status) => error!(port = spec.port, %status, "Engine exited unexpectedly"),
            Err(e) => error!(port = spec.port, error = %e, "Failed to wait on engine"),
        }

        let config = &shared.config;
        if !config.restart_on_crash {
            return Ok(());
        }
        if attempts >= config.max_restart_attempts {
            error!(
                port = spec.port,
                attempts, "Restart attempts exhausted, giving up"
            );
            shared.set_status(ProcessStatus::Error);
            return Ok(());
        }

        let delay = restart_backoff(attempts);
        warn!(
            port = spec.port,
            attempt = attempts + 1,
            delay_secs = delay.as_secs(),
            "Restarting engine after crash"
        );
        tokio::select! {
            _ = &mut stop_rx => return Ok(()),
            () = sleep(delay) => {}
        }

        let client = build_client(config.health_timeout).map_err(SupervisorError::Client);
        let respawned = spawn_engine(config, &spec);
        let mut state = shared.state();
        state.restart_count = attempts + 1;
        match (client, respawned) {
            (Ok(client), Ok((next_child, next_lines))) => {
                state.status = ProcessStatus::Running;
                state.pid = next_child.id();
                state.started_at = Some(Instant::now());
                state.endpoint = Some(Endpoint {
                    client,
                    base_url: spec.base_url(),
                });
                info!(pid = ?state.pid, port = spec.port, "Engine restarted");
                child = next_child;
                lines = next_lines;
            }
            (Err(e), _) => {
                state.status = ProcessStatus::Error;
                error!(error = %e, "Restart failed");
                return Ok(());
            }
            (_, Err(e)) => {
                state.status = ProcessStatus::Error;
                error!(error = %e, executable = %config.executable.display(), "Restart failed");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_a_minute() {
        assert_eq!(restart_backoff(0), Duration::from_secs(1));
        assert_eq!(restart_backoff(1), Duration::from_secs(2));
        assert_eq!(restart_backoff(5), Duration::from_secs(32));
        assert_eq!(restart_backoff(6), MAX_RESTART_BACKOFF);
        assert_eq!(restart_backoff(100), MAX_RESTART_BACKOFF);
    }

    fn config() -> SupervisorConfig {
        SupervisorConfig::from_settings(&Settings::with_defaults())
    }

    #[tokio::test]
    async fn stop_when_stopped_is_ok() {
        let supervisor = EngineSupervisor::new(config());
        supervisor.stop(true, Duration::from_secs(1)).await.unwrap();
        supervisor.stop(false, Duration::from_secs(1)).await.unwrap();
        assert_eq!(supervisor.status(), ProcessStatus::Stopped);
    }

    #[tokio::test]
    async fn start_rejects_missing_model() {
        let supervisor = EngineSupervisor::new(config());
        let spec = LaunchSpec {
            model_path: PathBuf::from("/nonexistent/model.gguf"),
            parameters: Vec::new(),
            host: "127.0.0.1".into(),
            port: 1,
            device_selector: None,
        };
        assert!(matches!(
            supervisor.start(spec).await,
            Err(SupervisorError::ModelNotFound(_))
        ));
        assert_eq!(supervisor.status(), ProcessStatus::Error);
        assert_eq!(supervisor.pid(), None);
    }

    #[tokio::test]
    async fn not_running_is_unhealthy_and_cannot_proxy() {
        let supervisor = EngineSupervisor::new(config());
        assert!(!supervisor.is_healthy().await);
        assert!(matches!(
            supervisor.proxy("/v1/models", "GET", None, &HashMap::new()).await,
            Err(SupervisorError::NotRunning(ProcessStatus::Stopped))
        ));
        assert!(supervisor.get_logs(10).is_empty());
    }
}
