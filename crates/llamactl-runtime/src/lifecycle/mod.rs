//! GPU allocation and engine lifecycle management.
//!
//! [`LifecycleManager`] is the entry point for every external operation.
//! It owns the map of resource key → slot, where a slot is an engine that
//! is loading, active or unloading. Every slot reserves its devices, so
//! conflict checks see in-flight operations too.
//!
//! Load, unload and switch run as their own tokio tasks: dropping the
//! caller's future does not abandon a half-started engine.

mod instance;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use llamactl_core::{
    AppConfig, DeviceOwnership, GpuDetectionSettings, GpuHardwareRecord, HardwareProbe,
    HardwareSnapshot, HealthSummary, InstanceStatus, LifecycleError, ModelConfig, ModelSummary,
    OperationResult, PathError, ProcessStatus, ResourceKey, ResourceSpec, Settings, registry_path,
};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::detect::GpuDetector;
use crate::process::{EngineSupervisor, LaunchSpec, SupervisorConfig, command_line};
use crate::registry::{ProcessRecord, ProcessRegistry};

pub use instance::{EngineInstance, memory_for};

/// Returned by `logs` when nothing is loaded.
pub const NO_MODELS_LOADED: &str = "No models currently loaded";

enum Slot {
    Loading(Arc<EngineInstance>),
    Active(Arc<EngineInstance>),
    Unloading(Arc<EngineInstance>),
}

impl Slot {
    const fn instance(&self) -> &Arc<EngineInstance> {
        match self {
            Self::Loading(instance) | Self::Active(instance) | Self::Unloading(instance) => {
                instance
            }
        }
    }

    /// Status reported instead of the supervisor's own while in transition.
    const fn phase(&self) -> Option<ProcessStatus> {
        match self {
            Self::Loading(_) => Some(ProcessStatus::Starting),
            Self::Active(_) => None,
            Self::Unloading(_) => Some(ProcessStatus::Stopping),
        }
    }

    const fn busy_state(&self) -> Option<&'static str> {
        match self {
            Self::Loading(_) => Some("loading"),
            Self::Active(_) => None,
            Self::Unloading(_) => Some("unloading"),
        }
    }
}

type Slots = BTreeMap<ResourceKey, Slot>;

/// Holds a `Loading` slot; releases it on drop unless committed.
struct Reservation<'a> {
    slots: &'a Mutex<Slots>,
    key: ResourceKey,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        let mut slots = lock(self.slots);
        if let Some(slot) = slots.remove(&self.key) {
            slots.insert(self.key.clone(), Slot::Active(Arc::clone(slot.instance())));
        }
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let mut slots = lock(self.slots);
            if matches!(slots.get(&self.key), Some(Slot::Loading(_))) {
                slots.remove(&self.key);
                debug!(key = %self.key, "Released reservation");
            }
        }
    }
}

fn lock(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    settings: Settings,
    models: Vec<ModelConfig>,
    probe: Arc<dyn HardwareProbe>,
    registry: ProcessRegistry,
    slots: Mutex<Slots>,
}

/// Coordinates engines across GPUs.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = lock(&self.inner.slots).keys().map(ToString::to_string).collect();
        f.debug_struct("LifecycleManager")
            .field("models", &self.inner.models.len())
            .field("slots", &keys)
            .finish_non_exhaustive()
    }
}

impl LifecycleManager {
    /// Create a manager and sweep the registry left by a previous run.
    ///
    /// Dead registry entries are removed. Live ones are reported but not
    /// adopted; those processes must be stopped by hand.
    pub fn new(
        settings: Settings,
        models: Vec<ModelConfig>,
        probe: Arc<dyn HardwareProbe>,
        registry: ProcessRegistry,
    ) -> Self {
        sweep_registry(&registry);
        Self {
            inner: Arc::new(Inner {
                settings,
                models,
                probe,
                registry,
                slots: Mutex::new(Slots::new()),
            }),
        }
    }

    /// Wire up the `nvidia-smi` detector and the registry file from configuration.
    pub fn from_config(config: AppConfig) -> Result<Self, PathError> {
        let registry_file: PathBuf = match &config.settings.registry_path {
            Some(path) => path.clone(),
            None => registry_path()?,
        };
        let probe = Arc::new(GpuDetector::from_settings(&config.settings.gpu_detection));
        let registry = ProcessRegistry::open(registry_file);
        Ok(Self::new(config.settings, config.models, probe, registry))
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.inner.registry
    }

    /// Effective detection settings.
    pub fn detection_config(&self) -> &GpuDetectionSettings {
        &self.inner.settings.gpu_detection
    }

    /// Port an engine on `key` listens on.
    pub fn port_for(&self, key: &ResourceKey) -> u16 {
        self.inner.settings.gpu_ports.port_for(key)
    }

    /// Start `model_id` on the devices named by `spec` and wait until it is healthy.
    pub async fn load(
        &self,
        model_id: &str,
        spec: impl Into<ResourceSpec>,
    ) -> Result<OperationResult, LifecycleError> {
        let inner = Arc::clone(&self.inner);
        let model_id = model_id.to_string();
        let spec: ResourceSpec = spec.into();
        detached(async move { inner.load(&model_id, &spec).await }).await
    }

    /// Stop whatever runs on `spec`. Succeeds when nothing is loaded there.
    pub async fn unload(
        &self,
        spec: impl Into<ResourceSpec>,
    ) -> Result<OperationResult, LifecycleError> {
        let inner = Arc::clone(&self.inner);
        let spec: ResourceSpec = spec.into();
        detached(async move { inner.unload(&spec).await }).await
    }

    /// Replace the model on `spec` with `model_id`.
    ///
    /// If the new model fails to load the previous one is not restored.
    pub async fn switch(
        &self,
        model_id: &str,
        spec: impl Into<ResourceSpec>,
    ) -> Result<OperationResult, LifecycleError> {
        let inner = Arc::clone(&self.inner);
        let model_id = model_id.to_string();
        let spec: ResourceSpec = spec.into();
        detached(async move { inner.switch(&model_id, &spec).await }).await
    }

    /// Status of the instance on `spec`, with freshly queried memory.
    pub async fn status(
        &self,
        spec: impl Into<ResourceSpec>,
    ) -> Result<Option<InstanceStatus>, LifecycleError> {
        let spec: ResourceSpec = spec.into();
        let key = spec.normalize()?;
        let Some((instance, phase)) = self.inner.slot(&key) else {
            return Ok(None);
        };
        if let Some(records) = self.inner.detect().await {
            instance.refresh_memory(&records);
        }
        Ok(Some(instance.snapshot(phase)))
    }

    /// Status of every instance, in key order.
    pub async fn status_all(&self) -> Vec<InstanceStatus> {
        let slots = self.inner.all_slots();
        if slots.is_empty() {
            return Vec::new();
        }
        let records = self.inner.detect().await;
        slots
            .into_iter()
            .map(|(instance, phase)| {
                if let Some(records) = &records {
                    instance.refresh_memory(records);
                }
                instance.snapshot(phase)
            })
            .collect()
    }

    /// Detector output merged with the devices this manager owns.
    pub async fn hardware_snapshot(&self) -> HardwareSnapshot {
        let detection = &self.inner.settings.gpu_detection;
        let ownership = self.inner.ownership();
        match self.inner.detect().await {
            Some(records) => HardwareSnapshot::from_records(
                &records,
                &ownership,
                detection.memory_threshold_mib,
                true,
                detection.mock_mode,
            ),
            None => HardwareSnapshot::from_records(
                &[GpuHardwareRecord::cpu_fallback()],
                &ownership,
                detection.memory_threshold_mib,
                false,
                detection.mock_mode,
            ),
        }
    }

    /// Device → model name for every loading, active or unloading instance.
    pub fn ownership(&self) -> DeviceOwnership {
        self.inner.ownership()
    }

    /// Last `lines` output lines of the engine on `spec`, or of the first
    /// instance when `spec` is `None`.
    ///
    /// When there is nothing to show, explanatory lines are returned
    /// instead of an error.
    pub fn logs(
        &self,
        spec: Option<ResourceSpec>,
        lines: usize,
    ) -> Result<Vec<String>, LifecycleError> {
        let lines = lines.min(self.inner.settings.log_capacity);
        let slots = lock(&self.inner.slots);

        let key = match spec {
            Some(spec) => spec.normalize()?,
            None => match slots.keys().next() {
                Some(first) => first.clone(),
                None => return Ok(vec![NO_MODELS_LOADED.to_string()]),
            },
        };

        if let Some(slot) = slots.get(&key) {
            return Ok(slot.instance().supervisor().get_logs(lines));
        }

        let mut message = vec![format!("No model loaded on GPU {key}")];
        if !slots.is_empty() {
            let loaded: Vec<String> = slots.keys().map(ToString::to_string).collect();
            message.push(format!("Models are currently loaded on: {}", loaded.join(", ")));
        }
        Ok(message)
    }

    /// Every configured model with its loaded state.
    pub fn available_models(&self) -> Vec<ModelSummary> {
        let slots = lock(&self.inner.slots);
        self.inner
            .models
            .iter()
            .map(|model| {
                let resources: Vec<ResourceKey> = slots
                    .iter()
                    .filter(|(_, slot)| slot.instance().model().id == model.id)
                    .map(|(key, _)| key.clone())
                    .collect();
                ModelSummary {
                    id: model.id.clone(),
                    name: model.name.clone(),
                    loaded: !resources.is_empty(),
                    resources,
                    metadata: model.metadata.clone(),
                }
            })
            .collect()
    }

    /// Health of the first running instance that answers its probe.
    pub async fn healthcheck(&self) -> HealthSummary {
        for (instance, phase) in self.inner.all_slots() {
            if phase.is_some() {
                continue;
            }
            let supervisor = instance.supervisor();
            if supervisor.status() == ProcessStatus::Running && supervisor.is_healthy().await {
                return HealthSummary {
                    healthy: true,
                    status: ProcessStatus::Running,
                    message: format!(
                        "Model '{}' on GPU {} is healthy",
                        instance.model().id,
                        instance.key()
                    ),
                    resource: Some(instance.key().clone()),
                    uptime_seconds: supervisor.uptime().map(|d| d.as_secs()),
                };
            }
        }
        HealthSummary {
            healthy: false,
            status: ProcessStatus::Stopped,
            message: "No healthy model instances running".to_string(),
            resource: None,
            uptime_seconds: None,
        }
    }

    /// Unload every active instance. Errors are logged and the rest continue.
    pub async fn shutdown(&self) -> Vec<(ResourceKey, Result<OperationResult, LifecycleError>)> {
        let keys: Vec<ResourceKey> = lock(&self.inner.slots).keys().cloned().collect();
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let result = self.unload(&key).await;
            if let Err(e) = &result {
                warn!(%key, error = %e, "Failed to unload during shutdown");
            }
            results.push((key, result));
        }
        results
    }
}

/// Run an operation as its own task so the caller cannot cancel it midway.
async fn detached<T, F>(operation: F) -> Result<T, LifecycleError>
where
    F: Future<Output = Result<T, LifecycleError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(operation)
        .await
        .map_err(|e| LifecycleError::Internal(format!("lifecycle task failed: {e}")))?
}

fn sweep_registry(registry: &ProcessRegistry) {
    let previous = registry.records();
    match registry.verify_all() {
        Ok(liveness) => {
            for record in previous {
                if liveness.get(&record.key).copied().unwrap_or(false) {
                    warn!(
                        key = %record.key,
                        pid = record.pid,
                        model_id = %record.model_id,
                        port = record.port,
                        "Recovered engine from a previous run; it is not managed and must be stopped manually"
                    );
                }
            }
        }
        Err(e) => warn!(error = %e, "Failed to sweep process registry"),
    }
}

impl Inner {
    fn slots(&self) -> MutexGuard<'_, Slots> {
        lock(&self.slots)
    }

    fn model(&self, model_id: &str) -> Result<&ModelConfig, LifecycleError> {
        self.models
            .iter()
            .find(|model| model.id == model_id)
            .ok_or_else(|| LifecycleError::ModelNotFound(model_id.to_string()))
    }

    fn slot(&self, key: &ResourceKey) -> Option<(Arc<EngineInstance>, Option<ProcessStatus>)> {
        self.slots()
            .get(key)
            .map(|slot| (Arc::clone(slot.instance()), slot.phase()))
    }

    fn all_slots(&self) -> Vec<(Arc<EngineInstance>, Option<ProcessStatus>)> {
        self.slots()
            .values()
            .map(|slot| (Arc::clone(slot.instance()), slot.phase()))
            .collect()
    }

    fn ownership(&self) -> DeviceOwnership {
        let mut ownership = DeviceOwnership::new();
        for (key, slot) in self.slots().iter() {
            for device in key.devices() {
                ownership.insert(*device, slot.instance().model().name.clone());
            }
        }
        ownership
    }

    /// Fresh detector output; `None` when detection is disabled.
    async fn detect(&self) -> Option<Vec<GpuHardwareRecord>> {
        if !self.settings.gpu_detection.enabled {
            return None;
        }
        Some(self.probe.detect().await)
    }

    /// Check for conflicts and claim `key` in one critical section.
    fn reserve(&self, instance: &Arc<EngineInstance>) -> Result<Reservation<'_>, LifecycleError> {
        let key = instance.key();
        let mut slots = self.slots();

        if let Some(state) = slots.get(key).and_then(Slot::busy_state) {
            return Err(LifecycleError::Busy {
                resource: key.clone(),
                state,
            });
        }
        if let Some((owner, slot)) = slots.iter().find(|(owner, _)| owner.conflicts_with(key)) {
            return Err(LifecycleError::Conflict {
                devices: key.overlap(owner),
                owner: owner.clone(),
                model_id: slot.instance().model().id.clone(),
            });
        }

        slots.insert(key.clone(), Slot::Loading(Arc::clone(instance)));
        Ok(Reservation {
            slots: &self.slots,
            key: key.clone(),
            committed: false,
        })
    }

    async fn load(
        &self,
        model_id: &str,
        spec: &ResourceSpec,
    ) -> Result<OperationResult, LifecycleError> {
        let key = spec.normalize()?;
        let model = self.model(model_id)?.clone();
        let settings = &self.settings;
        let port = settings.gpu_ports.port_for(&key);

        let supervisor = EngineSupervisor::new(SupervisorConfig::from_settings(settings));
        let instance = Arc::new(EngineInstance::new(
            key.clone(),
            port,
            settings.default_host.clone(),
            model,
            supervisor,
        ));
        let reservation = self.reserve(&instance)?;
        info!(resource = %key, model_id, port, "Loading model");

        let model = instance.model();
        let launch = LaunchSpec {
            model_path: model.path.clone(),
            parameters: model.parameters.to_cli_args(),
            host: settings.default_host.clone(),
            port,
            device_selector: Some(spec.device_selector()),
        };
        let command = command_line(instance.supervisor().config(), &launch);

        let pid = instance
            .supervisor()
            .start(launch)
            .await
            .map_err(|e| LifecycleError::Spawn {
                resource: key.clone(),
                reason: e.to_string(),
            })?;

        if let Err(e) = self.wait_ready(&instance).await {
            warn!(resource = %key, error = %e, "Engine failed to become ready, stopping it");
            if let Err(stop_err) = instance.supervisor().stop(false, Duration::ZERO).await {
                warn!(resource = %key, error = %stop_err, "Failed to stop engine after failed load");
            }
            return Err(e);
        }

        let record = ProcessRecord {
            key: key.clone(),
            pid,
            model_id: model.id.clone(),
            model_name: model.name.clone(),
            model_path: model.path.clone(),
            port,
            command,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.registry.register(record) {
            warn!(resource = %key, error = %e, "Failed to record process in registry");
        }

        if let Some(records) = self.detect().await {
            instance.refresh_memory(&records);
        }
        instance.mark_loaded();
        reservation.commit();
        info!(resource = %key, model_id, pid, port, "Model loaded");

        Ok(OperationResult::ok(format!(
            "Model '{}' loaded on GPU {key} (port {port})",
            model.name
        ))
        .with_model(model_id)
        .with_status(instance.snapshot(None)))
    }

    /// Poll health until ready, the supervisor gives up, or the deadline passes.
    async fn wait_ready(&self, instance: &EngineInstance) -> Result<(), LifecycleError> {
        let timeouts = &self.settings.timeouts;
        let deadline = Instant::now() + timeouts.readiness();
        let supervisor = instance.supervisor();

        loop {
            if supervisor.is_healthy().await {
                return Ok(());
            }

            let status = supervisor.status();
            let unrecoverable = status == ProcessStatus::Error
                || (status == ProcessStatus::Crashed && !supervisor.config().restart_on_crash);
            if unrecoverable {
                return Err(LifecycleError::Crashed {
                    resource: instance.key().clone(),
                    status,
                });
            }

            if Instant::now() >= deadline {
                return Err(LifecycleError::ReadinessTimeout {
                    resource: instance.key().clone(),
                    timeout_secs: timeouts.readiness_secs,
                });
            }
            sleep(timeouts.health_poll_interval()).await;
        }
    }

    async fn unload(&self, spec: &ResourceSpec) -> Result<OperationResult, LifecycleError> {
        let key = spec.normalize()?;

        let instance = {
            let mut slots = self.slots();
            let instance = match slots.get(&key) {
                None => {
                    return Ok(OperationResult::ok(format!("No model loaded on GPU {key}")));
                }
                Some(Slot::Active(instance)) => Arc::clone(instance),
                Some(slot) => {
                    return Err(LifecycleError::Busy {
                        resource: key,
                        state: slot.busy_state().unwrap_or("busy"),
                    });
                }
            };
            slots.insert(key.clone(), Slot::Unloading(Arc::clone(&instance)));
            instance
        };

        let model_id = instance.model().id.clone();
        info!(resource = %key, %model_id, "Unloading model");

        if let Err(e) = instance
            .supervisor()
            .stop(true, self.settings.timeouts.unload_grace())
            .await
        {
            self.slots()
                .insert(key.clone(), Slot::Active(Arc::clone(&instance)));
            return Err(LifecycleError::Stop {
                resource: key,
                reason: e.to_string(),
            });
        }

        if let Err(e) = self.registry.unregister(&key) {
            warn!(resource = %key, error = %e, "Failed to remove process from registry");
        }
        self.slots().remove(&key);
        info!(resource = %key, %model_id, "Model unloaded");

        Ok(OperationResult::ok(format!(
            "Model '{}' unloaded from GPU {key}",
            instance.model().name
        ))
        .with_model(model_id))
    }

    async fn switch(
        &self,
        model_id: &str,
        spec: &ResourceSpec,
    ) -> Result<OperationResult, LifecycleError> {
        let key = spec.normalize()?;
        self.model(model_id)?;

        let previous = match self.slots().get(&key) {
            None => None,
            Some(Slot::Active(instance)) => Some(instance.model().id.clone()),
            Some(slot) => {
                return Err(LifecycleError::Busy {
                    resource: key,
                    state: slot.busy_state().unwrap_or("busy"),
                });
            }
        };

        if previous.as_deref() == Some(model_id) {
            let status = self.slot(&key).map(|(instance, phase)| instance.snapshot(phase));
            let mut result = OperationResult::ok(format!(
                "Model '{model_id}' is already loaded on GPU {key}"
            ))
            .with_model(model_id)
            .with_previous(previous);
            result.status = status;
            return Ok(result);
        }

        if let Some(previous_id) = &previous {
            info!(resource = %key, from = %previous_id, to = model_id, "Switching model");
            self.unload(spec).await?;
            sleep(self.settings.timeouts.switch_pause()).await;
        }

        let mut result = self.load(model_id, spec).await?;
        if let Some(previous_id) = &previous {
            result.message = format!("Switched GPU {key} from '{previous_id}' to '{model_id}'");
        }
        Ok(result.with_previous(previous))
    }
}
