//! GPU hardware records and their derived status.
//!
//! [`GpuHardwareRecord`] is raw detector output. [`classify`] combines a
//! record with the manager's [`DeviceOwnership`] to produce the
//! [`GpuStatus`] shown to callers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Index used for the synthetic CPU record returned when no GPU is found.
pub const CPU_DEVICE_INDEX: i32 = -1;

/// Default "occupied" threshold in MiB.
pub const DEFAULT_MEMORY_THRESHOLD_MIB: u64 = 30;

/// Display name for devices used by processes this manager does not own.
pub const OCCUPIED_BY_OTHERS_LABEL: &str = "Occupied by someone else";

/// One row of the monitoring tool's process table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuProcessInfo {
    pub gpu_index: u32,
    pub pid: u32,
    pub process_name: String,
    pub used_memory_mib: u64,
}

/// Memory and process state of one device at detection time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuHardwareRecord {
    /// Device index, or [`CPU_DEVICE_INDEX`] for the CPU fallback.
    pub index: i32,
    pub memory_used_mib: u64,
    pub memory_total_mib: u64,
    #[serde(default)]
    pub processes: Vec<GpuProcessInfo>,
}

impl GpuHardwareRecord {
    /// The record reported when detection fails or finds no devices.
    pub const fn cpu_fallback() -> Self {
        Self {
            index: CPU_DEVICE_INDEX,
            memory_used_mib: 0,
            memory_total_mib: 0,
            processes: Vec::new(),
        }
    }

    pub const fn is_cpu(&self) -> bool {
        self.index < 0
    }

    /// Device index as unsigned, `None` for the CPU record.
    pub fn device_index(&self) -> Option<u32> {
        u32::try_from(self.index).ok()
    }
}

/// Derived state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuState {
    Idle,
    ModelLoaded,
    OccupiedByOthers,
}

/// Device state as presented to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuStatus {
    pub index: i32,
    pub state: GpuState,
    pub model_name: Option<String>,
    pub process_info: Option<Vec<GpuProcessInfo>>,
    pub select_enabled: bool,
    pub memory_used: u64,
    pub memory_total: u64,
}

/// Device index → display name of the model the manager runs on it.
pub type DeviceOwnership = BTreeMap<u32, String>;

/// Classify a device.
///
/// A device is occupied when `memory_used_mib > threshold_mib` (strictly
/// greater). An occupied device the manager owns is `ModelLoaded`; one it
/// does not own is `OccupiedByOthers` and cannot be selected. Everything
/// else is `Idle`, including owned devices whose memory has not risen yet.
pub fn classify(
    record: &GpuHardwareRecord,
    ownership: &DeviceOwnership,
    threshold_mib: u64,
) -> GpuStatus {
    let owner = record.device_index().and_then(|index| ownership.get(&index));
    let occupied = !record.is_cpu() && record.memory_used_mib > threshold_mib;

    let (state, model_name, process_info, select_enabled) = match (occupied, owner) {
        (true, Some(name)) => (GpuState::ModelLoaded, Some(name.clone()), None, true),
        (true, None) => {
            let processes = (!record.processes.is_empty()).then(|| record.processes.clone());
            (
                GpuState::OccupiedByOthers,
                Some(OCCUPIED_BY_OTHERS_LABEL.to_string()),
                processes,
                false,
            )
        }
        (false, owner) => (GpuState::Idle, owner.cloned(), None, true),
    };

    GpuStatus {
        index: record.index,
        state,
        model_name,
        process_info,
        select_enabled,
        memory_used: record.memory_used_mib,
        memory_total: record.memory_total_mib,
    }
}

/// Merged detector and ownership view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareSnapshot {
    pub devices: Vec<GpuStatus>,
    /// Number of real GPUs; the CPU fallback is not counted.
    pub device_count: usize,
    pub detection_enabled: bool,
    pub mock_mode: bool,
}

impl HardwareSnapshot {
    pub fn from_records(
        records: &[GpuHardwareRecord],
        ownership: &DeviceOwnership,
        threshold_mib: u64,
        detection_enabled: bool,
        mock_mode: bool,
    ) -> Self {
        let devices: Vec<GpuStatus> = records
            .iter()
            .map(|record| classify(record, ownership, threshold_mib))
            .collect();
        let device_count = devices.iter().filter(|status| status.index >= 0).count();
        Self {
            devices,
            device_count,
            detection_enabled,
            mock_mode,
        }
    }

    pub fn device(&self, index: i32) -> Option<&GpuStatus> {
        self.devices.iter().find(|status| status.index == index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: i32, used: u64) -> GpuHardwareRecord {
        GpuHardwareRecord {
            index,
            memory_used_mib: used,
            memory_total_mib: 24_576,
            processes: vec![GpuProcessInfo {
                gpu_index: 0,
                pid: 4242,
                process_name: "python".into(),
                used_memory_mib: used,
            }],
        }
    }

    fn owned(index: u32, name: &str) -> DeviceOwnership {
        DeviceOwnership::from([(index, name.to_string())])
    }

    #[test]
    fn threshold_is_strict() {
        let t = DEFAULT_MEMORY_THRESHOLD_MIB;
        let at = classify(&record(0, t), &owned(0, "Qwen"), t);
        assert_eq!(at.state, GpuState::Idle);
        assert_eq!(at.model_name.as_deref(), Some("Qwen"));

        let above = classify(&record(0, t + 1), &owned(0, "Qwen"), t);
        assert_eq!(above.state, GpuState::ModelLoaded);
        assert!(above.select_enabled);
    }

    #[test]
    fn unowned_busy_device_is_occupied_by_others() {
        let t = DEFAULT_MEMORY_THRESHOLD_MIB;
        let status = classify(&record(0, t + 1), &DeviceOwnership::new(), t);
        assert_eq!(status.state, GpuState::OccupiedByOthers);
        assert!(!status.select_enabled);
        assert_eq!(status.model_name.as_deref(), Some(OCCUPIED_BY_OTHERS_LABEL));
        assert_eq!(status.process_info.map(|p| p.len()), Some(1));
    }

    #[test]
    fn ownership_of_other_device_does_not_count() {
        let status = classify(&record(1, 5000), &owned(0, "Qwen"), 30);
        assert_eq!(status.state, GpuState::OccupiedByOthers);
    }

    #[test]
    fn cpu_record_is_always_idle() {
        let status = classify(&GpuHardwareRecord::cpu_fallback(), &DeviceOwnership::new(), 0);
        assert_eq!(status.state, GpuState::Idle);
        assert_eq!(status.index, CPU_DEVICE_INDEX);
    }

    #[test]
    fn snapshot_excludes_cpu_from_count() {
        let cpu = HardwareSnapshot::from_records(
            &[GpuHardwareRecord::cpu_fallback()],
            &DeviceOwnership::new(),
            30,
            true,
            false,
        );
        assert_eq!(cpu.device_count, 0);

        let gpus = HardwareSnapshot::from_records(
            &[record(0, 0), record(1, 0)],
            &DeviceOwnership::new(),
            30,
            true,
            true,
        );
        assert_eq!(gpus.device_count, 2);
        assert!(gpus.mock_mode);
        assert_eq!(gpus.device(1).map(|d| d.state), Some(GpuState::Idle));
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&GpuState::OccupiedByOthers).unwrap();
        assert_eq!(json, "\"occupied_by_others\"");
    }
}
