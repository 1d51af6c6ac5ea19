//! Line-oriented parser for `nvidia-smi` table output.
//!
//! No column widths are assumed. A device header is recognised by its
//! leading index and the persistence/driver-model column, the first
//! `<used>MiB / <total>MiB` token after it is that device's memory, and
//! rows after the `Processes:` banner are tied to devices only through
//! their leading GPU index.

use std::sync::LazyLock;

use llamactl_core::{GpuHardwareRecord, GpuProcessInfo};
use regex::Regex;
use tracing::debug;

/// `|   0  NVIDIA A40      TCC  |` or `|   1  NVIDIA GeForce RTX 3090   Off |`
static DEVICE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\|\s+(\d+)\s+(.+?)\s+(TCC|WDDM|On|Off)\b").expect("valid device header regex")
});

/// `1234MiB / 24576MiB`
static MEMORY_USAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)MiB\s*/\s*(\d+)MiB").expect("valid memory regex")
});

/// `|    0   N/A  N/A    4242    C   python3    3000MiB |` (GI/CI columns optional)
static PROCESS_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\|\s+(\d+)\s+(?:(?:[-\d]+|N/A)\s+(?:[-\d]+|N/A)\s+)?(\d+)\s+(\S+)\s+(.+?)\s+(\d+)MiB",
    )
    .expect("valid process row regex")
});

const PROCESSES_BANNER: &str = "Processes:";

/// Parse device records, with their process rows attached.
///
/// Returns an empty list when no device header is found; the caller turns
/// that into the CPU fallback.
pub fn parse_nvidia_smi(output: &str) -> Vec<GpuHardwareRecord> {
    let mut records = parse_devices(output);
    for process in parse_processes(output) {
        let owner = records
            .iter_mut()
            .find(|record| record.device_index() == Some(process.gpu_index));
        match owner {
            Some(record) => record.processes.push(process),
            None => debug!(
                gpu = process.gpu_index,
                pid = process.pid,
                "Process row references unknown GPU, ignoring"
            ),
        }
    }
    records
}

fn parse_devices(output: &str) -> Vec<GpuHardwareRecord> {
    let mut records = Vec::new();
    let mut current: Option<i32> = None;

    for line in output.lines() {
        if line.contains(PROCESSES_BANNER) {
            break;
        }

        if let Some(caps) = DEVICE_HEADER.captures(line)
            && let Ok(index) = caps[1].parse::<i32>()
        {
            current = Some(index);
        }

        let Some(index) = current else { continue };
        if let Some(caps) = MEMORY_USAGE.captures(line) {
            let (Ok(used), Ok(total)) = (caps[1].parse::<u64>(), caps[2].parse::<u64>()) else {
                continue;
            };
            debug!(gpu = index, used, total, "Parsed GPU memory");
            records.push(GpuHardwareRecord {
                index,
                memory_used_mib: used,
                memory_total_mib: total,
                processes: Vec::new(),
            });
            current = None;
        }
    }

    records
}

fn parse_processes(output: &str) -> Vec<GpuProcessInfo> {
    output
        .lines()
        .skip_while(|line| !line.contains(PROCESSES_BANNER))
        .skip(1)
        .filter_map(|line| {
            let caps = PROCESS_ROW.captures(line)?;
            Some(GpuProcessInfo {
                gpu_index: caps[1].parse().ok()?,
                pid: caps[2].parse().ok()?,
                process_name: caps[4].trim().to_string(),
                used_memory_mib: caps[5].parse().ok()?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX_OUTPUT: &str = "\
+-----------------------------------------------------------------------------------------+
| NVIDIA-SMI 550.54.14              Driver Version: 550.54.14      CUDA Version: 12.4     |
|-----------------------------------------+------------------------+----------------------+
| GPU  Name                 Persistence-M | Bus-Id          Disp.A | Volatile Uncorr. ECC |
| Fan  Temp   Perf          Pwr:Usage/Cap |           Memory-Usage | GPU-Util  Compute M. |
|=========================================+========================+======================|
|   0  NVIDIA GeForce RTX 3090        Off |   00000000:01:00.0 Off |                  N/A |
| 30%   35C    P8             20W /  350W |       1MiB /  24576MiB |      0%      Default |
+-----------------------------------------+------------------------+----------------------+
|   1  NVIDIA GeForce RTX 3090        Off |   00000000:02:00.0 Off |                  N/A |
| 45%   61C    P2            180W /  350W |   10342MiB /  24576MiB |     87%      Default |
+-----------------------------------------+------------------------+----------------------+

+-----------------------------------------------------------------------------------------+
| Processes:                                                                              |
|  GPU   GI   CI        PID   Type   Process name                              GPU Memory |
|        ID   ID                                                               Usage      |
|=========================================================================================|
|    1   N/A  N/A      4242      C   /usr/bin/python3                            10336MiB |
+-----------------------------------------------------------------------------------------+
";

    const WINDOWS_OUTPUT: &str = "\
|   0  NVIDIA A40                   TCC   | 00000000:3B:00.0 Off |                    0 |
|  0%   24C    P8              11W / 300W |      1MiB / 46068MiB |      0%      Default |
|   1  NVIDIA A40                   TCC   | 00000000:AF:00.0 Off |                    0 |
|  0%   40C    P0              90W / 300W |    363MiB / 46068MiB |      0%      Default |
| Processes:                                                                            |
|    1      -    -      12345      C   llama-server.exe                           356MiB |
";

    #[test]
    fn parses_linux_table() {
        let records = parse_nvidia_smi(LINUX_OUTPUT);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].index, 0);
        assert_eq!(records[0].memory_used_mib, 1);
        assert_eq!(records[0].memory_total_mib, 24576);
        assert!(records[0].processes.is_empty());

        assert_eq!(records[1].memory_used_mib, 10342);
        let process = &records[1].processes[0];
        assert_eq!(process.pid, 4242);
        assert_eq!(process.process_name, "/usr/bin/python3");
        assert_eq!(process.used_memory_mib, 10336);
    }

    #[test]
    fn parses_tcc_table_with_dash_columns() {
        let records = parse_nvidia_smi(WINDOWS_OUTPUT);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].memory_used_mib, 363);
        assert_eq!(records[1].processes[0].process_name, "llama-server.exe");
        assert_eq!(records[1].processes[0].gpu_index, 1);
    }

    #[test]
    fn parses_rows_without_instance_columns() {
        let output = "\
|   0  Tesla T4            On   | 00000000:00:04.0 Off |                    0 |
| N/A   40C    P0    27W /  70W |   2048MiB / 15360MiB |      0%      Default |
| Processes:                                                                  |
|    0      7777      C   ./llama-server                             2040MiB |
";
        let records = parse_nvidia_smi(output);
        assert_eq!(records[0].processes[0].pid, 7777);
        assert_eq!(records[0].processes[0].process_name, "./llama-server");
    }

    #[test]
    fn garbage_yields_no_devices() {
        assert!(parse_nvidia_smi("").is_empty());
        assert!(parse_nvidia_smi("NVIDIA-SMI has failed because it couldn't communicate").is_empty());
    }
}
