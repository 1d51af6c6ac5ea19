//! `llamactl hardware`: detected GPUs merged with ownership.

use anyhow::Result;
use llamactl_core::GpuState;

use crate::bootstrap::CliContext;
use crate::presentation::{format_mib, or_dash, print_separator, truncate};

pub async fn execute(ctx: &CliContext, json: bool) -> Result<()> {
    let snapshot = ctx.manager().hardware_snapshot().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    if !snapshot.detection_enabled {
        println!("GPU detection is disabled; showing CPU only.");
    } else if snapshot.mock_mode {
        let detection = ctx.manager().detection_config();
        println!("Mock mode: reading {}", detection.mock_data_path.display());
    }
    println!("{} GPU(s) detected\n", snapshot.device_count);

    println!(
        "{:<5} {:<20} {:<24} {:<20} Selectable",
        "GPU", "State", "Model", "Memory"
    );
    print_separator(80);

    for device in &snapshot.devices {
        let label = if device.index < 0 {
            "CPU".to_string()
        } else {
            device.index.to_string()
        };
        let state = match device.state {
            GpuState::Idle => "idle",
            GpuState::ModelLoaded => "model loaded",
            GpuState::OccupiedByOthers => "occupied by others",
        };
        let memory = format!(
            "{} / {}",
            format_mib(device.memory_used),
            format_mib(device.memory_total)
        );
        println!(
            "{:<5} {:<20} {:<24} {:<20} {}",
            label,
            state,
            truncate(&or_dash(device.model_name.as_deref()), 23),
            memory,
            if device.select_enabled { "yes" } else { "no" }
        );

        for process in device.process_info.iter().flatten() {
            println!(
                "      pid {:<8} {:<30} {}",
                process.pid,
                truncate(&process.process_name, 29),
                format_mib(process.used_memory_mib)
            );
        }
    }

    Ok(())
}
