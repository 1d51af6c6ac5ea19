//! `llamactl registry`: engines left behind by previous runs.
//!
//! Building the manager already swept dead entries, so whatever remains
//! is still alive and not managed by this process.

use anyhow::Result;

use crate::bootstrap::CliContext;
use crate::presentation::print_separator;

pub fn execute(ctx: &CliContext) -> Result<()> {
    let registry = ctx.manager().registry();
    let records = registry.records();

    if records.is_empty() {
        println!("No recorded engines ({})", registry.path().display());
        return Ok(());
    }

    println!("{} engine(s) still running from a previous session:\n", records.len());
    println!(
        "{:<8} {:<8} {:<6} {:<20} {:<25} Command",
        "GPU", "PID", "Port", "Model", "Started"
    );
    print_separator(100);

    for record in records {
        println!(
            "{:<8} {:<8} {:<6} {:<20} {:<25} {}",
            record.key.to_string(),
            record.pid,
            record.port,
            record.model_id,
            record.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            record.command.join(" ")
        );
    }
    println!("\nThese processes are not managed by llamactl; stop them manually if unwanted.");

    Ok(())
}
