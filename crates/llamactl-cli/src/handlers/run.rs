//! `llamactl run`: load a model, stream its output, unload on Ctrl-C.

use std::time::Duration;

use anyhow::Result;
use llamactl_core::{ProcessStatus, ResourceSpec};
use tokio::time::interval;
use tracing::{info, warn};

use crate::bootstrap::CliContext;
use crate::error::CliError;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lines of `current` that were not already at the end of `seen`.
///
/// Both are tails of the same ring buffer, so the overlap is the longest
/// suffix of `seen` that is also a prefix of `current`.
pub fn fresh_lines<'a>(seen: &[String], current: &'a [String]) -> &'a [String] {
    let max_overlap = seen.len().min(current.len());
    let overlap = (0..=max_overlap)
        .rev()
        .find(|&k| seen[seen.len() - k..] == current[..k])
        .unwrap_or(0);
    &current[overlap..]
}

pub async fn execute(ctx: &CliContext, model: &str, gpu: &str, lines: usize) -> Result<()> {
    let manager = ctx.manager();
    let spec = ResourceSpec::from(gpu);

    let result = manager.load(model, spec.clone()).await.map_err(CliError::from)?;
    println!("{}", result.message);
    if let Some(status) = &result.status {
        println!(
            "Listening on http://{}:{} (pid {})",
            status.host,
            status.port,
            status.pid.map_or_else(|| "?".to_string(), |pid| pid.to_string())
        );
    }
    println!("Press Ctrl-C to unload and exit.\n");

    let capacity = manager.settings().log_capacity;
    let mut seen: Vec<String> = Vec::new();
    let mut ticker = interval(POLL_INTERVAL);

    let outcome = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Interrupted, unloading");
                break Ok(());
            }
            _ = ticker.tick() => {
                let current = manager
                    .logs(Some(spec.clone()), capacity)
                    .map_err(CliError::from)?;
                for line in fresh_lines(&seen, &current).iter().rev().take(lines).rev() {
                    println!("{line}");
                }
                seen = current;

                match manager.status(spec.clone()).await.map_err(CliError::from)? {
                    Some(status) if status.status == ProcessStatus::Error => {
                        break Err(CliError::Process(format!(
                            "engine on GPU {} gave up after {} restart(s)",
                            status.resource, status.restart_count
                        )));
                    }
                    Some(status) if status.status == ProcessStatus::Crashed
                        && !manager.settings().restart_on_crash =>
                    {
                        break Err(CliError::Process(format!(
                            "engine on GPU {} crashed",
                            status.resource
                        )));
                    }
                    Some(_) => {}
                    None => break Ok(()),
                }
            }
        }
    };

    let unloaded = manager.unload(spec).await.map_err(CliError::from)?;
    println!("{}", unloaded.message);
    outcome.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn fresh_lines_skips_the_overlap() {
        let seen = lines(&["a", "b", "c"]);
        assert_eq!(fresh_lines(&seen, &lines(&["b", "c", "d"])), lines(&["d"]));
        assert_eq!(fresh_lines(&seen, &lines(&["a", "b", "c"])), Vec::<String>::new());
        assert_eq!(fresh_lines(&[], &lines(&["x"])), lines(&["x"]));
        assert_eq!(fresh_lines(&seen, &lines(&["x", "y"])), lines(&["x", "y"]));
    }
}
