//! `llamactl models`: configured models and where they run.

use anyhow::Result;

use crate::bootstrap::CliContext;
use crate::presentation::{print_separator, truncate};

pub fn execute(ctx: &CliContext, json: bool) -> Result<()> {
    let models = ctx.manager().available_models();

    if json {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }

    if models.is_empty() {
        println!(
            "No models configured. Add them to {}",
            ctx.config_path().display()
        );
        return Ok(());
    }

    println!(
        "{:<20} {:<28} {:<8} {:<8} {:<10} Description",
        "ID", "Name", "Params", "Quant", "Loaded"
    );
    print_separator(100);

    for model in models {
        let loaded = if model.loaded {
            model
                .resources
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            "no".to_string()
        };
        let metadata = &model.metadata;
        println!(
            "{:<20} {:<28} {:<8} {:<8} {:<10} {}",
            truncate(&model.id, 19),
            truncate(&model.name, 27),
            truncate(&metadata.parameter_count, 7),
            truncate(&metadata.quantization, 7),
            loaded,
            truncate(&metadata.description, 40)
        );
    }

    Ok(())
}
