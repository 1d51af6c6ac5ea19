//! Subcommand definitions.

use clap::Subcommand;

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show detected GPUs and which model owns each
    Hardware {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List configured models
    Models {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show engines recorded by previous runs, dropping dead entries
    Registry,

    /// Load a model, follow its output, and unload it on Ctrl-C
    Run {
        /// Model ID from the configuration
        #[arg(short = 'm', long)]
        model: String,

        /// GPU selection: `0`, `1`, `0,1` or `both`
        #[arg(short = 'g', long, default_value = "0")]
        gpu: String,

        /// Engine output lines to print on each poll
        #[arg(long, default_value_t = 20)]
        lines: usize,
    },
}

#[cfg(test)]
mod tests {
    use crate::parser::Cli;
    use clap::Parser;

    use super::*;

    #[test]
    fn run_parses_model_and_gpu() {
        let cli = Cli::parse_from(["llamactl", "run", "--model", "qwen", "--gpu", "0,1"]);
        match cli.command {
            Commands::Run { model, gpu, lines } => {
                assert_eq!(model, "qwen");
                assert_eq!(gpu, "0,1");
                assert_eq!(lines, 20);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn run_requires_model() {
        assert!(Cli::try_parse_from(["llamactl", "run"]).is_err());
    }

    #[test]
    fn hardware_json_flag() {
        let cli = Cli::parse_from(["llamactl", "hardware", "--json"]);
        assert!(matches!(cli.command, Commands::Hardware { json: true }));
    }
}
