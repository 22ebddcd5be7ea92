//! dirconform - directory access-policy conformance runner
//!
//! Runs the scenario catalog against a live directory, or against the
//! in-process reference directory with `selftest`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

use commands::OutputFormat;

/// dirconform - directory access-policy conformance runner
#[derive(Parser, Debug)]
#[command(name = "dirconform")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file (defaults apply when absent)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run scenarios against the configured endpoint
    Run {
        #[command(flatten)]
        selection: Selection,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Run scenarios against the built-in reference directory
    Selftest {
        #[command(flatten)]
        selection: Selection,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List the scenario catalog
    #[command(alias = "ls")]
    List {
        #[command(flatten)]
        selection: Selection,
    },

    /// Print the effective configuration
    ShowConfig,
}

/// Scenario selectors shared by the subcommands.
#[derive(clap::Args, Debug, Default)]
struct Selection {
    /// Keep scenarios of this suite (repeatable)
    #[arg(long = "suite", value_name = "SUITE")]
    suites: Vec<String>,

    /// Keep this scenario, as `name` or `suite/name` (repeatable)
    #[arg(long = "scenario", value_name = "NAME")]
    scenarios: Vec<String>,
}

impl Selection {
    fn selectors(&self) -> Vec<String> {
        self.suites.iter().chain(&self.scenarios).cloned().collect()
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let exit_code = match cli.command {
        Commands::Run { selection, format } => {
            commands::run::run_live(cli.config.as_deref(), &selection.selectors(), format)
        },
        Commands::Selftest { selection, format } => {
            commands::run::run_selftest(cli.config.as_deref(), &selection.selectors(), format)
        },
        Commands::List { selection } => {
            commands::list::run_list(cli.config.as_deref(), &selection.selectors())
        },
        Commands::ShowConfig => commands::list::run_show_config(cli.config.as_deref()),
    };
    std::process::exit(i32::from(exit_code));
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_selectors() {
        let cli = Cli::try_parse_from([
            "dirconform",
            "--config",
            "conform.toml",
            "run",
            "--suite",
            "search",
            "--scenario",
            "create/create-person",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("conform.toml")));
        assert_eq!(cli.log_level, "warn");
        match cli.command {
            Commands::Run { selection, format } => {
                assert_eq!(selection.selectors(), ["search", "create/create-person"]);
                assert_eq!(format, OutputFormat::Json);
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["dirconform", "run", "--format", "xml"]).is_err());
    }

    #[test]
    fn test_list_alias() {
        let cli = Cli::try_parse_from(["dirconform", "ls"]).unwrap();
        assert!(matches!(cli.command, Commands::List { .. }));
    }
}
