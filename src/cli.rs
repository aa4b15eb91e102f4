use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::logging::init_logging;
use crate::spec::{InspectionReport, WorkflowSpec};

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Conductor - workflow spec inspection and execution state", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect a workflow spec and print the report as JSON
    Inspect {
        /// Workflow spec file (JSON)
        workflow: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Run the CLI by parsing process arguments
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli)
}

/// Run the CLI with explicit arguments
pub fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli)
}

fn run_cli_with_args(cli: Cli) -> Result<()> {
    let config = Config::builder().config_path(cli.config).build()?;
    init_logging(&config.logging);

    match cli.command {
        Commands::Inspect { workflow } => {
            let report = inspect_file(&workflow)?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if !report.is_empty() {
                eprintln!("{} problem(s) found in {}", report.len(), workflow.display());
                std::process::exit(1);
            }
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/// Load a JSON workflow spec and inspect it
pub fn inspect_file(path: &Path) -> Result<InspectionReport> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow spec {}", path.display()))?;
    let spec = WorkflowSpec::from_json(&text)
        .with_context(|| format!("Failed to parse workflow spec {}", path.display()))?;

    tracing::debug!(path = %path.display(), tasks = spec.tasks.len(), "Inspecting workflow spec");
    Ok(spec.inspect())
}
