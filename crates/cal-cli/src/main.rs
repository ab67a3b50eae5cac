//! calib CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;

use cal_corrections::PipelineConfig;
use cal_table::CorrectionLibrary;

mod run;

#[derive(Parser)]
#[command(name = "calib")]
#[command(about = "calib - object calibrations and event weights for collider analyses")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate event batches and compute their weights
    Run {
        /// Event batch files (JSON), processed independently
        #[arg(long, num_args = 1.., required = true)]
        events: Vec<PathBuf>,

        /// Pipeline configuration (YAML or JSON)
        #[arg(long)]
        config: PathBuf,

        /// Root of the correction-table directory
        #[arg(long)]
        tables: PathBuf,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto).
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// List the corrections of a table file
    Tables {
        /// Correction file (.json or .json.gz)
        #[arg(long)]
        file: PathBuf,
    },

    /// Parse and check a pipeline configuration
    Validate {
        /// Pipeline configuration (YAML or JSON)
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Run { events, config, tables, output, threads } => {
            run::cmd_run(&events, &config, &tables, output.as_ref(), threads)
        }
        Commands::Tables { file } => cmd_tables(&file),
        Commands::Validate { config } => cmd_validate(&config),
    }
}

fn cmd_tables(file: &PathBuf) -> Result<()> {
    let lib = CorrectionLibrary::from_path(file).with_context(|| format!("loading {}", file.display()))?;
    let mut corrections = Vec::with_capacity(lib.len());
    for name in lib.names() {
        if let Some(c) = lib.correction(&name) {
            corrections.push(json!({
                "name": name,
                "kind": "correction",
                "version": c.version(),
                "inputs": c.inputs(),
                "output": c.output(),
            }));
        } else if let Some(c) = lib.compound(&name) {
            corrections.push(json!({
                "name": name,
                "kind": "compound",
                "stages": c.n_stages(),
                "inputs": c.inputs(),
            }));
        }
    }
    tracing::info!(path = %file.display(), n = corrections.len(), "tables listed");
    write_json(None, json!({ "file": file.display().to_string(), "corrections": corrections }))
}

fn cmd_validate(config: &PathBuf) -> Result<()> {
    let cfg = PipelineConfig::from_path(config).with_context(|| format!("invalid config {}", config.display()))?;
    write_json(
        None,
        json!({
            "valid": true,
            "year": cfg.year.as_str(),
            "sample": cfg.sample,
            "shift": cfg.shift.to_string(),
            "with_variations": cfg.with_variations(),
            "stages": cfg.stages,
        }),
    )
}

pub(crate) fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)
            .with_context(|| format!("writing {}", path.display()))?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
