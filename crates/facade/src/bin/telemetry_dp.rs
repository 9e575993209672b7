//! Command-line runner for telemetry privacy sweeps.
//!
//! Usage:
//!   telemetry-dp run --config <toml> --baseline <dir> [--out <dir>]
//!   telemetry-dp sweep --config <toml> --baseline <dir> [--out <dir>] [--produce]
//!   telemetry-dp produce --config <toml> --baseline <dir> [--epsilon <eps>] [--out <dir>]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use telemetry_dp::{
    read_baselines, write_evaluated, write_json, write_sweep, Baselines, Epsilon, Evaluated,
    Pipeline, PipelineConfig, RunOutput,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "telemetry-dp")]
#[command(version)]
#[command(about = "Differential-privacy sweeps over telemetry aggregate queries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run in the `mode` named by the configuration
    Run {
        /// Pipeline configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Directory holding `<query-id>.json` baselines
        #[arg(short, long)]
        baseline: PathBuf,

        /// Output directory (summary on stdout if not specified)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Noise every query across the epsilon grid, evaluate and select budgets
    Sweep {
        /// Pipeline configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Directory holding `<query-id>.json` baselines
        #[arg(short, long)]
        baseline: PathBuf,

        /// Output directory (summary on stdout if not specified)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Follow the sweep with a production pass at the selected budgets
        #[arg(long)]
        produce: bool,
    },

    /// Noise every query once at a single epsilon
    Produce {
        /// Pipeline configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Directory holding `<query-id>.json` baselines
        #[arg(short, long)]
        baseline: PathBuf,

        /// Epsilon to use; defaults to `epsilon` from the configuration
        #[arg(short, long)]
        epsilon: Option<Epsilon>,

        /// Output directory (summary on stdout if not specified)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn summarize(evaluated: &Evaluated) -> serde_json::Value {
    serde_json::json!({
        "noised": evaluated.noised.len(),
        "records": evaluated.records,
        "failures": evaluated.failures,
    })
}

fn load(config: &Path, baseline: &Path) -> Result<(Pipeline, Baselines)> {
    let config = PipelineConfig::from_path(config)
        .with_context(|| format!("loading {}", config.display()))?;
    let baselines = read_baselines(baseline, &config)?;
    Ok((Pipeline::new(config)?, baselines))
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "telemetry_dp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            baseline,
            out,
        } => {
            let (pipeline, baselines) = load(&config, &baseline)?;
            let output = pipeline.run(&baselines)?;
            match (&output, out) {
                (RunOutput::Sweep(report), Some(dir)) => {
                    write_sweep(&dir, report)?;
                    info!(out = %dir.display(), "wrote sweep outputs");
                }
                (RunOutput::SingleEpsilon(evaluated), Some(dir)) => {
                    write_evaluated(&dir, evaluated)?;
                    info!(out = %dir.display(), "wrote single-epsilon outputs");
                }
                (RunOutput::Sweep(report), None) => {
                    let summary = serde_json::json!({
                        "selected": report.selected,
                        "failures": report.evaluated.failures,
                    });
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                }
                (RunOutput::SingleEpsilon(evaluated), None) => {
                    println!("{}", serde_json::to_string_pretty(&summarize(evaluated))?)
                }
            }
        }
        Command::Sweep {
            config,
            baseline,
            out,
            produce,
        } => {
            let (pipeline, baselines) = load(&config, &baseline)?;
            let report = pipeline.sweep(&baselines)?;
            info!(
                records = report.evaluated.records.len(),
                failures = report.evaluated.failures.len(),
                "sweep complete"
            );

            let production = if produce {
                Some(pipeline.produce_selected(&baselines, &report.selected)?)
            } else {
                None
            };

            match out {
                Some(dir) => {
                    write_sweep(&dir, &report)?;
                    if let Some(p) = &production {
                        write_evaluated(&dir.join("production"), p)?;
                    }
                    info!(out = %dir.display(), "wrote outputs");
                }
                None => {
                    let summary = serde_json::json!({
                        "selected": report.selected,
                        "failures": report.evaluated.failures,
                        "production": production.as_ref().map(summarize),
                    });
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                }
            }
        }
        Command::Produce {
            config,
            baseline,
            epsilon,
            out,
        } => {
            let (pipeline, baselines) = load(&config, &baseline)?;
            let epsilon = epsilon
                .or(pipeline.config().epsilon)
                .context("no epsilon given on the command line or in the configuration")?;
            let evaluated = pipeline.produce(&baselines, epsilon)?;

            match out {
                Some(dir) => {
                    write_evaluated(&dir, &evaluated)?;
                    write_json(&dir.join("epsilon.json"), &epsilon)?;
                    info!(out = %dir.display(), %epsilon, "wrote outputs");
                }
                None => println!("{}", serde_json::to_string_pretty(&summarize(&evaluated))?),
            }
        }
    }
    Ok(())
}
