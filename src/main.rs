//! Daily Report - command line entry point
//!
//! Runs the daily report pipeline from a JSON configuration.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daily_report::{OutputFormat, PipelineConfig, PipelineError};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "daily-report",
    version,
    about = "Clean, aggregate and report a daily CSV export"
)]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the report and write it
    Run {
        #[command(flatten)]
        target: Target,

        /// Second destination tried when writing to the output fails
        #[arg(long)]
        fallback_output: Option<PathBuf>,
    },
    /// Build the report and print its narrative, without writing
    Check {
        #[command(flatten)]
        target: Target,
    },
}

#[derive(clap::Args, Debug)]
struct Target {
    /// JSON configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Input file, overrides the configuration
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output path, overrides the configuration
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format; inferred from the output extension when omitted
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,
}

impl Target {
    fn load(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::from_json_file(&self.config)
            .with_context(|| format!("loading configuration {}", self.config.display()))?;
        if let Some(input) = &self.input {
            config.input = input.clone();
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if self.format.is_some() {
            config.format = self.format;
        }
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run {
            target,
            fallback_output,
        } => run(&target, fallback_output.as_deref()),
        Command::Check { target } => check(&target),
    }
}

fn run(target: &Target, fallback: Option<&Path>) -> Result<()> {
    let config = target.load()?;

    match daily_report::run(&config) {
        Ok(summary) => {
            info!(
                output = %summary.output.display(),
                sections = summary.artifact.sections.len(),
                "done"
            );
            println!("{}", summary.output.display());
            Ok(())
        }
        Err(err) => match (err, fallback) {
            (PipelineError::Write { source, artifact }, Some(fallback)) => {
                warn!(error = %source, fallback = %fallback.display(), "retrying at fallback output");
                let format = config
                    .format
                    .unwrap_or_else(|| OutputFormat::infer(fallback));
                let written = artifact
                    .write(fallback, format)
                    .context("writing report to fallback output")?;
                println!("{}", written.display());
                Ok(())
            }
            (err, _) => {
                error!(stage = err.stage(), "run failed");
                Err(err).context("running daily report")
            }
        },
    }
}

fn check(target: &Target) -> Result<()> {
    let config = target.load()?;
    let report = daily_report::build_report(&config, chrono::Utc::now())
        .with_context(|| format!("checking {}", config.input.display()))?;
    for line in &report.narrative {
        println!("{}", line);
    }
    println!(
        "{} section(s) would be written to {} as {:?}",
        report.sections.len(),
        config.output.display(),
        config.output_format()
    );
    Ok(())
}
