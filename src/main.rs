#![recursion_limit = "256"]

use anyhow::Context;
use clap::Parser;
use fast_style_transfer::{train, MyAutodiffBackend, TrainingConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Train a feed-forward style transfer network.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// JSON training configuration.
    #[arg(short = 'c', long = "conf")]
    conf: PathBuf,

    /// Default log filter, overridden by RUST_LOG.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = TrainingConfig::from_file(&cli.conf)
        .with_context(|| format!("loading configuration {:?}", cli.conf))?;
    info!("training with {:?}", config);

    let device = Default::default();
    let report = train::<MyAutodiffBackend>(config, device).context("training failed")?;
    info!(
        "done: {} steps this run, global step {}, last checkpoint {:?}",
        report.steps_run, report.global_step, report.last_checkpoint
    );

    Ok(())
}
