use clap::Parser;
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use env_logger::Env;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fabricbench::analysis::{render_text, write_json_report};
use fabricbench::config::{Config, PlatformKind};
use fabricbench::config_loader::{self, CliOverrides};
use fabricbench::orchestrator::{self, RunOptions};
use fabricbench::platform::{NetnsPlatform, Platform, SimulatedPlatform};
use fabricbench::topology::Shape;

/// Emulate a data-center fabric and benchmark concurrent flows across it
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the run configuration YAML file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Built-in shape to run when no configuration file is given
    #[arg(short, long, value_enum, default_value_t = Shape::Star, conflicts_with = "config")]
    shape: Shape,

    /// Emulation backend (defaults to the config value, then netns)
    #[arg(short, long, value_enum)]
    platform: Option<PlatformKind>,

    /// Override the duration of every scenario (e.g. "10s")
    #[arg(short, long, value_parser = parse_duration)]
    duration: Option<Duration>,

    /// Also write the report as JSON to this file
    #[arg(long)]
    json: Option<PathBuf>,

    /// Build, converge and ping only
    #[arg(long)]
    skip_bench: bool,

    /// Skip the all-pairs reachability check
    #[arg(long)]
    no_ping: bool,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config_loader::load_config(path)?,
        None => Config::for_shape(args.shape),
    };

    // Initialize logging; RUST_LOG wins over the configured level
    let level = config.general.log_level.clone().unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    info!("Starting fabricbench");
    match &args.config {
        Some(path) => info!("Configuration file: {:?}", path),
        None => info!("Built-in shape: {}", args.shape),
    }

    let overrides = CliOverrides {
        duration: args.duration,
        json_report: args.json.clone(),
    };
    config_loader::apply_overrides(&mut config, &overrides)?;

    let kind = args.platform.or(config.general.platform).unwrap_or_default();
    let platform: Arc<dyn Platform> = match kind {
        PlatformKind::Netns => Arc::new(NetnsPlatform::new()),
        PlatformKind::Simulated => Arc::new(SimulatedPlatform::default()),
    };
    info!("Platform: {:?}", kind);

    let options = RunOptions {
        ping: !args.no_ping,
        bench: !args.skip_bench,
    };

    let report = tokio::select! {
        report = orchestrator::run(&config, platform.clone(), options) => report?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, tearing down");
            if let Err(e) = platform.stop().await {
                warn!("Teardown failed: {}", e);
            }
            bail!("Interrupted");
        }
    };

    println!("{}", render_text(&report));

    if let Some(path) = &config.general.json_report {
        write_json_report(&report, path).wrap_err("Failed to save JSON report")?;
    }

    if let Some(e) = &report.teardown_error {
        bail!("Teardown failed: {}", e);
    }
    if let Some(e) = &report.error {
        bail!("Run failed: {}", e);
    }

    info!("Run complete: {:.1} Mbits/sec total", report.grand_total_mbps);
    Ok(())
}
