//! Run orchestrator.
//!
//! Sequences one run: build, start, forwarding, convergence, reachability,
//! benchmark groups. Whatever happens in between, the platform is stopped
//! before the report is returned.

use std::sync::Arc;

use color_eyre::eyre::{Result, WrapErr};
use log::{error, info, warn};

use crate::analysis::types::{ReachabilitySummary, RunReport};
use crate::bench::harness::run_scenarios;
use crate::config::Config;
use crate::convergence::await_convergence;
use crate::platform::Platform;
use crate::topology::{builder, Topology};

/// Which optional phases to run
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// All-pairs reachability check after convergence
    pub ping: bool,
    /// Benchmark scenario groups
    pub bench: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { ping: true, bench: true }
    }
}

/// Execute a full run against `platform`.
///
/// Only an invalid topology is returned as an error, since nothing has been
/// created at that point. Later failures end up in `RunReport::error`, and a
/// failed teardown in `RunReport::teardown_error`.
pub async fn run(config: &Config, platform: Arc<dyn Platform>, options: RunOptions) -> Result<RunReport> {
    let topology = config.topology().wrap_err("Invalid topology")?;
    let mut report = RunReport::new(topology.name());

    if let Err(e) = execute(config, &topology, platform.clone(), options, &mut report).await {
        error!("Run aborted: {:#}", e);
        report.error = Some(format!("{:#}", e));
    }

    info!("Stopping network");
    if let Err(e) = platform.stop().await {
        warn!("Teardown failed: {}", e);
        report.teardown_error = Some(e.to_string());
    }

    report.grand_total_mbps = report.scenarios.grand_total_mbps();
    Ok(report)
}

async fn execute(
    config: &Config,
    topology: &Topology,
    platform: Arc<dyn Platform>,
    options: RunOptions,
    report: &mut RunReport,
) -> Result<()> {
    builder::build(topology, platform.as_ref())
        .await
        .wrap_err_with(|| format!("Failed to build topology '{}'", topology.name()))?;
    builder::start(platform.as_ref()).await?;
    builder::configure_forwarding(topology, platform.as_ref()).await?;

    let outcome = await_convergence(topology, platform.as_ref(), &config.convergence.policy())
        .await
        .wrap_err("Reachability probe failed during convergence")?;
    info!("Convergence: {}", outcome);
    report.convergence = Some(outcome);

    if options.ping {
        info!("Testing reachability between {} hosts", topology.hosts().len());
        let matrix = platform.ping_all().await.wrap_err("Reachability check failed")?;
        info!("{}", matrix.summary());
        if !matrix.all_reachable() {
            warn!("Unreachable pairs: {:?}", matrix.unreachable_pairs());
        }
        report.reachability = Some(ReachabilitySummary::from(&matrix));
    }

    if options.bench {
        let scenarios = config.scenarios();
        if scenarios.is_empty() {
            info!("No benchmark scenarios for '{}'", topology.name());
        }
        run_scenarios(platform, topology, &scenarios, &config.harness, &mut report.scenarios)
            .await
            .wrap_err("Benchmark scenario rejected")?;
    }
    Ok(())
}
