//! Concurrent benchmark harness.
//!
//! A batch runs in four phases: start one generator server per distinct
//! (server, transport), launch one task per flow, join every task, then stop
//! the servers. Each task hands its result back through its own join handle,
//! so results need no shared lock and come out in flow order. Dropping a
//! batch part way through aborts its clients and stops its servers.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::generator::{client_argv, server_argv};
use super::types::{BenchmarkResult, FlowSpec, FlowState, FlowStatus, HarnessSettings, ScenarioSpec, Transport};
use crate::analysis::aggregate::aggregate;
use crate::analysis::throughput::parse_throughput;
use crate::analysis::types::{AggregateReport, ScenarioReport};
use crate::platform::{Platform, PlatformError};
use crate::topology::Topology;

/// Reasons a batch is rejected before anything is launched
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HarnessError {
    #[error("Flow {0} uses the same host as client and server")]
    SameEndpoints(String),

    #[error("Flow {flow} references '{host}', which is not a host of the topology")]
    UnknownHost { flow: String, host: String },

    #[error("Host '{host}' is a client in {client_flow} and a server in {server_flow}")]
    RoleConflict {
        host: String,
        client_flow: String,
        server_flow: String,
    },

    #[error("Scenario '{0}' has no flows")]
    EmptyBatch(String),
}

fn advance(flow: &str, state: &mut FlowState, next: FlowState) {
    debug!("{}: {:?} -> {:?}", flow, state, next);
    *state = next;
}

/// Client task slots, one per flow. Dropping the slots aborts every task
/// still running, which drops its child process with it.
struct ClientTasks(Vec<Option<JoinHandle<BenchmarkResult>>>);

impl Drop for ClientTasks {
    fn drop(&mut self) {
        for handle in self.0.iter().flatten() {
            handle.abort();
        }
    }
}

/// Hosts running generator servers for the current batch. If the batch is
/// dropped before its servers are stopped, the stop is handed to a new task.
struct ServerHosts {
    platform: Arc<dyn Platform>,
    hosts: Vec<String>,
}

impl ServerHosts {
    fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            hosts: Vec::new(),
        }
    }

    fn add(&mut self, host: &str) {
        if !self.hosts.iter().any(|h| h == host) {
            self.hosts.push(host.to_string());
        }
    }

    async fn stop_all(mut self) {
        for host in std::mem::take(&mut self.hosts) {
            if let Err(e) = self.platform.kill_daemons(&host).await {
                warn!("Failed to stop servers on {}: {}", host, e);
            }
        }
    }
}

impl Drop for ServerHosts {
    fn drop(&mut self) {
        if self.hosts.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime left to stop servers on {:?}", self.hosts);
            return;
        };
        warn!("Batch cancelled, stopping servers on {:?}", self.hosts);
        let platform = self.platform.clone();
        let hosts = std::mem::take(&mut self.hosts);
        runtime.spawn(async move {
            for host in hosts {
                if let Err(e) = platform.kill_daemons(&host).await {
                    warn!("Failed to stop servers on {}: {}", host, e);
                }
            }
        });
    }
}

/// Check a batch without touching the platform.
///
/// Role conflicts are errors when `strict_roles` is set and warnings
/// otherwise.
pub fn preflight(topology: &Topology, group: &str, flows: &[FlowSpec], strict_roles: bool) -> Result<(), HarnessError> {
    if flows.is_empty() {
        return Err(HarnessError::EmptyBatch(group.to_string()));
    }

    for flow in flows {
        if flow.client == flow.server {
            return Err(HarnessError::SameEndpoints(flow.id()));
        }
        for host in [&flow.client, &flow.server] {
            if !topology.is_host(host) {
                return Err(HarnessError::UnknownHost {
                    flow: flow.id(),
                    host: host.clone(),
                });
            }
        }
    }

    let servers: HashMap<&str, &FlowSpec> = flows.iter().map(|f| (f.server.as_str(), f)).collect();
    for flow in flows {
        if let Some(server_flow) = servers.get(flow.client.as_str()) {
            let conflict = HarnessError::RoleConflict {
                host: flow.client.clone(),
                client_flow: flow.id(),
                server_flow: server_flow.id(),
            };
            if strict_roles {
                return Err(conflict);
            }
            warn!("{}", conflict);
        }
    }
    Ok(())
}

/// Run one batch of flows concurrently and aggregate the results.
///
/// Every flow appears in the report. Launch failures, timeouts and non-zero
/// exits become `Failed`; unparseable output becomes `Unknown`.
pub async fn run_flows(
    platform: Arc<dyn Platform>,
    topology: &Topology,
    group: &str,
    flows: &[FlowSpec],
    duration: Duration,
    settings: &HarnessSettings,
) -> Result<AggregateReport, HarnessError> {
    preflight(topology, group, flows, settings.strict_roles)?;
    info!("Running '{}': {} flows for {}s", group, flows.len(), duration.as_secs_f64());

    let mut states = vec![FlowState::NotStarted; flows.len()];

    // Phase 1: servers
    let mut servers = ServerHosts::new(platform.clone());
    let mut launch_failures: HashMap<(&str, Transport), String> = HashMap::new();
    let mut seen: HashSet<(&str, Transport)> = HashSet::new();
    for flow in flows {
        let key = (flow.server.as_str(), flow.transport);
        if !seen.insert(key) {
            continue;
        }
        servers.add(&flow.server);
        let argv = server_argv(&settings.generator, flow.transport);
        info!("Starting {} server on {}", flow.transport.as_str(), flow.server);
        if let Err(e) = platform.spawn_daemon(&flow.server, &argv).await {
            warn!("Server on {} failed to start: {}", flow.server, e);
            launch_failures.insert(key, e.to_string());
        }
    }
    if launch_failures.len() < seen.len() {
        tokio::time::sleep(settings.server_settle).await;
    }

    let mut addresses: HashMap<&str, Option<Ipv4Addr>> = HashMap::new();
    for flow in flows {
        if !addresses.contains_key(flow.server.as_str()) {
            addresses.insert(flow.server.as_str(), platform.ip_of(&flow.server).await);
        }
    }

    // Phase 2: clients, launched back to back
    let mut tasks = ClientTasks(Vec::with_capacity(flows.len()));
    let mut results: Vec<Option<BenchmarkResult>> = vec![None; flows.len()];
    for (i, flow) in flows.iter().enumerate() {
        let id = flow.id();
        if let Some(reason) = launch_failures.get(&(flow.server.as_str(), flow.transport)) {
            advance(&id, &mut states[i], FlowState::Failed);
            results[i] = Some(BenchmarkResult::failed(
                flow,
                format!("server launch failed: {}", reason),
                String::new(),
                Duration::ZERO,
            ));
            tasks.0.push(None);
            continue;
        }
        advance(&id, &mut states[i], FlowState::ServerUp);

        let Some(server_ip) = addresses.get(flow.server.as_str()).copied().flatten() else {
            advance(&id, &mut states[i], FlowState::Failed);
            results[i] = Some(BenchmarkResult::failed(
                flow,
                format!("no address for {}", flow.server),
                String::new(),
                Duration::ZERO,
            ));
            tasks.0.push(None);
            continue;
        };

        let flow_duration = flow.duration.unwrap_or(duration);
        let argv = client_argv(
            &settings.generator,
            server_ip,
            flow_duration,
            flow.transport,
            settings.udp_bandwidth.as_deref(),
        );
        let limit = flow_duration + settings.timeout_margin;
        advance(&id, &mut states[i], FlowState::ClientRunning);
        tasks.0.push(Some(tokio::spawn(run_client(platform.clone(), flow.clone(), argv, limit))));
    }

    // Phase 3: barrier
    for (i, slot) in tasks.0.iter_mut().enumerate() {
        let Some(handle) = slot.as_mut() else {
            continue;
        };
        let flow = &flows[i];
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => BenchmarkResult::failed(flow, format!("task aborted: {}", e), String::new(), Duration::ZERO),
        };
        let next = match result.status {
            FlowStatus::Failed { .. } => FlowState::Failed,
            _ => FlowState::Completed,
        };
        advance(&flow.id(), &mut states[i], next);
        results[i] = Some(result);
    }
    drop(tasks);

    // Phase 4: servers down, whatever happened above
    servers.stop_all().await;

    let results: Vec<BenchmarkResult> = results
        .into_iter()
        .zip(flows)
        .map(|(r, flow)| {
            r.unwrap_or_else(|| BenchmarkResult::failed(flow, "no result recorded", String::new(), Duration::ZERO))
        })
        .collect();
    let report = aggregate(group, duration, results);
    info!(
        "'{}' finished: {:.1} Mbits/sec total ({} completed, {} unknown, {} failed)",
        group, report.total_mbps, report.completed, report.unknown, report.failed
    );
    Ok(report)
}

async fn run_client(platform: Arc<dyn Platform>, flow: FlowSpec, argv: Vec<String>, limit: Duration) -> BenchmarkResult {
    let id = flow.id();
    debug!("{}: client {}", id, argv.join(" "));
    let started = Instant::now();

    match platform.exec(&flow.client, &argv, limit).await {
        Ok(output) if output.success() => {
            let raw = output.combined();
            match parse_throughput(&raw) {
                Ok(mbps) => BenchmarkResult::completed(&flow, mbps, raw, started.elapsed()),
                Err(e) => {
                    warn!("{}: {}", id, e);
                    BenchmarkResult::unknown(&flow, raw, started.elapsed())
                }
            }
        }
        Ok(output) => {
            let reason = match output.status {
                Some(code) => format!("exit status {}: {}", code, output.stderr.trim()),
                None => "killed by signal".to_string(),
            };
            warn!("{}: {}", id, reason);
            BenchmarkResult::failed(&flow, reason, output.combined(), started.elapsed())
        }
        Err(PlatformError::Timeout { limit, .. }) => {
            warn!("{}: no result after {}s, killed", id, limit.as_secs_f64());
            BenchmarkResult::failed(
                &flow,
                format!("timed out after {}s", limit.as_secs_f64()),
                String::new(),
                started.elapsed(),
            )
        }
        Err(e) => {
            warn!("{}: {}", id, e);
            BenchmarkResult::failed(&flow, e.to_string(), String::new(), started.elapsed())
        }
    }
}

/// Run scenario groups one after another, appending each group's report.
///
/// A rejected group stops the sequence; groups already run stay in `report`.
pub async fn run_scenarios(
    platform: Arc<dyn Platform>,
    topology: &Topology,
    scenarios: &[ScenarioSpec],
    settings: &HarnessSettings,
    report: &mut ScenarioReport,
) -> Result<(), HarnessError> {
    for scenario in scenarios {
        let group = run_flows(
            platform.clone(),
            topology,
            &scenario.name,
            &scenario.flows,
            scenario.duration,
            settings,
        )
        .await?;
        report.groups.push(group);
    }
    Ok(())
}
