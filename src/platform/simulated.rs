//! In-process platform for dry runs and tests.
//!
//! Keeps the fabric as a recorded graph, answers reachability from it and
//! fakes the traffic generator. Time comes from `tokio::time`, so tests on a
//! paused clock see convergence delays and flow durations without waiting.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::time::Instant;

use super::command::ExecOutput;
use super::{Platform, PlatformError, ReachabilityMatrix};
use crate::topology::types::{FailMode, LinkParams, SwitchOptions};
use crate::topology::validate::sequential_address;

/// Knobs for the simulated fabric, including fault injection
#[derive(Debug, Clone)]
pub struct SimBehavior {
    /// Throughput every client reports; `None` uses the client's slowest link
    pub throughput_mbps: Option<f64>,
    /// Time after `start` before loop-prevention switches forward anything
    pub stp_convergence: Duration,
    /// Node names, or `a-b` link names, whose creation is rejected
    pub fail_create: HashSet<String>,
    /// Hosts whose generator client exits non-zero
    pub fail_exec: HashSet<String>,
    /// Hosts whose generator client never finishes
    pub hang: HashSet<String>,
    /// Hosts whose generator client prints unparseable output
    pub garble: HashSet<String>,
    /// Hosts where no daemon can be started
    pub fail_daemon: HashSet<String>,
    pub fail_start: bool,
    pub fail_stop: bool,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            throughput_mbps: None,
            stp_convergence: Duration::from_secs(10),
            fail_create: HashSet::new(),
            fail_exec: HashSet::new(),
            hang: HashSet::new(),
            garble: HashSet::new(),
            fail_daemon: HashSet::new(),
            fail_start: false,
            fail_stop: false,
        }
    }
}

impl SimBehavior {
    pub fn with_throughput(mut self, mbps: f64) -> Self {
        self.throughput_mbps = Some(mbps);
        self
    }

    pub fn with_stp_convergence(mut self, delay: Duration) -> Self {
        self.stp_convergence = delay;
        self
    }

    pub fn failing_create(mut self, element: &str) -> Self {
        self.fail_create.insert(element.to_string());
        self
    }

    pub fn failing_exec(mut self, host: &str) -> Self {
        self.fail_exec.insert(host.to_string());
        self
    }

    pub fn hanging(mut self, host: &str) -> Self {
        self.hang.insert(host.to_string());
        self
    }

    pub fn garbled(mut self, host: &str) -> Self {
        self.garble.insert(host.to_string());
        self
    }

    pub fn failing_daemon(mut self, host: &str) -> Self {
        self.fail_daemon.insert(host.to_string());
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }
}

#[derive(Debug, Default)]
struct SimState {
    hosts: Vec<String>,
    switches: HashMap<String, SwitchOptions>,
    forwarding: HashSet<String>,
    links: Vec<(String, String, LinkParams)>,
    started_at: Option<Instant>,
    /// Daemon argv lists per host
    daemons: HashMap<String, Vec<Vec<String>>>,
    calls: Vec<String>,
    active_clients: usize,
    peak_clients: usize,
    stops: usize,
}

impl SimState {
    fn knows(&self, node: &str) -> bool {
        self.hosts.iter().any(|h| h == node) || self.switches.contains_key(node)
    }

    fn address_of(&self, host: &str) -> Option<Ipv4Addr> {
        self.hosts.iter().position(|h| h == host).map(sequential_address)
    }

    fn host_at(&self, addr: Ipv4Addr) -> Option<&str> {
        self.hosts
            .iter()
            .enumerate()
            .find(|(i, _)| sequential_address(*i) == addr)
            .map(|(_, h)| h.as_str())
    }

    /// A switch passes traffic once started, converged (if it runs loop
    /// prevention), and either standalone or given a forwarding rule.
    fn switch_forwards(&self, name: &str, converged: bool) -> bool {
        let Some(options) = self.switches.get(name) else {
            return false;
        };
        if options.loop_prevention_enabled() && !converged {
            return false;
        }
        options.fail_mode == FailMode::Standalone || self.forwarding.contains(name)
    }

    /// Hosts reachable from `src` through forwarding switches only
    fn reachable_from(&self, src: &str, converged: bool) -> HashSet<String> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for (a, b, _) in &self.links {
            adjacency.entry(a.as_str()).or_default().push(b.as_str());
            adjacency.entry(b.as_str()).or_default().push(a.as_str());
        }

        let mut seen: HashSet<&str> = HashSet::from([src]);
        let mut queue = VecDeque::from([src]);
        let mut hosts = HashSet::new();
        while let Some(current) = queue.pop_front() {
            for next in adjacency.get(current).into_iter().flatten() {
                if !seen.insert(*next) {
                    continue;
                }
                if self.switches.contains_key(*next) {
                    if self.switch_forwards(next, converged) {
                        queue.push_back(*next);
                    }
                } else {
                    // Hosts terminate traffic; they never bridge.
                    hosts.insert(next.to_string());
                }
            }
        }
        hosts
    }

    fn bottleneck_of(&self, host: &str) -> Option<f64> {
        self.links
            .iter()
            .filter(|(a, b, _)| a == host || b == host)
            .map(|(_, _, p)| p.bandwidth_mbps)
            .fold(None, |acc: Option<f64>, bw| Some(acc.map_or(bw, |m| m.min(bw))))
    }
}

/// Generator client invocation recognised by the simulator
#[derive(Debug, PartialEq)]
struct ClientRequest {
    target: Ipv4Addr,
    seconds: u64,
    datagram: bool,
}

fn parse_client(argv: &[String]) -> Option<ClientRequest> {
    let value_after = |flag: &str| {
        argv.iter()
            .position(|a| a == flag)
            .and_then(|i| argv.get(i + 1))
    };
    let target = value_after("-c")?.parse().ok()?;
    let seconds = value_after("-t").and_then(|t| t.parse().ok()).unwrap_or(10);
    Some(ClientRequest {
        target,
        seconds,
        datagram: argv.iter().any(|a| a == "-u"),
    })
}

fn is_server(argv: &[String], datagram: bool) -> bool {
    argv.iter().any(|a| a == "-s") && argv.iter().any(|a| a == "-u") == datagram
}

fn iperf_report(client: Ipv4Addr, server: Ipv4Addr, request: &ClientRequest, mbps: f64) -> String {
    let proto = if request.datagram { "UDP" } else { "TCP" };
    let mbytes = mbps * request.seconds as f64 / 8.0;
    format!(
        "------------------------------------------------------------\n\
         Client connecting to {server}, {proto} port 5001\n\
         ------------------------------------------------------------\n\
         [  3] local {client} port 41234 connected with {server} port 5001\n\
         [ ID] Interval       Transfer     Bandwidth\n\
         [  3]  0.0-{secs}.0 sec  {mbytes:.0} MBytes  {mbps:.1} Mbits/sec\n",
        secs = request.seconds,
    )
}

fn refused(reason: &str) -> ExecOutput {
    ExecOutput {
        stdout: String::new(),
        stderr: format!("connect failed: {}", reason),
        status: Some(1),
    }
}

/// Decrements the active client count when a client exec ends, however it ends
struct ClientSlot<'a>(&'a Mutex<SimState>);

impl Drop for ClientSlot<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.lock() {
            state.active_clients = state.active_clients.saturating_sub(1);
        }
    }
}

/// Platform that models the fabric in memory
pub struct SimulatedPlatform {
    behavior: SimBehavior,
    state: Mutex<SimState>,
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new(SimBehavior::default())
    }
}

impl SimulatedPlatform {
    pub fn new(behavior: SimBehavior) -> Self {
        Self {
            behavior,
            state: Mutex::new(SimState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: String) {
        debug!("sim: {}", call);
        self.state().calls.push(call);
    }

    /// Every platform call so far, e.g. `create_link h1 s1`
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of daemons still running across all hosts
    pub fn running_daemons(&self) -> usize {
        self.state().daemons.values().map(Vec::len).sum()
    }

    /// Generator clients running right now
    pub fn active_clients(&self) -> usize {
        self.state().active_clients
    }

    /// Highest number of generator clients that ran at the same time
    pub fn peak_concurrent_clients(&self) -> usize {
        self.state().peak_clients
    }

    pub fn stop_count(&self) -> usize {
        self.state().stops
    }

    fn converged(&self, state: &SimState) -> bool {
        state
            .started_at
            .map_or(false, |t| t.elapsed() >= self.behavior.stp_convergence)
    }

    fn reject_if_faulty(&self, element: &str, operation: &str) -> Result<(), PlatformError> {
        if self.behavior.fail_create.contains(element) {
            return Err(PlatformError::Rejected {
                operation: format!("{} {}", operation, element),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    async fn run_client(&self, node: &str, request: ClientRequest) -> Result<ExecOutput, PlatformError> {
        let (client_addr, server, reachable) = {
            let state = self.state();
            let client_addr = state.address_of(node).ok_or_else(|| PlatformError::UnknownNode(node.to_string()))?;
            let Some(server) = state.host_at(request.target).map(str::to_string) else {
                return Ok(refused("No route to host"));
            };
            let listening = state
                .daemons
                .get(&server)
                .map_or(false, |ds| ds.iter().any(|argv| is_server(argv, request.datagram)));
            if !listening {
                return Ok(refused("Connection refused"));
            }
            let reachable = state.started_at.is_some()
                && state.reachable_from(node, self.converged(&state)).contains(&server);
            (client_addr, server, reachable)
        };
        if !reachable {
            return Ok(refused("No route to host"));
        }

        let _slot = {
            let mut state = self.state();
            state.active_clients += 1;
            state.peak_clients = state.peak_clients.max(state.active_clients);
            ClientSlot(&self.state)
        };

        if self.behavior.hang.contains(node) {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(Duration::from_secs(request.seconds)).await;

        if self.behavior.fail_exec.contains(node) {
            return Ok(ExecOutput {
                stdout: String::new(),
                stderr: "read failed: Connection reset by peer".to_string(),
                status: Some(1),
            });
        }
        if self.behavior.garble.contains(node) {
            return Ok(ExecOutput {
                stdout: "iperf: interrupted, no summary available\n".to_string(),
                stderr: String::new(),
                status: Some(0),
            });
        }

        let mbps = match self.behavior.throughput_mbps {
            Some(mbps) => mbps,
            None => self.state().bottleneck_of(node).unwrap_or(0.0),
        };
        debug!("sim: {} -> {} at {:.1} Mbps", node, server, mbps);
        Ok(ExecOutput {
            stdout: iperf_report(client_addr, request.target, &request, mbps),
            stderr: String::new(),
            status: Some(0),
        })
    }
}

#[async_trait]
impl Platform for SimulatedPlatform {
    async fn create_host(&self, name: &str) -> Result<(), PlatformError> {
        self.record(format!("create_host {}", name));
        self.reject_if_faulty(name, "create host")?;
        let mut state = self.state();
        if state.knows(name) {
            return Err(PlatformError::Rejected {
                operation: format!("create host {}", name),
                reason: "name already in use".to_string(),
            });
        }
        state.hosts.push(name.to_string());
        Ok(())
    }

    async fn create_switch(&self, name: &str, options: &SwitchOptions) -> Result<(), PlatformError> {
        self.record(format!("create_switch {} stp={}", name, options.loop_prevention_enabled()));
        self.reject_if_faulty(name, "create switch")?;
        let mut state = self.state();
        if state.knows(name) {
            return Err(PlatformError::Rejected {
                operation: format!("create switch {}", name),
                reason: "name already in use".to_string(),
            });
        }
        state.switches.insert(name.to_string(), *options);
        Ok(())
    }

    async fn create_link(&self, a: &str, b: &str, params: &LinkParams) -> Result<(), PlatformError> {
        self.record(format!("create_link {} {}", a, b));
        self.reject_if_faulty(&format!("{}-{}", a, b), "create link")?;
        self.reject_if_faulty(&format!("{}-{}", b, a), "create link")?;
        let mut state = self.state();
        for endpoint in [a, b] {
            if !state.knows(endpoint) {
                return Err(PlatformError::UnknownNode(endpoint.to_string()));
            }
        }
        state.links.push((a.to_string(), b.to_string(), *params));
        Ok(())
    }

    async fn set_default_forwarding(&self, switch: &str) -> Result<(), PlatformError> {
        self.record(format!("set_default_forwarding {}", switch));
        let mut state = self.state();
        if !state.switches.contains_key(switch) {
            return Err(PlatformError::UnknownNode(switch.to_string()));
        }
        state.forwarding.insert(switch.to_string());
        Ok(())
    }

    async fn start(&self) -> Result<(), PlatformError> {
        self.record("start".to_string());
        if self.behavior.fail_start {
            return Err(PlatformError::Rejected {
                operation: "start".to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.state().started_at = Some(Instant::now());
        Ok(())
    }

    async fn stop(&self) -> Result<(), PlatformError> {
        self.record("stop".to_string());
        let mut state = self.state();
        state.stops += 1;
        state.daemons.clear();
        state.hosts.clear();
        state.switches.clear();
        state.forwarding.clear();
        state.links.clear();
        state.started_at = None;
        if self.behavior.fail_stop {
            return Err(PlatformError::CommandFailed {
                command: "stop".to_string(),
                status: Some(1),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    async fn ping_all(&self) -> Result<ReachabilityMatrix, PlatformError> {
        self.record("ping_all".to_string());
        let state = self.state();
        let mut matrix = ReachabilityMatrix::new(state.hosts.clone());
        if state.started_at.is_none() {
            return Ok(matrix);
        }
        let converged = self.converged(&state);
        for (i, src) in state.hosts.iter().enumerate() {
            let reachable = state.reachable_from(src, converged);
            for (j, dst) in state.hosts.iter().enumerate() {
                matrix.reachable[i][j] = i != j && reachable.contains(dst);
            }
        }
        Ok(matrix)
    }

    async fn exec(&self, node: &str, argv: &[String], limit: Duration) -> Result<ExecOutput, PlatformError> {
        self.record(format!("exec {} {}", node, argv.join(" ")));
        if !self.state().hosts.iter().any(|h| h == node) {
            return Err(PlatformError::UnknownNode(node.to_string()));
        }

        let work = async {
            match parse_client(argv) {
                Some(request) => self.run_client(node, request).await,
                None => Ok(ExecOutput {
                    status: Some(0),
                    ..ExecOutput::default()
                }),
            }
        };
        match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::Timeout {
                command: argv.join(" "),
                limit,
            }),
        }
    }

    async fn spawn_daemon(&self, node: &str, argv: &[String]) -> Result<(), PlatformError> {
        self.record(format!("spawn_daemon {} {}", node, argv.join(" ")));
        if self.behavior.fail_daemon.contains(node) {
            return Err(PlatformError::Spawn {
                command: argv.join(" "),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "injected failure"),
            });
        }
        let mut state = self.state();
        if !state.hosts.iter().any(|h| h == node) {
            return Err(PlatformError::UnknownNode(node.to_string()));
        }
        state.daemons.entry(node.to_string()).or_default().push(argv.to_vec());
        Ok(())
    }

    async fn kill_daemons(&self, node: &str) -> Result<(), PlatformError> {
        self.record(format!("kill_daemons {}", node));
        self.state().daemons.remove(node);
        Ok(())
    }

    async fn ip_of(&self, host: &str) -> Option<Ipv4Addr> {
        self.record(format!("ip_of {}", host));
        self.state().address_of(host)
    }
}
