//! Linux backend built from network namespaces, veth pairs and Open vSwitch.
//!
//! Hosts are namespaces (`ip netns`), switches are OVS bridges, links are
//! veth pairs shaped with `tc netem`. Needs root plus the `ip`, `tc`,
//! `ovs-vsctl` and `ovs-ofctl` tools.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::command::{display_command, run_bounded, run_checked, ExecOutput};
use super::{Platform, PlatformError, ReachabilityMatrix};
use crate::topology::types::{LinkParams, SwitchOptions};
use crate::topology::validate::sequential_address;

/// Linux limit on interface name length (IFNAMSIZ - 1)
const MAX_IFNAME: usize = 15;

/// Default bound for a single setup command
const SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// One external command, kept as data so it can be logged and tested
#[derive(Debug, Clone, PartialEq)]
pub struct NetCommand {
    pub program: &'static str,
    pub args: Vec<String>,
}

impl NetCommand {
    fn new(program: &'static str) -> Self {
        Self {
            program,
            args: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Prefix with `ip netns exec <ns>` so the command runs inside a host
    fn in_namespace(self, ns: &str) -> Self {
        NetCommand::new("ip")
            .args(["netns", "exec", ns, self.program])
            .args(self.args)
    }

    pub fn render(&self) -> String {
        display_command(self.program, &self.args)
    }
}

pub fn netns_add(name: &str) -> NetCommand {
    NetCommand::new("ip").args(["netns", "add", name])
}

pub fn netns_del(name: &str) -> NetCommand {
    NetCommand::new("ip").args(["netns", "del", name])
}

/// Commands that create and configure an OVS bridge
pub fn bridge_add(name: &str, options: &SwitchOptions) -> Vec<NetCommand> {
    vec![
        NetCommand::new("ovs-vsctl").args(["--may-exist", "add-br", name]),
        NetCommand::new("ovs-vsctl").args(["set-fail-mode", name, options.fail_mode.as_str()]),
        NetCommand::new("ovs-vsctl")
            .args(["set", "bridge", name])
            .arg(format!("stp_enable={}", options.loop_prevention_enabled())),
    ]
}

pub fn bridge_del(name: &str) -> NetCommand {
    NetCommand::new("ovs-vsctl").args(["--if-exists", "del-br", name])
}

pub fn veth_pair(a_if: &str, b_if: &str) -> NetCommand {
    NetCommand::new("ip").args(["link", "add", a_if, "type", "veth", "peer", "name", b_if])
}

pub fn link_del(iface: &str) -> NetCommand {
    NetCommand::new("ip").args(["link", "del", iface])
}

pub fn move_to_namespace(iface: &str, ns: &str) -> NetCommand {
    NetCommand::new("ip").args(["link", "set", iface, "netns", ns])
}

pub fn attach_port(bridge: &str, iface: &str) -> NetCommand {
    NetCommand::new("ovs-vsctl").args(["add-port", bridge, iface])
}

/// netem qdisc applying both delay and a rate limit to one interface
pub fn shape_interface(iface: &str, params: &LinkParams, ns: Option<&str>) -> NetCommand {
    let rate_kbit = (params.bandwidth_mbps * 1000.0).round() as u64;
    let cmd = NetCommand::new("tc")
        .args(["qdisc", "replace", "dev", iface, "root", "netem", "delay"])
        .arg(format!("{}us", params.delay.as_micros()))
        .arg("rate")
        .arg(format!("{}kbit", rate_kbit));
    match ns {
        Some(ns) => cmd.in_namespace(ns),
        None => cmd,
    }
}

pub fn address_add(ns: &str, iface: &str, addr: Ipv4Addr) -> NetCommand {
    NetCommand::new("ip")
        .args(["addr", "add", format!("{}/8", addr).as_str(), "dev", iface])
        .in_namespace(ns)
}

pub fn link_up(iface: &str, ns: Option<&str>) -> NetCommand {
    let cmd = NetCommand::new("ip").args(["link", "set", "dev", iface, "up"]);
    match ns {
        Some(ns) => cmd.in_namespace(ns),
        None => cmd,
    }
}

pub fn default_forwarding(switch: &str) -> NetCommand {
    NetCommand::new("ovs-ofctl").args(["add-flow", switch, "actions=NORMAL"])
}

pub fn ping_once(ns: &str, target: Ipv4Addr) -> NetCommand {
    NetCommand::new("ping")
        .args(["-c", "1", "-W", "1"])
        .arg(target.to_string())
        .in_namespace(ns)
}

pub fn interface_name(node: &str, index: usize) -> Result<String, PlatformError> {
    let name = format!("{}-eth{}", node, index);
    if name.len() > MAX_IFNAME {
        return Err(PlatformError::Rejected {
            operation: format!("interface for {}", node),
            reason: format!("'{}' exceeds {} characters", name, MAX_IFNAME),
        });
    }
    Ok(name)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum NodeKind {
    Host,
    Switch,
}

#[derive(Default)]
struct NetnsState {
    /// Hosts in creation order
    hosts: Vec<String>,
    switches: Vec<String>,
    next_interface: HashMap<String, usize>,
    /// (namespace, interface) pairs living inside hosts
    host_interfaces: Vec<(String, String)>,
    /// Switch-side interfaces living in the root namespace
    switch_interfaces: Vec<String>,
    /// Both ends of every veth pair, recorded as soon as the pair exists
    veth_ends: Vec<String>,
    daemons: HashMap<String, Vec<Child>>,
}

impl NetnsState {
    fn kind(&self, node: &str) -> Option<NodeKind> {
        if self.hosts.iter().any(|h| h == node) {
            Some(NodeKind::Host)
        } else if self.switches.iter().any(|s| s == node) {
            Some(NodeKind::Switch)
        } else {
            None
        }
    }

    fn allocate_interface(&mut self, node: &str) -> Result<String, PlatformError> {
        let index = self.next_interface.entry(node.to_string()).or_insert(0);
        let name = interface_name(node, *index)?;
        *index += 1;
        Ok(name)
    }

    fn address_of(&self, host: &str) -> Option<Ipv4Addr> {
        self.hosts.iter().position(|h| h == host).map(sequential_address)
    }
}

/// Commands that remove everything recorded in `state`: bridges, then veth
/// pairs left in the root namespace, then host namespaces.
fn teardown_commands(state: &NetnsState) -> Vec<NetCommand> {
    let bridges = state.switches.iter().map(|s| bridge_del(s));
    let veths = state.veth_ends.iter().map(|iface| link_del(iface));
    let namespaces = state.hosts.iter().map(|h| netns_del(h));
    bridges.chain(veths).chain(namespaces).collect()
}

/// Deleting one veth end removes its peer too, so a missing device during
/// teardown means the work is already done.
fn already_removed(err: &PlatformError) -> bool {
    matches!(err, PlatformError::CommandFailed { stderr, .. } if stderr.contains("Cannot find device"))
}

/// Platform backed by the local Linux kernel
pub struct NetnsPlatform {
    state: Mutex<NetnsState>,
    command_timeout: Duration,
}

impl Default for NetnsPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl NetnsPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NetnsState::default()),
            command_timeout: SETUP_TIMEOUT,
        }
    }

    /// Bound applied to each setup and teardown command
    pub fn with_command_timeout(mut self, limit: Duration) -> Self {
        self.command_timeout = limit;
        self
    }

    async fn run(&self, cmd: &NetCommand) -> Result<ExecOutput, PlatformError> {
        run_checked(cmd.program, &cmd.args, self.command_timeout).await
    }

    /// Attach one end of a link to its node and shape it
    async fn attach_endpoint(
        &self,
        state: &mut NetnsState,
        node: &str,
        kind: NodeKind,
        iface: &str,
        params: &LinkParams,
    ) -> Result<(), PlatformError> {
        match kind {
            NodeKind::Host => {
                self.run(&move_to_namespace(iface, node)).await?;
                self.run(&shape_interface(iface, params, Some(node))).await?;
                let first = !state.host_interfaces.iter().any(|(ns, _)| ns == node);
                if first {
                    let addr = state.address_of(node).ok_or_else(|| PlatformError::UnknownNode(node.to_string()))?;
                    self.run(&address_add(node, iface, addr)).await?;
                }
                state.host_interfaces.push((node.to_string(), iface.to_string()));
            }
            NodeKind::Switch => {
                self.run(&attach_port(node, iface)).await?;
                self.run(&shape_interface(iface, params, None)).await?;
                state.switch_interfaces.push(iface.to_string());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Platform for NetnsPlatform {
    async fn create_host(&self, name: &str) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        if state.kind(name).is_some() {
            return Err(PlatformError::Rejected {
                operation: format!("create host {}", name),
                reason: "name already in use".to_string(),
            });
        }
        self.run(&netns_add(name)).await?;
        state.hosts.push(name.to_string());
        Ok(())
    }

    async fn create_switch(&self, name: &str, options: &SwitchOptions) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        if state.kind(name).is_some() {
            return Err(PlatformError::Rejected {
                operation: format!("create switch {}", name),
                reason: "name already in use".to_string(),
            });
        }
        // Record first so a half-configured bridge is still removed on stop.
        state.switches.push(name.to_string());
        for cmd in bridge_add(name, options) {
            self.run(&cmd).await?;
        }
        Ok(())
    }

    async fn create_link(&self, a: &str, b: &str, params: &LinkParams) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        let kind_a = state.kind(a).ok_or_else(|| PlatformError::UnknownNode(a.to_string()))?;
        let kind_b = state.kind(b).ok_or_else(|| PlatformError::UnknownNode(b.to_string()))?;

        let if_a = state.allocate_interface(a)?;
        let if_b = state.allocate_interface(b)?;
        self.run(&veth_pair(&if_a, &if_b)).await?;
        state.veth_ends.push(if_a.clone());
        state.veth_ends.push(if_b.clone());

        self.attach_endpoint(&mut state, a, kind_a, &if_a, params).await?;
        self.attach_endpoint(&mut state, b, kind_b, &if_b, params).await?;
        Ok(())
    }

    async fn set_default_forwarding(&self, switch: &str) -> Result<(), PlatformError> {
        let state = self.state.lock().await;
        if state.kind(switch) != Some(NodeKind::Switch) {
            return Err(PlatformError::UnknownNode(switch.to_string()));
        }
        self.run(&default_forwarding(switch)).await?;
        Ok(())
    }

    async fn start(&self) -> Result<(), PlatformError> {
        let state = self.state.lock().await;
        for host in &state.hosts {
            self.run(&link_up("lo", Some(host))).await?;
        }
        for (ns, iface) in &state.host_interfaces {
            self.run(&link_up(iface, Some(ns))).await?;
        }
        for iface in &state.switch_interfaces {
            self.run(&link_up(iface, None)).await?;
        }
        for switch in &state.switches {
            self.run(&link_up(switch, None)).await?;
        }
        info!(
            "Started {} hosts, {} switches",
            state.hosts.len(),
            state.switches.len()
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        let mut first_error: Option<PlatformError> = None;

        for (host, children) in state.daemons.drain() {
            for mut child in children {
                if let Err(e) = child.kill().await {
                    debug!("daemon on {} already gone: {}", host, e);
                }
            }
        }

        let commands = teardown_commands(&state);
        *state = NetnsState::default();
        for cmd in &commands {
            match self.run(cmd).await {
                Ok(_) => {}
                Err(e) if already_removed(&e) => debug!("{}: already removed", cmd.render()),
                Err(e) => {
                    warn!("Teardown step '{}' failed: {}", cmd.render(), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn ping_all(&self) -> Result<ReachabilityMatrix, PlatformError> {
        let hosts = self.state.lock().await.hosts.clone();
        let addresses: Vec<Ipv4Addr> = (0..hosts.len()).map(sequential_address).collect();
        let mut matrix = ReachabilityMatrix::new(hosts.clone());

        for (i, src) in hosts.iter().enumerate() {
            for (j, dst) in addresses.iter().enumerate() {
                if i == j {
                    continue;
                }
                let cmd = ping_once(src, *dst);
                let out = run_bounded(cmd.program, &cmd.args, Duration::from_secs(3)).await?;
                matrix.reachable[i][j] = out.success();
            }
        }
        Ok(matrix)
    }

    async fn exec(&self, node: &str, argv: &[String], limit: Duration) -> Result<ExecOutput, PlatformError> {
        let kind = self.state.lock().await.kind(node);
        let (program, rest) = argv.split_first().ok_or_else(|| PlatformError::Rejected {
            operation: format!("exec on {}", node),
            reason: "empty command".to_string(),
        })?;

        match kind {
            Some(NodeKind::Host) => {
                let mut args = vec!["netns".to_string(), "exec".to_string(), node.to_string()];
                args.extend(argv.iter().cloned());
                run_bounded("ip", &args, limit).await
            }
            Some(NodeKind::Switch) => run_bounded(program, rest, limit).await,
            None => Err(PlatformError::UnknownNode(node.to_string())),
        }
    }

    async fn spawn_daemon(&self, node: &str, argv: &[String]) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        if state.kind(node) != Some(NodeKind::Host) {
            return Err(PlatformError::UnknownNode(node.to_string()));
        }

        let mut args = vec!["netns".to_string(), "exec".to_string(), node.to_string()];
        args.extend(argv.iter().cloned());
        let rendered = display_command("ip", &args);
        debug!("daemon: {}", rendered);
        let child = Command::new("ip")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PlatformError::Spawn {
                command: rendered,
                source,
            })?;

        state.daemons.entry(node.to_string()).or_default().push(child);
        Ok(())
    }

    async fn kill_daemons(&self, node: &str) -> Result<(), PlatformError> {
        let children = self.state.lock().await.daemons.remove(node).unwrap_or_default();
        for mut child in children {
            if let Err(e) = child.kill().await {
                debug!("daemon on {} already gone: {}", node, e);
            }
        }
        Ok(())
    }

    async fn ip_of(&self, host: &str) -> Option<Ipv4Addr> {
        self.state.lock().await.address_of(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_commands() {
        let cmds = bridge_add("s1", &SwitchOptions::loop_prevention());
        let rendered: Vec<String> = cmds.iter().map(NetCommand::render).collect();
        assert_eq!(
            rendered,
            vec![
                "ovs-vsctl --may-exist add-br s1",
                "ovs-vsctl set-fail-mode s1 standalone",
                "ovs-vsctl set bridge s1 stp_enable=true",
            ]
        );

        let plain = bridge_add("s2", &SwitchOptions::plain());
        assert_eq!(plain[2].render(), "ovs-vsctl set bridge s2 stp_enable=false");
    }

    #[test]
    fn test_shape_command() {
        let cmd = shape_interface("s1-eth0", &LinkParams::fabric(), None);
        assert_eq!(cmd.render(), "tc qdisc replace dev s1-eth0 root netem delay 2000us rate 100000kbit");

        let cmd = shape_interface("h1-eth0", &LinkParams::edge(), Some("h1"));
        assert_eq!(
            cmd.render(),
            "ip netns exec h1 tc qdisc replace dev h1-eth0 root netem delay 1000us rate 75000kbit"
        );
    }

    #[test]
    fn test_host_commands() {
        assert_eq!(
            address_add("h2", "h2-eth0", Ipv4Addr::new(10, 0, 0, 2)).render(),
            "ip netns exec h2 ip addr add 10.0.0.2/8 dev h2-eth0"
        );
        assert_eq!(
            ping_once("h1", Ipv4Addr::new(10, 0, 0, 3)).render(),
            "ip netns exec h1 ping -c 1 -W 1 10.0.0.3"
        );
        assert_eq!(default_forwarding("s1").render(), "ovs-ofctl add-flow s1 actions=NORMAL");
        assert_eq!(veth_pair("h1-eth0", "s1-eth0").render(), "ip link add h1-eth0 type veth peer name s1-eth0");
    }

    #[test]
    fn test_teardown_commands() {
        // Linear fragment: h1 - s1 - s2, with h1's end moved into its namespace.
        let state = NetnsState {
            hosts: vec!["h1".to_string()],
            switches: vec!["s1".to_string(), "s2".to_string()],
            host_interfaces: vec![("h1".to_string(), "h1-eth0".to_string())],
            switch_interfaces: vec!["s1-eth0".to_string(), "s1-eth1".to_string(), "s2-eth0".to_string()],
            veth_ends: ["h1-eth0", "s1-eth0", "s1-eth1", "s2-eth0"].map(String::from).to_vec(),
            ..Default::default()
        };
        let rendered: Vec<String> = teardown_commands(&state).iter().map(NetCommand::render).collect();
        assert_eq!(
            rendered,
            vec![
                "ovs-vsctl --if-exists del-br s1",
                "ovs-vsctl --if-exists del-br s2",
                "ip link del h1-eth0",
                "ip link del s1-eth0",
                "ip link del s1-eth1",
                "ip link del s2-eth0",
                "ip netns del h1",
            ]
        );
        assert!(teardown_commands(&NetnsState::default()).is_empty());
    }

    #[test]
    fn test_missing_device_counts_as_removed() {
        let gone = PlatformError::CommandFailed {
            command: "ip link del s2-eth0".to_string(),
            status: Some(1),
            stderr: "Cannot find device \"s2-eth0\"".to_string(),
        };
        assert!(already_removed(&gone));

        let busy = PlatformError::CommandFailed {
            command: "ip link del s1-eth0".to_string(),
            status: Some(2),
            stderr: "RTNETLINK answers: Operation not permitted".to_string(),
        };
        assert!(!already_removed(&busy));
        assert!(!already_removed(&PlatformError::UnknownNode("s1".to_string())));
    }

    #[test]
    fn test_interface_name_limit() {
        assert_eq!(interface_name("h_loadgen", 0).unwrap(), "h_loadgen-eth0");
        assert!(interface_name("a-very-long-switch", 0).is_err());
    }

    #[test]
    fn test_interface_allocation_per_node() {
        let mut state = NetnsState::default();
        assert_eq!(state.allocate_interface("s1").unwrap(), "s1-eth0");
        assert_eq!(state.allocate_interface("s1").unwrap(), "s1-eth1");
        assert_eq!(state.allocate_interface("h1").unwrap(), "h1-eth0");
    }

    #[tokio::test]
    async fn test_unknown_nodes_rejected_without_commands() {
        let platform = NetnsPlatform::new();
        let err = platform.create_link("h1", "s1", &LinkParams::edge()).await.unwrap_err();
        assert!(matches!(err, PlatformError::UnknownNode(name) if name == "h1"));
        assert!(platform.ip_of("h1").await.is_none());
        // Nothing was created, so stop has nothing to do.
        assert!(platform.stop().await.is_ok());
    }
}
