//! Descriptor validation and the immutable, validated `Topology`.
//!
//! Checks the graph invariants a fabric must satisfy before anything is
//! handed to the platform, and derives the redundant-path flag that decides
//! whether a convergence wait is needed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::time::Duration;

use super::types::{Link, Node, TopologyDescriptor};

/// Errors found while validating a topology descriptor
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TopologyError {
    #[error("Topology '{0}' has no nodes")]
    Empty(String),

    #[error("Node name cannot be empty")]
    EmptyName,

    #[error("Duplicate node name: {0}")]
    DuplicateNode(String),

    #[error("Link {a}-{b} references unknown node '{missing}'")]
    UnknownEndpoint { a: String, b: String, missing: String },

    #[error("Link {0}-{0} connects a node to itself")]
    SelfLoop(String),

    #[error("Link {a}-{b} has invalid bandwidth {bandwidth} Mbps")]
    InvalidBandwidth { a: String, b: String, bandwidth: f64 },

    #[error("Duplicate link {a}-{b} between nodes without loop prevention")]
    DuplicateLink { a: String, b: String },

    #[error("Host '{0}' has no link to any switch")]
    OrphanHost(String),

    #[error("Switch subgraph is disconnected: '{0}' cannot reach '{1}'")]
    DisconnectedSwitches(String, String),

    #[error("Switch '{0}' sits on a redundant path but has loop prevention disabled")]
    LoopWithoutPrevention(String),

    #[error("Topology has {0} hosts, more than the 10.0.0.0/8 address plan supports")]
    TooManyHosts(usize),
}

/// 10.0.0.0/8 minus the network and broadcast addresses
const MAX_HOSTS: usize = (1 << 24) - 2;

/// A validated fabric. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Topology {
    descriptor: TopologyDescriptor,
    has_redundant_paths: bool,
    /// Host names in creation order; the index decides the host address
    host_order: Vec<String>,
}

impl Topology {
    /// Validate a descriptor and derive the redundant-path flag
    pub fn new(descriptor: TopologyDescriptor) -> Result<Self, TopologyError> {
        if descriptor.nodes.is_empty() {
            return Err(TopologyError::Empty(descriptor.name.clone()));
        }

        let mut by_name: HashMap<&str, &Node> = HashMap::new();
        for node in &descriptor.nodes {
            if node.name.trim().is_empty() {
                return Err(TopologyError::EmptyName);
            }
            if by_name.insert(node.name.as_str(), node).is_some() {
                return Err(TopologyError::DuplicateNode(node.name.clone()));
            }
        }

        let mut seen_links: HashSet<(&str, &str)> = HashSet::new();
        for link in &descriptor.links {
            for endpoint in [&link.a, &link.b] {
                if !by_name.contains_key(endpoint.as_str()) {
                    return Err(TopologyError::UnknownEndpoint {
                        a: link.a.clone(),
                        b: link.b.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
            if link.a == link.b {
                return Err(TopologyError::SelfLoop(link.a.clone()));
            }
            let bw = link.params.bandwidth_mbps;
            if !bw.is_finite() || bw <= 0.0 {
                return Err(TopologyError::InvalidBandwidth {
                    a: link.a.clone(),
                    b: link.b.clone(),
                    bandwidth: bw,
                });
            }
            if !seen_links.insert(link.key()) && !is_modeled_redundancy(&by_name, link) {
                return Err(TopologyError::DuplicateLink {
                    a: link.a.clone(),
                    b: link.b.clone(),
                });
            }
        }

        for host in descriptor.hosts() {
            let attached = descriptor.links.iter().any(|l| {
                l.other(&host.name)
                    .and_then(|other| by_name.get(other))
                    .map_or(false, |n| n.is_switch())
            });
            if !attached {
                return Err(TopologyError::OrphanHost(host.name.clone()));
            }
        }

        check_switches_connected(&descriptor, &by_name)?;

        let switch_count = descriptor.switches().count();
        let switch_links = count_switch_links(&descriptor, &by_name);
        let has_redundant_paths = switch_count > 0 && switch_links > switch_count - 1;

        if has_redundant_paths {
            if let Some(plain) = descriptor
                .switches()
                .find(|s| !s.switch_options().map_or(false, |o| o.loop_prevention_enabled()))
            {
                return Err(TopologyError::LoopWithoutPrevention(plain.name.clone()));
            }
        }

        let host_order: Vec<String> = descriptor.hosts().map(|h| h.name.clone()).collect();
        if host_order.len() > MAX_HOSTS {
            return Err(TopologyError::TooManyHosts(host_order.len()));
        }

        log::debug!(
            "Validated topology '{}': {} switches, {} hosts, {} links (redundant paths: {})",
            descriptor.name,
            switch_count,
            host_order.len(),
            descriptor.links.len(),
            has_redundant_paths
        );

        Ok(Self {
            descriptor,
            has_redundant_paths,
            host_order,
        })
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &TopologyDescriptor {
        &self.descriptor
    }

    /// True when some pair of switches has more than one path between them
    pub fn has_redundant_paths(&self) -> bool {
        self.has_redundant_paths
    }

    /// Host names in creation order
    pub fn hosts(&self) -> &[String] {
        &self.host_order
    }

    pub fn switches(&self) -> impl Iterator<Item = &Node> {
        self.descriptor.switches()
    }

    pub fn links(&self) -> &[Link] {
        &self.descriptor.links
    }

    pub fn is_host(&self, name: &str) -> bool {
        self.host_order.iter().any(|h| h == name)
    }

    /// Sequential address of a host, `10.0.0.1` for the first created host.
    pub fn host_address(&self, name: &str) -> Option<Ipv4Addr> {
        let index = self.host_order.iter().position(|h| h == name)?;
        Some(sequential_address(index))
    }

    pub fn switch_count(&self) -> usize {
        self.descriptor.switches().count()
    }

    /// Switch-to-switch links beyond what a spanning tree needs
    pub fn extra_switch_links(&self) -> usize {
        let by_name: HashMap<&str, &Node> = self.descriptor.nodes.iter().map(|n| (n.name.as_str(), n)).collect();
        let links = count_switch_links(&self.descriptor, &by_name);
        links.saturating_sub(self.switch_count().saturating_sub(1))
    }

    /// Settle time for the loop-prevention protocol.
    ///
    /// Uses the descriptor's hint when present, otherwise scales with the
    /// number of switches and redundant links.
    pub fn convergence_estimate(&self) -> Duration {
        if let Some(hint) = self.descriptor.convergence_hint {
            return hint;
        }
        let scaled = 2 * self.switch_count() as u64 + self.extra_switch_links() as u64;
        Duration::from_secs(scaled.max(15))
    }
}

/// Address for the host created at `index` (0-based) in a 10.0.0.0/8 plan.
pub fn sequential_address(index: usize) -> Ipv4Addr {
    let n = index as u32 + 1;
    Ipv4Addr::new(10, ((n >> 16) & 0xff) as u8, ((n >> 8) & 0xff) as u8, (n & 0xff) as u8)
}

/// A repeated link is only acceptable between two loop-prevention switches
fn is_modeled_redundancy(by_name: &HashMap<&str, &Node>, link: &Link) -> bool {
    [&link.a, &link.b].iter().all(|name| {
        by_name
            .get(name.as_str())
            .and_then(|n| n.switch_options())
            .map_or(false, |o| o.loop_prevention_enabled())
    })
}

fn count_switch_links(descriptor: &TopologyDescriptor, by_name: &HashMap<&str, &Node>) -> usize {
    descriptor
        .links
        .iter()
        .filter(|l| {
            by_name.get(l.a.as_str()).map_or(false, |n| n.is_switch())
                && by_name.get(l.b.as_str()).map_or(false, |n| n.is_switch())
        })
        .count()
}

/// Breadth-first search over switch-to-switch links only
fn check_switches_connected(
    descriptor: &TopologyDescriptor,
    by_name: &HashMap<&str, &Node>,
) -> Result<(), TopologyError> {
    let switches: Vec<&str> = descriptor.switches().map(|s| s.name.as_str()).collect();
    let Some(&first) = switches.first() else {
        return Ok(());
    };

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for link in &descriptor.links {
        let both_switches = by_name.get(link.a.as_str()).map_or(false, |n| n.is_switch())
            && by_name.get(link.b.as_str()).map_or(false, |n| n.is_switch());
        if both_switches {
            adjacency.entry(link.a.as_str()).or_default().push(link.b.as_str());
            adjacency.entry(link.b.as_str()).or_default().push(link.a.as_str());
        }
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue = VecDeque::from([first]);
    visited.insert(first);
    while let Some(current) = queue.pop_front() {
        for next in adjacency.get(current).into_iter().flatten() {
            if visited.insert(*next) {
                queue.push_back(*next);
            }
        }
    }

    match switches.iter().find(|s| !visited.contains(*s)) {
        Some(unreached) => Err(TopologyError::DisconnectedSwitches(first.to_string(), unreached.to_string())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::shapes::{self, Shape};
    use crate::topology::types::{LinkParams, SwitchOptions};

    fn two_switch_base() -> TopologyDescriptor {
        let mut topo = TopologyDescriptor::new("test");
        topo.add_node(Node::switch("s1", SwitchOptions::plain(), None))
            .add_node(Node::switch("s2", SwitchOptions::plain(), None))
            .add_node(Node::host("h1", None))
            .add_node(Node::host("h2", None));
        topo.add_link("h1", "s1", LinkParams::edge())
            .add_link("h2", "s2", LinkParams::edge())
            .add_link("s1", "s2", LinkParams::fabric());
        topo
    }

    #[test]
    fn test_builtin_shapes_are_valid() {
        for shape in Shape::all() {
            let topo = Topology::new(shape.descriptor());
            assert!(topo.is_ok(), "{} should validate: {:?}", shape, topo.err());
        }
    }

    #[test]
    fn test_redundant_path_detection() {
        let expectations = [
            (Shape::Linear, false),
            (Shape::Star, false),
            (Shape::DualStar, false),
            (Shape::Ring, true),
            (Shape::SpineLeaf, true),
        ];
        for (shape, expected) in expectations {
            let topo = Topology::new(shape.descriptor()).unwrap();
            assert_eq!(topo.has_redundant_paths(), expected, "shape {}", shape);
        }
    }

    #[test]
    fn test_sequential_addresses() {
        let topo = Topology::new(shapes::star()).unwrap();
        assert_eq!(topo.host_address("h1"), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(topo.host_address("h6"), Some(Ipv4Addr::new(10, 0, 0, 6)));
        assert_eq!(topo.host_address("s1"), None);
        assert_eq!(sequential_address(255), Ipv4Addr::new(10, 0, 1, 0));
    }

    #[test]
    fn test_rejects_self_loop_and_bad_bandwidth() {
        let mut topo = two_switch_base();
        topo.add_link("s1", "s1", LinkParams::fabric());
        assert_eq!(Topology::new(topo).unwrap_err(), TopologyError::SelfLoop("s1".to_string()));

        let mut topo = two_switch_base();
        topo.links[0].params.bandwidth_mbps = 0.0;
        assert!(matches!(Topology::new(topo), Err(TopologyError::InvalidBandwidth { .. })));

        let mut topo = two_switch_base();
        topo.links[0].params.bandwidth_mbps = f64::NAN;
        assert!(matches!(Topology::new(topo), Err(TopologyError::InvalidBandwidth { .. })));
    }

    #[test]
    fn test_rejects_unknown_endpoint_and_duplicates() {
        let mut topo = two_switch_base();
        topo.add_link("h1", "s9", LinkParams::edge());
        assert!(matches!(Topology::new(topo), Err(TopologyError::UnknownEndpoint { missing, .. }) if missing == "s9"));

        let mut topo = two_switch_base();
        topo.add_node(Node::host("h1", None));
        assert_eq!(Topology::new(topo).unwrap_err(), TopologyError::DuplicateNode("h1".to_string()));

        let mut topo = two_switch_base();
        topo.add_link("s2", "s1", LinkParams::fabric());
        assert!(matches!(Topology::new(topo), Err(TopologyError::DuplicateLink { .. })));
    }

    #[test]
    fn test_parallel_link_allowed_with_loop_prevention() {
        let mut topo = TopologyDescriptor::new("parallel");
        topo.add_node(Node::switch("s1", SwitchOptions::loop_prevention(), None))
            .add_node(Node::switch("s2", SwitchOptions::loop_prevention(), None))
            .add_node(Node::host("h1", None));
        topo.add_link("h1", "s1", LinkParams::edge())
            .add_link("s1", "s2", LinkParams::fabric())
            .add_link("s1", "s2", LinkParams::fabric());
        let topo = Topology::new(topo).unwrap();
        assert!(topo.has_redundant_paths());
        assert_eq!(topo.extra_switch_links(), 1);
    }

    #[test]
    fn test_rejects_orphan_host_and_split_fabric() {
        let mut topo = two_switch_base();
        topo.add_node(Node::host("h3", None));
        assert_eq!(Topology::new(topo).unwrap_err(), TopologyError::OrphanHost("h3".to_string()));

        let mut topo = two_switch_base();
        topo.links.retain(|l| l.key() != ("s1", "s2"));
        assert!(matches!(Topology::new(topo), Err(TopologyError::DisconnectedSwitches(..))));
    }

    #[test]
    fn test_rejects_cycle_without_loop_prevention() {
        let mut topo = two_switch_base();
        topo.add_node(Node::switch("s3", SwitchOptions::plain(), None));
        topo.add_link("s2", "s3", LinkParams::fabric())
            .add_link("s3", "s1", LinkParams::fabric());
        assert!(matches!(Topology::new(topo), Err(TopologyError::LoopWithoutPrevention(_))));
    }

    #[test]
    fn test_convergence_estimate() {
        let ring = Topology::new(shapes::ring(6)).unwrap();
        assert_eq!(ring.convergence_estimate(), Duration::from_secs(15));
        assert_eq!(ring.extra_switch_links(), 4);

        let mut big = shapes::ring(12);
        big.convergence_hint = None;
        let big = Topology::new(big).unwrap();
        // 2s per switch plus 1s per redundant link
        assert_eq!(big.convergence_estimate(), Duration::from_secs(24 + 7));
    }

    #[test]
    fn test_empty_topology() {
        let topo = TopologyDescriptor::new("nothing");
        assert_eq!(Topology::new(topo).unwrap_err(), TopologyError::Empty("nothing".to_string()));
    }
}
