//! Topology type definitions.
//!
//! Nodes, links and the declarative descriptor that the builder consumes.
//! Everything here is plain data; validation lives in `validate`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Host edge bandwidth shared by every shape (Mbps).
pub const EDGE_BANDWIDTH_MBPS: f64 = 75.0;
/// Host edge propagation delay.
pub const EDGE_DELAY: Duration = Duration::from_millis(1);
/// Switch-to-switch and spine-leaf bandwidth (Mbps).
pub const FABRIC_BANDWIDTH_MBPS: f64 = 100.0;
/// Switch-to-switch and spine-leaf propagation delay.
pub const FABRIC_DELAY: Duration = Duration::from_millis(2);

/// Advisory tier a node belongs to. Not used for any decision.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Web,
    App,
    Data,
    Spine,
    Leaf,
    Core,
}

/// How a switch deals with redundant physical paths
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Redundancy {
    /// Plain learning switch; needs default forwarding installed after start
    #[default]
    Plain,
    /// Loop-prevention (spanning tree) enabled on the switch
    LoopPrevention,
}

/// Behaviour of a switch that has no controller attached
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Keep forwarding as a learning switch
    #[default]
    Standalone,
    /// Drop everything until a controller installs flows
    Secure,
}

impl FailMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Secure => "secure",
        }
    }
}

/// Options handed to the platform when a switch is created
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwitchOptions {
    #[serde(default)]
    pub redundancy: Redundancy,
    #[serde(default)]
    pub fail_mode: FailMode,
}

impl SwitchOptions {
    /// Plain learning switch in standalone mode.
    pub fn plain() -> Self {
        Self::default()
    }

    /// Spanning-tree switch that keeps forwarding without a controller.
    pub fn loop_prevention() -> Self {
        Self {
            redundancy: Redundancy::LoopPrevention,
            fail_mode: FailMode::Standalone,
        }
    }

    pub fn loop_prevention_enabled(&self) -> bool {
        self.redundancy == Redundancy::LoopPrevention
    }
}

/// Role of a node in the fabric
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum NodeRole {
    Host,
    Switch {
        #[serde(default)]
        redundancy: Redundancy,
        #[serde(default)]
        fail_mode: FailMode,
    },
}

/// A host or switch in the descriptor
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    #[serde(flatten)]
    pub role: NodeRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
}

impl Node {
    pub fn host(name: impl Into<String>, tier: Option<Tier>) -> Self {
        Self {
            name: name.into(),
            role: NodeRole::Host,
            tier,
        }
    }

    pub fn switch(name: impl Into<String>, options: SwitchOptions, tier: Option<Tier>) -> Self {
        Self {
            name: name.into(),
            role: NodeRole::Switch {
                redundancy: options.redundancy,
                fail_mode: options.fail_mode,
            },
            tier,
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self.role, NodeRole::Host)
    }

    pub fn is_switch(&self) -> bool {
        matches!(self.role, NodeRole::Switch { .. })
    }

    /// Switch options, or `None` for hosts
    pub fn switch_options(&self) -> Option<SwitchOptions> {
        match self.role {
            NodeRole::Switch { redundancy, fail_mode } => Some(SwitchOptions { redundancy, fail_mode }),
            NodeRole::Host => None,
        }
    }
}

/// Shaping parameters applied to one link
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct LinkParams {
    pub bandwidth_mbps: f64,
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl LinkParams {
    /// 75 Mbps / 1 ms host edge.
    pub fn edge() -> Self {
        Self {
            bandwidth_mbps: EDGE_BANDWIDTH_MBPS,
            delay: EDGE_DELAY,
        }
    }

    /// 100 Mbps / 2 ms switch-to-switch link.
    pub fn fabric() -> Self {
        Self {
            bandwidth_mbps: FABRIC_BANDWIDTH_MBPS,
            delay: FABRIC_DELAY,
        }
    }
}

/// Undirected link between two named nodes
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Link {
    pub a: String,
    pub b: String,
    #[serde(flatten)]
    pub params: LinkParams,
}

impl Link {
    pub fn new(a: impl Into<String>, b: impl Into<String>, params: LinkParams) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
            params,
        }
    }

    /// Endpoint names in a stable order so `(a, b)` and `(b, a)` compare equal.
    pub fn key(&self) -> (&str, &str) {
        if self.a <= self.b {
            (self.a.as_str(), self.b.as_str())
        } else {
            (self.b.as_str(), self.a.as_str())
        }
    }

    pub fn touches(&self, name: &str) -> bool {
        self.a == name || self.b == name
    }

    /// The endpoint opposite `name`, if `name` is an endpoint
    pub fn other(&self, name: &str) -> Option<&str> {
        if self.a == name {
            Some(&self.b)
        } else if self.b == name {
            Some(&self.a)
        } else {
            None
        }
    }
}

/// Declarative description of a fabric: nodes in creation order plus links.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TopologyDescriptor {
    pub name: String,
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
    /// Settle time to use when the fabric has redundant paths
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub convergence_hint: Option<Duration>,
}

impl TopologyDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            links: Vec::new(),
            convergence_hint: None,
        }
    }

    pub fn add_node(&mut self, node: Node) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn add_link(&mut self, a: &str, b: &str, params: LinkParams) -> &mut Self {
        self.links.push(Link::new(a, b, params));
        self
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_host())
    }

    pub fn switches(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_switch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_key_is_order_independent() {
        let forward = Link::new("s1", "s2", LinkParams::fabric());
        let backward = Link::new("s2", "s1", LinkParams::fabric());
        assert_eq!(forward.key(), backward.key());
        assert_eq!(forward.other("s1"), Some("s2"));
        assert_eq!(forward.other("h1"), None);
    }

    #[test]
    fn test_node_yaml_roles() {
        let yaml = r#"
- name: h1
  role: host
  tier: web
- name: s1
  role: switch
  redundancy: loop_prevention
- name: s2
  role: switch
"#;
        let nodes: Vec<Node> = serde_yaml::from_str(yaml).unwrap();
        assert!(nodes[0].is_host());
        assert_eq!(nodes[0].tier, Some(Tier::Web));
        assert_eq!(nodes[1].switch_options(), Some(SwitchOptions::loop_prevention()));
        assert_eq!(nodes[2].switch_options(), Some(SwitchOptions::plain()));
    }

    #[test]
    fn test_link_yaml_delay() {
        let yaml = "{ a: h1, b: s1, bandwidth_mbps: 75, delay: 1ms }";
        let link: Link = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(link.params, LinkParams::edge());
    }
}
