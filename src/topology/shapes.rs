//! Built-in fabric shapes.
//!
//! Every shape is expressed as a node list plus an edge list; the builder
//! treats them all the same way. Adding a shape means adding a function here.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::types::{LinkParams, Node, SwitchOptions, Tier, TopologyDescriptor};

/// Fabric shapes that ship with the tool
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Shape {
    /// Three switches in a line, two hosts per switch
    Linear,
    /// One central switch, six hosts
    Star,
    /// Two central switches, every host attached to both
    DualStar,
    /// Six switches in a ring with three chords, loop prevention on
    Ring,
    /// Two spines, three leaves in full mesh, loop prevention on
    SpineLeaf,
}

impl Shape {
    pub fn all() -> [Shape; 5] {
        [Shape::Linear, Shape::Star, Shape::DualStar, Shape::Ring, Shape::SpineLeaf]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Shape::Linear => "linear",
            Shape::Star => "star",
            Shape::DualStar => "dual-star",
            Shape::Ring => "ring",
            Shape::SpineLeaf => "spine-leaf",
        }
    }

    /// Build the declarative descriptor for this shape
    pub fn descriptor(&self) -> TopologyDescriptor {
        match self {
            Shape::Linear => linear(),
            Shape::Star => star(),
            Shape::DualStar => dual_star(),
            Shape::Ring => ring(6),
            Shape::SpineLeaf => spine_leaf(2, &[&["h1", "h2", "h_loadgen"], &["h3", "h4"], &["h5", "h6"]]),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tier of the six standard hosts: two web, two app, two data.
fn three_tier(host: &str) -> Option<Tier> {
    match host {
        "h1" | "h2" | "h_loadgen" => Some(Tier::Web),
        "h3" | "h4" => Some(Tier::App),
        "h5" | "h6" => Some(Tier::Data),
        _ => None,
    }
}

fn add_hosts(topo: &mut TopologyDescriptor, names: &[&str]) {
    for name in names {
        topo.add_node(Node::host(*name, three_tier(name)));
    }
}

const SIX_HOSTS: [&str; 6] = ["h1", "h2", "h3", "h4", "h5", "h6"];

/// s1 - s2 - s3, web tier on s1, app on s2, data on s3.
pub fn linear() -> TopologyDescriptor {
    let mut topo = TopologyDescriptor::new("linear");
    for s in ["s1", "s2", "s3"] {
        topo.add_node(Node::switch(s, SwitchOptions::plain(), None));
    }
    add_hosts(&mut topo, &SIX_HOSTS);

    topo.add_link("s1", "s2", LinkParams::fabric());
    topo.add_link("s2", "s3", LinkParams::fabric());
    for (host, switch) in [("h1", "s1"), ("h2", "s1"), ("h3", "s2"), ("h4", "s2"), ("h5", "s3"), ("h6", "s3")] {
        topo.add_link(host, switch, LinkParams::edge());
    }
    topo
}

/// Single switch with all six hosts attached.
pub fn star() -> TopologyDescriptor {
    let mut topo = TopologyDescriptor::new("star");
    topo.add_node(Node::switch("s1", SwitchOptions::plain(), Some(Tier::Core)));
    add_hosts(&mut topo, &SIX_HOSTS);
    for host in SIX_HOSTS {
        topo.add_link(host, "s1", LinkParams::edge());
    }
    topo
}

/// Two central switches joined by one link; every host is dual-homed.
///
/// Hosts do not bridge between their interfaces, so the switch subgraph is
/// a single link and no loop prevention is needed.
pub fn dual_star() -> TopologyDescriptor {
    let mut topo = TopologyDescriptor::new("dual-star");
    topo.add_node(Node::switch("s1", SwitchOptions::plain(), Some(Tier::Core)));
    topo.add_node(Node::switch("s2", SwitchOptions::plain(), Some(Tier::Core)));
    add_hosts(&mut topo, &SIX_HOSTS);
    for host in SIX_HOSTS {
        topo.add_link(host, "s1", LinkParams::edge());
        topo.add_link(host, "s2", LinkParams::edge());
    }
    topo.add_link("s1", "s2", LinkParams::fabric());
    topo
}

/// Ring of `n` switches with one host each, plus chords between opposite
/// switches (`s1-s4`, `s2-s5`, ... for n = 6).
pub fn ring(n: usize) -> TopologyDescriptor {
    let mut topo = TopologyDescriptor::new("ring");
    topo.convergence_hint = Some(Duration::from_secs(15));

    let switches: Vec<String> = (1..=n).map(|i| format!("s{}", i)).collect();
    let hosts: Vec<String> = (1..=n).map(|i| format!("h{}", i)).collect();

    for s in &switches {
        topo.add_node(Node::switch(s.as_str(), SwitchOptions::loop_prevention(), None));
    }
    for h in &hosts {
        topo.add_node(Node::host(h.as_str(), None));
    }

    for (h, s) in hosts.iter().zip(&switches) {
        topo.add_link(h, s, LinkParams::edge());
    }
    for i in 0..n {
        topo.add_link(&switches[i], &switches[(i + 1) % n], LinkParams::fabric());
    }
    for i in 0..n / 2 {
        topo.add_link(&switches[i], &switches[i + n / 2], LinkParams::fabric());
    }
    topo
}

/// `spines` spine switches, one leaf per host group, every leaf linked to
/// every spine.
pub fn spine_leaf(spines: usize, leaf_hosts: &[&[&str]]) -> TopologyDescriptor {
    let mut topo = TopologyDescriptor::new("spine-leaf");
    topo.convergence_hint = Some(Duration::from_secs(20));

    let spine_names: Vec<String> = (1..=spines).map(|i| format!("spine{}", i)).collect();
    let leaf_names: Vec<String> = (1..=leaf_hosts.len()).map(|i| format!("leaf{}", i)).collect();

    for s in &spine_names {
        topo.add_node(Node::switch(s.as_str(), SwitchOptions::loop_prevention(), Some(Tier::Spine)));
    }
    for l in &leaf_names {
        topo.add_node(Node::switch(l.as_str(), SwitchOptions::loop_prevention(), Some(Tier::Leaf)));
    }

    // Host creation order decides addressing: h1..h6 first, then the load generator.
    let mut ordered: Vec<&str> = leaf_hosts.iter().flat_map(|g| g.iter().copied()).collect();
    ordered.sort_by_key(|h| *h == "h_loadgen");
    add_hosts(&mut topo, &ordered);

    for leaf in &leaf_names {
        for spine in &spine_names {
            topo.add_link(leaf, spine, LinkParams::fabric());
        }
    }
    for (hosts, leaf) in leaf_hosts.iter().zip(&leaf_names) {
        for host in hosts.iter() {
            topo.add_link(host, leaf, LinkParams::edge());
        }
    }
    topo
}
