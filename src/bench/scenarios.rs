//! Scenario groups that ship with the built-in shapes.

use std::time::Duration;

use super::types::{FlowSpec, ScenarioSpec};
use crate::topology::Shape;

/// Default length of every built-in flow
pub const DEFAULT_DURATION: Duration = Duration::from_secs(30);

fn scenario(name: &str, flows: Vec<FlowSpec>) -> ScenarioSpec {
    ScenarioSpec {
        name: name.to_string(),
        duration: DEFAULT_DURATION,
        flows,
    }
}

/// Groups run against `shape` when the configuration names none.
///
/// Shapes without an entry only get built, converged and pinged.
pub fn builtin(shape: Shape) -> Vec<ScenarioSpec> {
    match shape {
        Shape::Star => vec![
            scenario(
                "Concurrent flows",
                vec![FlowSpec::stream("h1", "h3"), FlowSpec::stream("h2", "h4")],
            ),
            scenario(
                "Shared data server",
                vec![FlowSpec::stream("h3", "h5"), FlowSpec::stream("h4", "h5")],
            ),
        ],
        Shape::SpineLeaf => vec![
            scenario(
                "Balanced load across leaves",
                vec![
                    FlowSpec::datagram("h1", "h4"),
                    FlowSpec::datagram("h3", "h6"),
                    FlowSpec::datagram("h5", "h2"),
                ],
            ),
            scenario(
                "Bottleneck on single leaf",
                vec![FlowSpec::datagram("h1", "h5"), FlowSpec::datagram("h2", "h6")],
            ),
        ],
        Shape::Linear | Shape::DualStar | Shape::Ring => Vec::new(),
    }
}
