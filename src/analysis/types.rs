//! Report types shared by the aggregator and the renderers.

use std::time::Duration;

use serde::Serialize;

use crate::bench::types::BenchmarkResult;
use crate::convergence::ConvergenceOutcome;
use crate::platform::ReachabilityMatrix;

/// Results of one scenario group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateReport {
    pub group: String,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// In flow order
    pub results: Vec<BenchmarkResult>,
    /// Sum of completed throughputs (Mbps)
    pub total_mbps: f64,
    pub completed: usize,
    pub unknown: usize,
    pub failed: usize,
}

/// Every group of a benchmark run, in execution order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub groups: Vec<AggregateReport>,
}

impl ScenarioReport {
    pub fn grand_total_mbps(&self) -> f64 {
        self.groups.iter().map(|g| g.total_mbps).sum()
    }

    pub fn flow_count(&self) -> usize {
        self.groups.iter().map(|g| g.results.len()).sum()
    }
}

/// Condensed `ping_all` result kept in the run report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReachabilitySummary {
    pub sent: usize,
    pub received: usize,
    pub drop_percent: f64,
    pub unreachable: Vec<(String, String)>,
}

impl From<&ReachabilityMatrix> for ReachabilitySummary {
    fn from(matrix: &ReachabilityMatrix) -> Self {
        Self {
            sent: matrix.sent(),
            received: matrix.received(),
            drop_percent: matrix.drop_percent(),
            unreachable: matrix.unreachable_pairs(),
        }
    }
}

/// Everything a run produced, printed at the end and optionally saved
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub topology: String,
    /// RFC 3339 time the report was assembled
    pub generated_at: String,
    pub convergence: Option<ConvergenceOutcome>,
    pub reachability: Option<ReachabilitySummary>,
    pub scenarios: ScenarioReport,
    pub grand_total_mbps: f64,
    /// Fatal error that ended the run early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
}

impl RunReport {
    pub fn new(topology: impl Into<String>) -> Self {
        Self {
            topology: topology.into(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            convergence: None,
            reachability: None,
            scenarios: ScenarioReport::default(),
            grand_total_mbps: 0.0,
            error: None,
            teardown_error: None,
        }
    }

    /// True when the run finished without a fatal or teardown error
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.teardown_error.is_none()
    }
}
