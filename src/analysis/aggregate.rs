//! Per-group aggregation of flow results.

use std::time::Duration;

use super::types::AggregateReport;
use crate::bench::types::{BenchmarkResult, FlowStatus};

/// Sum completed throughputs and count outcomes.
///
/// Unknown and failed flows contribute nothing to the total but stay in the
/// result list, in the order given.
pub fn aggregate(group: &str, duration: Duration, results: Vec<BenchmarkResult>) -> AggregateReport {
    let mut total_mbps = 0.0;
    let (mut completed, mut unknown, mut failed) = (0, 0, 0);

    for result in &results {
        match result.status {
            FlowStatus::Completed => {
                completed += 1;
                total_mbps += result.throughput_mbps.unwrap_or(0.0);
            }
            FlowStatus::Unknown => unknown += 1,
            FlowStatus::Failed { .. } => failed += 1,
        }
    }

    AggregateReport {
        group: group.to_string(),
        duration,
        results,
        total_mbps,
        completed,
        unknown,
        failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::types::FlowSpec;

    #[test]
    fn test_total_counts_only_completed() {
        let d = Duration::from_secs(30);
        let results = vec![
            BenchmarkResult::completed(&FlowSpec::stream("h1", "h3"), 74.3, String::new(), d),
            BenchmarkResult::unknown(&FlowSpec::stream("h2", "h4"), "garbage".to_string(), d),
            BenchmarkResult::completed(&FlowSpec::stream("h5", "h6"), 25.7, String::new(), d),
            BenchmarkResult::failed(&FlowSpec::stream("h1", "h2"), "timed out", String::new(), d),
        ];
        let report = aggregate("mixed", d, results);
        assert!((report.total_mbps - 100.0).abs() < 1e-9);
        assert_eq!((report.completed, report.unknown, report.failed), (2, 1, 1));
        assert_eq!(report.results.len(), 4);
        assert_eq!(report.results[1].flow, "h2->h4");
    }

    #[test]
    fn test_empty_group() {
        let report = aggregate("empty", Duration::from_secs(1), Vec::new());
        assert_eq!(report.total_mbps, 0.0);
        assert_eq!(report.completed + report.unknown + report.failed, 0);
    }
}
