//! Report rendering.
//!
//! Produces the human-readable summary printed at the end of a run and the
//! JSON file written on request.

use std::fs;
use std::path::Path;

use color_eyre::eyre::{Context, Result};

use super::types::{AggregateReport, RunReport};
use crate::bench::types::{BenchmarkResult, FlowStatus};

/// One report line for a flow, e.g. `h1->h3: 74.3 Mbits/sec`
pub fn format_result(result: &BenchmarkResult) -> String {
    match (&result.status, result.throughput_mbps) {
        (FlowStatus::Completed, Some(mbps)) => format!("{}: {:.1} Mbits/sec", result.flow, mbps),
        (FlowStatus::Completed, None) | (FlowStatus::Unknown, _) => {
            format!("{}: Could not parse result", result.flow)
        }
        (FlowStatus::Failed { reason }, _) => format!("{}: FAILED ({})", result.flow, reason),
    }
}

fn push_group(lines: &mut Vec<String>, group: &AggregateReport) {
    lines.push(format!("--- {} ({}s) ---", group.group, group.duration.as_secs()));
    for result in &group.results {
        lines.push(format!("  {}", format_result(result)));
    }
    lines.push(format!("  Total throughput: {:.1} Mbits/sec", group.total_mbps));
    lines.push(format!(
        "  Flows: {} completed, {} unknown, {} failed",
        group.completed, group.unknown, group.failed
    ));
    lines.push(String::new());
}

/// Render the full run report as text
pub fn render_text(report: &RunReport) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push("=".repeat(80));
    lines.push(format!("                    FABRIC BENCHMARK: {}", report.topology));
    lines.push("=".repeat(80));
    lines.push(String::new());

    lines.push(format!("Generated: {}", report.generated_at));
    if let Some(outcome) = &report.convergence {
        lines.push(format!("Convergence: {}", outcome));
    }
    if let Some(reach) = &report.reachability {
        lines.push(format!(
            "Reachability: Results: {:.0}% dropped ({}/{} received)",
            reach.drop_percent, reach.received, reach.sent
        ));
        for (a, b) in &reach.unreachable {
            lines.push(format!("  {} -> {} unreachable", a, b));
        }
    }
    lines.push(String::new());

    if report.scenarios.groups.is_empty() {
        lines.push("No benchmark scenarios were run.".to_string());
        lines.push(String::new());
    }
    for group in &report.scenarios.groups {
        push_group(&mut lines, group);
    }

    lines.push("=".repeat(80));
    lines.push(format!("Grand total: {:.1} Mbits/sec", report.grand_total_mbps));
    if let Some(error) = &report.error {
        lines.push(format!("Run aborted: {}", error));
    }
    lines.push("=".repeat(80));

    lines.join("\n")
}

/// Serialize the run report to `output_path` as pretty JSON
pub fn write_json_report(report: &RunReport, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report to JSON")?;

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON report to {}", output_path.display()))?;

    log::info!("JSON report written to {}", output_path.display());
    Ok(())
}
