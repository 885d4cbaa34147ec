//! Throughput extraction from traffic generator output.

use std::sync::LazyLock;

use regex::Regex;

/// The output held no `<number> [K|M|G]bits/sec` figure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("no throughput figure found in generator output")]
pub struct ParseFailure;

/// Compiled patterns for generator output
pub struct ThroughputPatterns {
    /// Match: "74.3 Mbits/sec", "950 Kbits/sec", "1.02 Gbits/sec"
    pub rate: Regex,
}

impl ThroughputPatterns {
    pub fn new() -> Self {
        Self {
            rate: Regex::new(r"(\d+(?:\.\d+)?)\s*([KMG]?)bits/sec").expect("Invalid rate regex"),
        }
    }
}

impl Default for ThroughputPatterns {
    fn default() -> Self {
        Self::new()
    }
}

pub static PATTERNS: LazyLock<ThroughputPatterns> = LazyLock::new(ThroughputPatterns::new);

/// First rate figure in `raw`, normalised to Mbps.
///
/// ```
/// use fabricbench::analysis::throughput::parse_throughput;
///
/// assert_eq!(parse_throughput("[  3]  0.0-30.0 sec   265 MBytes  74.3 Mbits/sec"), Ok(74.3));
/// assert!(parse_throughput("garbage").is_err());
/// ```
pub fn parse_throughput(raw: &str) -> Result<f64, ParseFailure> {
    let caps = PATTERNS.rate.captures(raw).ok_or(ParseFailure)?;
    let value: f64 = caps[1].parse().map_err(|_| ParseFailure)?;
    let mbps = match &caps[2] {
        "K" => value / 1000.0,
        "M" => value,
        "G" => value * 1000.0,
        _ => value / 1_000_000.0,
    };
    Ok(mbps)
}
