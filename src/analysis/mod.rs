//! Result analysis for benchmark runs.
//!
//! Throughput parsing, per-group aggregation and report rendering.

pub mod aggregate;
pub mod report;
pub mod throughput;
pub mod types;

pub use aggregate::aggregate;
pub use report::{render_text, write_json_report};
pub use throughput::{parse_throughput, ParseFailure};
pub use types::*;
