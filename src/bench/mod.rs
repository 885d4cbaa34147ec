//! Concurrent traffic benchmark.

pub mod generator;
pub mod harness;
pub mod scenarios;
pub mod types;

pub use harness::{preflight, run_flows, run_scenarios, HarnessError};
pub use types::{BenchmarkResult, FlowSpec, FlowState, FlowStatus, HarnessSettings, ScenarioSpec, Transport};
