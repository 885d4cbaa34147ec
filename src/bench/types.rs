//! Benchmark data types: flow specs, per-flow results and harness settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Transport a flow uses
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// TCP
    #[default]
    Stream,
    /// UDP
    Datagram,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Stream => "tcp",
            Transport::Datagram => "udp",
        }
    }
}

/// One client-to-server traffic flow
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FlowSpec {
    pub client: String,
    pub server: String,
    #[serde(default)]
    pub transport: Transport,
    /// Overrides the scenario duration for this flow
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
}

impl FlowSpec {
    pub fn new(client: impl Into<String>, server: impl Into<String>, transport: Transport) -> Self {
        Self {
            client: client.into(),
            server: server.into(),
            transport,
            duration: None,
        }
    }

    pub fn stream(client: &str, server: &str) -> Self {
        Self::new(client, server, Transport::Stream)
    }

    pub fn datagram(client: &str, server: &str) -> Self {
        Self::new(client, server, Transport::Datagram)
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// `client->server`, the identifier used in reports
    pub fn id(&self) -> String {
        format!("{}->{}", self.client, self.server)
    }
}

/// A named group of flows that run concurrently
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScenarioSpec {
    pub name: String,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub flows: Vec<FlowSpec>,
}

/// Progress of a single flow through the harness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    NotStarted,
    ServerUp,
    ClientRunning,
    Completed,
    Failed,
}

/// Final outcome of a flow
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FlowStatus {
    Completed,
    /// The client ran but its output held no throughput figure
    Unknown,
    Failed { reason: String },
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowStatus::Completed => write!(f, "completed"),
            FlowStatus::Unknown => write!(f, "unknown"),
            FlowStatus::Failed { reason } => write!(f, "failed ({})", reason),
        }
    }
}

/// What one flow produced
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BenchmarkResult {
    /// `client->server`
    pub flow: String,
    pub client: String,
    pub server: String,
    pub transport: Transport,
    #[serde(flatten)]
    pub status: FlowStatus,
    /// Present only for completed flows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput_mbps: Option<f64>,
    pub raw_output: String,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl BenchmarkResult {
    fn from_spec(spec: &FlowSpec, status: FlowStatus) -> Self {
        Self {
            flow: spec.id(),
            client: spec.client.clone(),
            server: spec.server.clone(),
            transport: spec.transport,
            status,
            throughput_mbps: None,
            raw_output: String::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn completed(spec: &FlowSpec, mbps: f64, raw_output: String, elapsed: Duration) -> Self {
        Self {
            throughput_mbps: Some(mbps),
            raw_output,
            elapsed,
            ..Self::from_spec(spec, FlowStatus::Completed)
        }
    }

    pub fn unknown(spec: &FlowSpec, raw_output: String, elapsed: Duration) -> Self {
        Self {
            raw_output,
            elapsed,
            ..Self::from_spec(spec, FlowStatus::Unknown)
        }
    }

    pub fn failed(spec: &FlowSpec, reason: impl Into<String>, raw_output: String, elapsed: Duration) -> Self {
        Self {
            raw_output,
            elapsed,
            ..Self::from_spec(spec, FlowStatus::Failed { reason: reason.into() })
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == FlowStatus::Completed
    }
}

fn default_generator() -> String {
    "iperf".to_string()
}

fn default_server_settle() -> Duration {
    Duration::from_secs(1)
}

fn default_timeout_margin() -> Duration {
    Duration::from_secs(15)
}

fn default_strict_roles() -> bool {
    true
}

/// How the harness launches and bounds the traffic generator
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HarnessSettings {
    /// Traffic generator binary
    #[serde(default = "default_generator")]
    pub generator: String,
    /// Pause between starting servers and starting clients
    #[serde(default = "default_server_settle", with = "humantime_serde")]
    pub server_settle: Duration,
    /// Extra time a client may run past its duration before it is killed
    #[serde(default = "default_timeout_margin", with = "humantime_serde")]
    pub timeout_margin: Duration,
    /// Reject batches where a host is both client and server
    #[serde(default = "default_strict_roles")]
    pub strict_roles: bool,
    /// Target rate for datagram flows, passed as `-b`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp_bandwidth: Option<String>,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            generator: default_generator(),
            server_settle: default_server_settle(),
            timeout_margin: default_timeout_margin(),
            strict_roles: default_strict_roles(),
            udp_bandwidth: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_yaml_defaults() {
        let flow: FlowSpec = serde_yaml::from_str("client: h1\nserver: h4\n").unwrap();
        assert_eq!(flow.transport, Transport::Stream);
        assert_eq!(flow.duration, None);
        assert_eq!(flow.id(), "h1->h4");

        let flow: FlowSpec = serde_yaml::from_str("{ client: h1, server: h4, transport: datagram, duration: 5s }").unwrap();
        assert_eq!(flow.transport, Transport::Datagram);
        assert_eq!(flow.duration, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_harness_settings_defaults() {
        let settings: HarnessSettings = serde_yaml::from_str("generator: iperf3").unwrap();
        assert_eq!(settings.generator, "iperf3");
        assert_eq!(settings.timeout_margin, Duration::from_secs(15));
        assert!(settings.strict_roles);
    }

    #[test]
    fn test_result_json_shape() {
        let spec = FlowSpec::stream("h1", "h3");
        let failed = BenchmarkResult::failed(&spec, "timed out", String::new(), Duration::from_secs(45));
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "timed out");
        assert_eq!(json["elapsed"], "45s");
        assert!(json.get("throughput_mbps").is_none());
    }
}
