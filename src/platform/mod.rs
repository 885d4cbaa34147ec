//! Network emulation platform.
//!
//! The core never creates namespaces or bridges itself; it talks to a
//! `Platform` implementation. `NetnsPlatform` drives a real Linux host,
//! `SimulatedPlatform` answers in-process for dry runs and tests.

pub mod command;
pub mod netns;
pub mod simulated;

use async_trait::async_trait;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::topology::types::{LinkParams, SwitchOptions};

pub use command::{run_bounded, ExecOutput};
pub use netns::NetnsPlatform;
pub use simulated::{SimBehavior, SimulatedPlatform};

/// Errors reported by a platform backend
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Failed to launch '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' failed (status {status:?}): {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Command '{command}' timed out after {limit:?}")]
    Timeout { command: String, limit: Duration },

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Platform rejected {operation}: {reason}")]
    Rejected { operation: String, reason: String },
}

/// All-pairs reachability between hosts, as reported by `ping_all`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReachabilityMatrix {
    pub hosts: Vec<String>,
    /// `reachable[i][j]`: host i reached host j. The diagonal is unused.
    pub reachable: Vec<Vec<bool>>,
}

impl ReachabilityMatrix {
    pub fn new(hosts: Vec<String>) -> Self {
        let n = hosts.len();
        Self {
            hosts,
            reachable: vec![vec![false; n]; n],
        }
    }

    /// Number of probes sent (every ordered pair of distinct hosts)
    pub fn sent(&self) -> usize {
        let n = self.hosts.len();
        n * n.saturating_sub(1)
    }

    pub fn received(&self) -> usize {
        self.pairs().filter(|&(i, j)| self.reachable[i][j]).count()
    }

    pub fn drop_percent(&self) -> f64 {
        let sent = self.sent();
        if sent == 0 {
            return 0.0;
        }
        100.0 * (sent - self.received()) as f64 / sent as f64
    }

    pub fn all_reachable(&self) -> bool {
        self.received() == self.sent()
    }

    /// Ordered pairs that could not reach each other
    pub fn unreachable_pairs(&self) -> Vec<(String, String)> {
        self.pairs()
            .filter(|&(i, j)| !self.reachable[i][j])
            .map(|(i, j)| (self.hosts[i].clone(), self.hosts[j].clone()))
            .collect()
    }

    fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let n = self.hosts.len();
        (0..n).flat_map(move |i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
    }

    /// One-line summary in the classic `pingall` format
    pub fn summary(&self) -> String {
        format!(
            "Results: {:.0}% dropped ({}/{} received)",
            self.drop_percent(),
            self.received(),
            self.sent()
        )
    }
}

/// Operations the core needs from an emulation runtime.
///
/// Implementations must be safe to share between the concurrent flow tasks.
/// `exec` must not outlive `limit`: the spawned process is terminated on
/// timeout and whenever the returned future is dropped.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn create_host(&self, name: &str) -> Result<(), PlatformError>;

    async fn create_switch(&self, name: &str, options: &SwitchOptions) -> Result<(), PlatformError>;

    async fn create_link(&self, a: &str, b: &str, params: &LinkParams) -> Result<(), PlatformError>;

    /// Install a catch-all "normal forwarding" rule on a plain switch
    async fn set_default_forwarding(&self, switch: &str) -> Result<(), PlatformError>;

    async fn start(&self) -> Result<(), PlatformError>;

    /// Tear everything down. Safe to call more than once and after a
    /// partial build.
    async fn stop(&self) -> Result<(), PlatformError>;

    async fn ping_all(&self) -> Result<ReachabilityMatrix, PlatformError>;

    /// Run `argv` on `node` and capture its output
    async fn exec(&self, node: &str, argv: &[String], limit: Duration) -> Result<ExecOutput, PlatformError>;

    /// Start a long-running process on `node` in the background
    async fn spawn_daemon(&self, node: &str, argv: &[String]) -> Result<(), PlatformError>;

    /// Stop every background process started on `node`. Idempotent.
    async fn kill_daemons(&self, node: &str) -> Result<(), PlatformError>;

    async fn ip_of(&self, host: &str) -> Option<Ipv4Addr>;
}
