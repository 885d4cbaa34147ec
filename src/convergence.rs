//! Waiting for the loop-prevention protocol before traffic starts.
//!
//! Fabrics without redundant paths skip the wait entirely. The fixed policy
//! sleeps for a settle time and cannot tell a slow protocol from a fast one;
//! the poll policy probes reachability until every host pair answers.

use std::fmt;
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;
use tokio::time::{sleep, Instant};

use crate::platform::{Platform, PlatformError};
use crate::topology::Topology;

/// Upper bound on the delay between two reachability probes
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(8);
const FIRST_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum ConvergencePolicy {
    /// Sleep for `settle`, or the topology's estimate when unset
    Fixed { settle: Option<Duration> },
    /// Probe with `ping_all`, doubling the interval up to `max_interval`
    Poll {
        initial_delay: Duration,
        max_wait: Duration,
        max_interval: Duration,
    },
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        ConvergencePolicy::Fixed { settle: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConvergenceOutcome {
    /// No redundant paths, nothing to wait for
    Skipped,
    Waited {
        #[serde(with = "humantime_serde")]
        settle: Duration,
    },
    Converged {
        #[serde(with = "humantime_serde")]
        after: Duration,
        attempts: u32,
    },
    TimedOut {
        #[serde(with = "humantime_serde")]
        after: Duration,
        attempts: u32,
    },
}

impl fmt::Display for ConvergenceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => write!(f, "not required (no redundant paths)"),
            Self::Waited { settle } => write!(f, "waited {}s", settle.as_secs_f64()),
            Self::Converged { after, attempts } => {
                write!(f, "converged after {:.1}s ({} probes)", after.as_secs_f64(), attempts)
            }
            Self::TimedOut { after, attempts } => {
                write!(f, "NOT converged after {:.1}s ({} probes)", after.as_secs_f64(), attempts)
            }
        }
    }
}

/// Block until the fabric is ready for traffic according to `policy`.
///
/// Platform errors while probing are returned; a poll timeout is not an
/// error, it is reported as `TimedOut` and logged.
pub async fn await_convergence(
    topology: &Topology,
    platform: &dyn Platform,
    policy: &ConvergencePolicy,
) -> Result<ConvergenceOutcome, PlatformError> {
    if !topology.has_redundant_paths() {
        return Ok(ConvergenceOutcome::Skipped);
    }

    match policy {
        ConvergencePolicy::Fixed { settle } => {
            let settle = settle.unwrap_or_else(|| topology.convergence_estimate());
            info!("Waiting {}s for loop prevention to converge", settle.as_secs_f64());
            sleep(settle).await;
            Ok(ConvergenceOutcome::Waited { settle })
        }
        ConvergencePolicy::Poll {
            initial_delay,
            max_wait,
            max_interval,
        } => poll(platform, *initial_delay, *max_wait, *max_interval).await,
    }
}

async fn poll(
    platform: &dyn Platform,
    initial_delay: Duration,
    max_wait: Duration,
    max_interval: Duration,
) -> Result<ConvergenceOutcome, PlatformError> {
    let began = Instant::now();
    info!("Polling reachability for up to {}s", max_wait.as_secs_f64());
    sleep(initial_delay.min(max_wait)).await;

    let mut interval = FIRST_INTERVAL.min(max_interval);
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let matrix = platform.ping_all().await?;
        let elapsed = began.elapsed();
        if matrix.all_reachable() {
            info!("Converged after {:.1}s ({} probes)", elapsed.as_secs_f64(), attempts);
            return Ok(ConvergenceOutcome::Converged {
                after: elapsed,
                attempts,
            });
        }
        if elapsed >= max_wait {
            warn!(
                "Fabric did not converge within {}s, continuing anyway ({})",
                max_wait.as_secs_f64(),
                matrix.summary()
            );
            return Ok(ConvergenceOutcome::TimedOut {
                after: elapsed,
                attempts,
            });
        }
        sleep(interval.min(max_wait - elapsed)).await;
        interval = (interval * 2).min(max_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{SimBehavior, SimulatedPlatform};
    use crate::topology::{build, Shape};

    async fn started(shape: Shape, behavior: SimBehavior) -> (Topology, SimulatedPlatform) {
        let topo = Topology::new(shape.descriptor()).unwrap();
        let platform = SimulatedPlatform::new(behavior);
        build(&topo, &platform).await.unwrap();
        platform.start().await.unwrap();
        (topo, platform)
    }

    fn poll_policy(max_wait: u64) -> ConvergencePolicy {
        ConvergencePolicy::Poll {
            initial_delay: Duration::from_secs(2),
            max_wait: Duration::from_secs(max_wait),
            max_interval: DEFAULT_MAX_INTERVAL,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_without_redundancy() {
        let (topo, platform) = started(Shape::Star, SimBehavior::default()).await;
        let before = Instant::now();
        let outcome = await_convergence(&topo, &platform, &ConvergencePolicy::default()).await.unwrap();
        assert_eq!(outcome, ConvergenceOutcome::Skipped);
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_uses_hint_or_override() {
        let (topo, platform) = started(Shape::Ring, SimBehavior::default()).await;
        let outcome = await_convergence(&topo, &platform, &ConvergencePolicy::default()).await.unwrap();
        assert_eq!(outcome, ConvergenceOutcome::Waited { settle: Duration::from_secs(15) });

        let policy = ConvergencePolicy::Fixed {
            settle: Some(Duration::from_secs(3)),
        };
        let outcome = await_convergence(&topo, &platform, &policy).await.unwrap();
        assert_eq!(outcome, ConvergenceOutcome::Waited { settle: Duration::from_secs(3) });
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_backs_off_until_reachable() {
        let behavior = SimBehavior::default().with_stp_convergence(Duration::from_secs(10));
        let (topo, platform) = started(Shape::Ring, behavior).await;
        let outcome = await_convergence(&topo, &platform, &poll_policy(60)).await.unwrap();
        // Probes at 2, 3, 5, 9 and 17 seconds.
        assert_eq!(
            outcome,
            ConvergenceOutcome::Converged {
                after: Duration::from_secs(17),
                attempts: 5
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_and_continues() {
        let behavior = SimBehavior::default().with_stp_convergence(Duration::from_secs(600));
        let (topo, platform) = started(Shape::SpineLeaf, behavior).await;
        let outcome = await_convergence(&topo, &platform, &poll_policy(10)).await.unwrap();
        match outcome {
            ConvergenceOutcome::TimedOut { after, attempts } => {
                assert_eq!(after, Duration::from_secs(10));
                assert_eq!(attempts, 5);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_outcome_display() {
        let outcome = ConvergenceOutcome::Converged {
            after: Duration::from_millis(2500),
            attempts: 3,
        };
        assert_eq!(outcome.to_string(), "converged after 2.5s (3 probes)");
    }
}
