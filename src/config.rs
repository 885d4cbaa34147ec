use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::bench::harness::preflight;
use crate::bench::scenarios;
use crate::bench::types::{HarnessSettings, ScenarioSpec};
use crate::convergence::{ConvergencePolicy, DEFAULT_MAX_INTERVAL};
use crate::topology::{Shape, Topology, TopologyDescriptor, TopologyError};

/// Log levels accepted in `general.log_level`
const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

/// Which emulation backend drives the run
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    /// Linux namespaces, veth pairs and Open vSwitch (needs root)
    #[default]
    Netns,
    /// In-process model, no privileges needed
    Simulated,
}

/// Complete run configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    pub topology: TopologySource,
    #[serde(default)]
    pub convergence: ConvergenceConfig,
    #[serde(default)]
    pub harness: HarnessSettings,
    /// Falls back to the shape's built-in scenarios when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scenarios: Vec<ScenarioSpec>,
}

impl Config {
    /// Configuration for a built-in shape with every default
    pub fn for_shape(shape: Shape) -> Self {
        Self {
            general: GeneralConfig::default(),
            topology: TopologySource::Builtin { shape },
            convergence: ConvergenceConfig::default(),
            harness: HarnessSettings::default(),
            scenarios: Vec::new(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(level) = &self.general.log_level {
            if !LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
                return Err(ValidationError::InvalidGeneral(format!(
                    "log_level '{}' is not one of {}",
                    level,
                    LOG_LEVELS.join(", ")
                )));
            }
        }

        let topology = self
            .topology()
            .map_err(|e| ValidationError::InvalidTopology(e.to_string()))?;

        self.convergence.validate()?;

        if self.harness.generator.trim().is_empty() {
            return Err(ValidationError::InvalidHarness("generator cannot be empty".to_string()));
        }
        if self.harness.timeout_margin.is_zero() {
            return Err(ValidationError::InvalidHarness("timeout_margin must be positive".to_string()));
        }
        if matches!(&self.harness.udp_bandwidth, Some(rate) if rate.trim().is_empty()) {
            return Err(ValidationError::InvalidHarness("udp_bandwidth cannot be empty".to_string()));
        }

        for scenario in &self.scenarios {
            if scenario.name.trim().is_empty() {
                return Err(ValidationError::InvalidScenario("scenario name cannot be empty".to_string()));
            }
            if scenario.duration.is_zero() {
                return Err(ValidationError::InvalidScenario(format!(
                    "'{}': duration must be positive",
                    scenario.name
                )));
            }
            preflight(&topology, &scenario.name, &scenario.flows, self.harness.strict_roles)
                .map_err(|e| ValidationError::InvalidScenario(format!("'{}': {}", scenario.name, e)))?;
        }

        Ok(())
    }

    /// Validated topology this configuration describes
    pub fn topology(&self) -> Result<Topology, TopologyError> {
        Topology::new(self.topology.descriptor())
    }

    /// Configured scenarios, or the shape's built-ins when none are given
    pub fn scenarios(&self) -> Vec<ScenarioSpec> {
        match (&self.topology, self.scenarios.is_empty()) {
            (TopologySource::Builtin { shape }, true) => scenarios::builtin(*shape),
            _ => self.scenarios.clone(),
        }
    }
}

/// Shared general configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct GeneralConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Also write the run report here as JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_report: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformKind>,
}

/// Where the fabric comes from: a built-in shape or an inline descriptor
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum TopologySource {
    Builtin { shape: Shape },
    Custom { custom: TopologyDescriptor },
}

impl TopologySource {
    pub fn descriptor(&self) -> TopologyDescriptor {
        match self {
            TopologySource::Builtin { shape } => shape.descriptor(),
            TopologySource::Custom { custom } => custom.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceMode {
    #[default]
    Fixed,
    Poll,
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_wait() -> Duration {
    Duration::from_secs(60)
}

fn default_max_interval() -> Duration {
    DEFAULT_MAX_INTERVAL
}

/// How long to wait for loop prevention before traffic
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConvergenceConfig {
    #[serde(default)]
    pub mode: ConvergenceMode,
    /// Fixed settle time; defaults to the topology's estimate
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub settle: Option<Duration>,
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(default = "default_max_wait", with = "humantime_serde")]
    pub max_wait: Duration,
    #[serde(default = "default_max_interval", with = "humantime_serde")]
    pub max_interval: Duration,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            mode: ConvergenceMode::Fixed,
            settle: None,
            initial_delay: default_initial_delay(),
            max_wait: default_max_wait(),
            max_interval: default_max_interval(),
        }
    }
}

impl ConvergenceConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.mode == ConvergenceMode::Poll {
            if self.max_wait.is_zero() {
                return Err(ValidationError::InvalidConvergence("max_wait must be positive".to_string()));
            }
            if self.max_interval.is_zero() {
                return Err(ValidationError::InvalidConvergence(
                    "max_interval must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn policy(&self) -> ConvergencePolicy {
        match self.mode {
            ConvergenceMode::Fixed => ConvergencePolicy::Fixed { settle: self.settle },
            ConvergenceMode::Poll => ConvergencePolicy::Poll {
                initial_delay: self.initial_delay,
                max_wait: self.max_wait,
                max_interval: self.max_interval,
            },
        }
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid general configuration: {0}")]
    InvalidGeneral(String),
    #[error("Invalid topology configuration: {0}")]
    InvalidTopology(String),
    #[error("Invalid convergence configuration: {0}")]
    InvalidConvergence(String),
    #[error("Invalid harness configuration: {0}")]
    InvalidHarness(String),
    #[error("Invalid scenario configuration: {0}")]
    InvalidScenario(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::types::FlowSpec;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_builtin_shape_source() {
        let config = parse("topology:\n  shape: spine-leaf\n");
        assert!(matches!(config.topology, TopologySource::Builtin { shape: Shape::SpineLeaf }));
        assert!(config.validate().is_ok());
        assert_eq!(config.scenarios().len(), 2);
        assert_eq!(config.convergence.policy(), ConvergencePolicy::Fixed { settle: None });
    }

    #[test]
    fn test_custom_topology_source() {
        let yaml = r#"
topology:
  custom:
    name: pair
    nodes:
      - { name: s1, role: switch }
      - { name: h1, role: host }
      - { name: h2, role: host }
    links:
      - { a: h1, b: s1, bandwidth_mbps: 10, delay: 5ms }
      - { a: h2, b: s1, bandwidth_mbps: 10, delay: 5ms }
scenarios:
  - name: one way
    duration: 10s
    flows:
      - { client: h1, server: h2 }
"#;
        let config = parse(yaml);
        config.validate().unwrap();
        let topology = config.topology().unwrap();
        assert_eq!(topology.name(), "pair");
        assert_eq!(topology.links()[0].params.delay, Duration::from_millis(5));
        assert_eq!(config.scenarios()[0].duration, Duration::from_secs(10));
    }

    #[test]
    fn test_poll_policy() {
        let config = parse("topology: { shape: ring }\nconvergence:\n  mode: poll\n  max_wait: 30s\n");
        assert_eq!(
            config.convergence.policy(),
            ConvergencePolicy::Poll {
                initial_delay: Duration::from_secs(2),
                max_wait: Duration::from_secs(30),
                max_interval: DEFAULT_MAX_INTERVAL,
            }
        );
    }

    #[test]
    fn test_rejects_bad_scenario() {
        let yaml = "topology: { shape: star }\nscenarios:\n  - name: loop\n    duration: 5s\n    flows:\n      - { client: h1, server: h9 }\n";
        assert!(matches!(parse(yaml).validate(), Err(ValidationError::InvalidScenario(_))));

        let yaml = "topology: { shape: star }\nscenarios:\n  - name: swap\n    duration: 5s\n    flows:\n      - { client: h1, server: h2 }\n      - { client: h2, server: h1 }\n";
        assert!(matches!(parse(yaml).validate(), Err(ValidationError::InvalidScenario(_))));
    }

    #[test]
    fn test_rejects_bad_general_and_harness() {
        let mut config = Config::for_shape(Shape::Star);
        config.general.log_level = Some("loud".to_string());
        assert!(matches!(config.validate(), Err(ValidationError::InvalidGeneral(_))));

        let mut config = Config::for_shape(Shape::Star);
        config.harness.generator = " ".to_string();
        assert!(matches!(config.validate(), Err(ValidationError::InvalidHarness(_))));
    }

    #[test]
    fn test_custom_scenarios_replace_builtins() {
        let mut config = Config::for_shape(Shape::Star);
        config.scenarios = vec![ScenarioSpec {
            name: "only".to_string(),
            duration: Duration::from_secs(1),
            flows: vec![FlowSpec::stream("h1", "h2")],
        }];
        assert!(config.validate().is_ok());
        assert_eq!(config.scenarios().len(), 1);
        assert_eq!(config.scenarios()[0].name, "only");
    }
}
