use crate::config::Config;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::info;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

/// Load, parse and validate configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<Config> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open config file {}", config_path.display()))?;

    let config: Config = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse config file {}", config_path.display()))?;

    config.validate()?;

    Ok(config)
}

/// Command-line settings that take precedence over the YAML file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Replaces the duration of every scenario
    pub duration: Option<Duration>,
    pub json_report: Option<std::path::PathBuf>,
}

/// Apply CLI overrides and re-validate
pub fn apply_overrides(config: &mut Config, overrides: &CliOverrides) -> Result<()> {
    if let Some(duration) = overrides.duration {
        info!("Overriding scenario duration with {}s", duration.as_secs_f64());
        config.scenarios = config.scenarios();
        for scenario in &mut config.scenarios {
            scenario.duration = duration;
        }
    }
    if let Some(path) = &overrides.json_report {
        config.general.json_report = Some(path.clone());
    }

    config.validate()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Shape;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let yaml = r#"
general:
  log_level: debug
topology:
  shape: star
harness:
  timeout_margin: 5s
scenarios:
  - name: pair
    duration: 20s
    flows:
      - { client: h1, server: h3 }
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.harness.timeout_margin, Duration::from_secs(5));
        assert_eq!(config.scenarios().len(), 1);
        assert_eq!(config.general.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_load_rejects_invalid_topology() {
        let yaml = r#"
topology:
  custom:
    name: broken
    nodes:
      - { name: h1, role: host }
    links: []
"#;
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml).unwrap();

        let err = load_config(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid topology configuration"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/fabricbench.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to open config file"));
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = Config::for_shape(Shape::Star);
        let overrides = CliOverrides {
            duration: Some(Duration::from_secs(3)),
            json_report: Some("out.json".into()),
        };
        apply_overrides(&mut config, &overrides).unwrap();
        assert_eq!(config.scenarios.len(), 2);
        assert!(config.scenarios.iter().all(|s| s.duration == Duration::from_secs(3)));
        assert_eq!(config.general.json_report.as_deref(), Some(Path::new("out.json")));
    }
}
