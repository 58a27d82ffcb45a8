//! Config file loading and validation

use std::collections::HashSet;
use std::path::Path;

use crate::config::Config;
use crate::error::{ConfigError, Result};

/// Load and validate a YAML config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
        path: path.display().to_string(),
        source,
    })?;
    let config: Config = serde_yaml::from_str(&raw)?;
    validate(&config)?;
    Ok(config)
}

/// Startup validation: configuration errors fail fast.
pub fn validate(config: &Config) -> Result<()> {
    let mut seen = HashSet::new();
    for instance in &config.client.instances {
        if !seen.insert(instance.id.as_str()) {
            return Err(ConfigError::DuplicateInstanceId(instance.id.clone()));
        }
        if instance.genesis.is_empty() {
            return Err(ConfigError::InvalidInstance {
                id: instance.id.clone(),
                message: "genesis source is required".to_string(),
            });
        }
    }

    for source in &config.suite.sources {
        if source.git.is_some() == source.local_dir.is_some() {
            return Err(ConfigError::AmbiguousSuiteSource);
        }
    }

    if !config.client.instances.is_empty() {
        if config.suite.sources.is_empty() {
            return Err(ConfigError::NoSuiteSources);
        }
        // Surfaces a malformed secret before any container is provisioned.
        config.run.jwt_secret()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Frequency, NamedFrequency, PullPolicy};
    use std::io::Write;

    const VALID_CONFIG: &str = r#"
client:
  instances:
    - id: geth-default
      client: geth
      genesis: https://example.com/genesis.json
      pull_policy: always
      cpu_freq:
        frequency: MAX
        turbo: false
        governor: performance
suite:
  sources:
    - local_dir: ./fixtures
  filter: cancun
run:
  results_dir: ./results
  docker_network: bench-net
  jwt: "0x688f5d737bad920bdfb2fc2f488d6b6209eebda1dae949a8de91398d932c517a"
  ready_timeout: 60
indexer:
  enabled: true
  interval: 30
  concurrency: 2
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn test_load_valid_config() {
        let file = write_config(VALID_CONFIG);
        let config = load_config(file.path()).expect("config should load");

        assert_eq!(config.client.instances.len(), 1);
        let instance = &config.client.instances[0];
        assert_eq!(instance.id, "geth-default");
        assert_eq!(instance.pull_policy, PullPolicy::Always);

        let cpu_freq = instance.cpu_freq.as_ref().expect("cpu_freq");
        assert_eq!(cpu_freq.frequency, Some(Frequency::Named(NamedFrequency::Max)));
        assert_eq!(cpu_freq.turbo, Some(false));

        assert_eq!(config.run.effective_ready_timeout(), 60);
        assert_eq!(config.indexer.interval, 30);
        config.run.jwt_secret().expect("valid secret");
    }

    #[test]
    fn test_exact_frequency_khz() {
        let yaml = "frequency: 2400000\ncpus: [0, 1]\n";
        let cpu_freq: crate::config::CpuFreqConfig = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(cpu_freq.frequency, Some(Frequency::KHz(2_400_000)));
        assert_eq!(cpu_freq.cpus, vec![0, 1]);
    }

    #[test]
    fn test_zero_ready_timeout_uses_default() {
        let config = Config::default();
        assert_eq!(config.run.effective_ready_timeout(), 120);
    }

    #[test]
    fn test_duplicate_instance_id_rejected() {
        let yaml = VALID_CONFIG.replace(
            "suite:",
            "    - id: geth-default\n      client: geth\n      genesis: ./genesis.json\nsuite:",
        );
        let file = write_config(&yaml);
        let err = load_config(file.path()).expect_err("duplicate id");
        assert!(matches!(err, ConfigError::DuplicateInstanceId(_)));
    }

    #[test]
    fn test_jwt_secret_must_be_32_bytes() {
        let yaml = VALID_CONFIG.replace(
            "0x688f5d737bad920bdfb2fc2f488d6b6209eebda1dae949a8de91398d932c517a",
            "0xdeadbeef",
        );
        let file = write_config(&yaml);
        let err = load_config(file.path()).expect_err("short secret");
        assert!(matches!(err, ConfigError::InvalidJwtSecret(_)));
    }

    #[test]
    fn test_source_must_be_git_xor_local() {
        let yaml = VALID_CONFIG.replace("- local_dir: ./fixtures", "- {}");
        let file = write_config(&yaml);
        let err = load_config(file.path()).expect_err("empty source");
        assert!(matches!(err, ConfigError::AmbiguousSuiteSource));
    }
}
