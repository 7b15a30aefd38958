use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::SwarmConfig;

/// Configuration error types for the ambient swarm config.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid circuit breaker failure_threshold: {0}. Must be at least 1")]
    InvalidFailureThreshold(u32),

    #[error("Invalid run limits: {field} must be positive, got {value}")]
    InvalidRunLimit { field: &'static str, value: f64 },
}

/// Loads [`SwarmConfig`] with the same layering convention the rest of the
/// codebase family uses: programmatic defaults, then a project-local YAML
/// file, then `ABATHUR_`-prefixed environment variables (highest
/// precedence). Spec §6 names exactly one environment-visible knob
/// (`allow_global_fallback`); the rest of `SwarmConfig` (default
/// `RunLimits`, circuit breaker thresholds) is along for the ride because
/// it is plausible for an operator to want to tune them the same way.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load() -> Result<SwarmConfig> {
        let config: SwarmConfig = Figment::new()
            .merge(Serialized::defaults(SwarmConfig::default()))
            .merge(Yaml::file(".abathur-swarm/config.yaml"))
            .merge(Env::prefixed("ABATHUR_SWARM_").split("__"))
            .extract()
            .context("failed to extract swarm configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<SwarmConfig> {
        let config: SwarmConfig = Figment::new()
            .merge(Serialized::defaults(SwarmConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("failed to load swarm config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &SwarmConfig) -> Result<(), ConfigError> {
        if config.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold(0));
        }

        let limits = &config.default_run_limits;
        for (field, value) in [
            ("total_timeout_secs", limits.total_timeout_secs),
            ("agent_timeout_secs", limits.agent_timeout_secs),
            ("llm_timeout_secs", limits.llm_timeout_secs),
            ("scrape_timeout_secs", limits.scrape_timeout_secs),
        ] {
            if value <= 0.0 {
                return Err(ConfigError::InvalidRunLimit { field, value });
            }
        }

        Ok(())
    }
}
