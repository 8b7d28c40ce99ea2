use crate::core::errors::{Result, SkeinError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime configuration for a [`Context`](crate::Context)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkeinConfig {
    /// Route `cpu_bound` calls through the dedicated worker thread
    pub cpu_offload_enabled: bool,
    /// Thread name of the CPU worker
    pub cpu_worker_name: String,
    /// Deadline applied to joins that do not set their own
    pub default_join_timeout: Option<Duration>,
    /// Abort requests still running when a join deadline elapses
    pub cancel_on_timeout: bool,
}

impl Default for SkeinConfig {
    fn default() -> Self {
        Self {
            cpu_offload_enabled: true,
            cpu_worker_name: "skein-cpu".to_string(),
            default_join_timeout: None,
            cancel_on_timeout: false,
        }
    }
}

impl SkeinConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cpu_worker_name.trim().is_empty() {
            return Err(SkeinError::configuration_field(
                "cpu_worker_name cannot be empty",
                "cpu_worker_name",
            ));
        }
        if self.default_join_timeout == Some(Duration::ZERO) {
            return Err(SkeinError::configuration_field(
                "default_join_timeout must be greater than 0",
                "default_join_timeout",
            ));
        }
        Ok(())
    }

    /// Bounded joins that clean up after themselves, for services that
    /// cannot afford stragglers
    pub fn strict() -> Self {
        Self {
            default_join_timeout: Some(Duration::from_secs(30)),
            cancel_on_timeout: true,
            ..Self::default()
        }
    }

    /// Parse and validate a YAML document. Missing keys take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }
}
