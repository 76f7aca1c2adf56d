//! Pool configuration
//!
//! Sizing, timeout, and queue policy for a [`WorkerPool`](crate::pool::WorkerPool).
//! Every field has a default, so a TOML file only needs the values it changes:
//!
//! ```toml
//! concurrency = 2
//! max_concurrency = 5
//! render_timeout_ms = 30000
//! max_queue_depth = 100
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::PoolError;

/// Configuration for a worker pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Workers created at launch and kept alive (default: 2)
    pub concurrency: usize,
    /// Hard ceiling on live workers (default: 5)
    pub max_concurrency: usize,
    /// Per-job render bound in milliseconds (default: 30000)
    pub render_timeout_ms: u64,
    /// How long a timed-out renderer gets to prove it is still alive (default: 2000)
    pub health_check_timeout_ms: u64,
    /// Maximum time a job may wait for a worker; `None` waits forever
    pub queue_timeout_ms: Option<u64>,
    /// Maximum number of queued jobs; `None` is unbounded
    pub max_queue_depth: Option<usize>,
    /// Idle time after which workers above `concurrency` are retired (default: 60000)
    pub idle_timeout_ms: u64,
    /// Supervisor tick in milliseconds (default: 1000)
    pub supervisor_interval_ms: u64,
    /// Delay between failed worker creation attempts (default: 250)
    pub restart_backoff_ms: u64,
    /// Creation attempts per replacement before giving up (default: 5)
    pub max_restart_attempts: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_concurrency: 5,
            render_timeout_ms: 30_000,
            health_check_timeout_ms: 2_000,
            queue_timeout_ms: None,
            max_queue_depth: None,
            idle_timeout_ms: 60_000,
            supervisor_interval_ms: 1_000,
            restart_backoff_ms: 250,
            max_restart_attempts: 5,
        }
    }
}

impl PoolConfig {
    /// Create a config with the given warm size and ceiling, other values default
    pub fn new(concurrency: usize, max_concurrency: usize) -> Self {
        Self {
            concurrency,
            max_concurrency,
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse.
    /// Values are not validated here; [`validate`](Self::validate) runs at launch.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("Failed to parse TOML pool configuration")
    }

    /// Check the invariants the scheduler relies on
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.concurrency == 0 {
            return Err(PoolError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(PoolError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.concurrency > self.max_concurrency {
            return Err(PoolError::InvalidConfig(format!(
                "concurrency ({}) exceeds max_concurrency ({})",
                self.concurrency, self.max_concurrency
            )));
        }
        if self.render_timeout_ms == 0 {
            return Err(PoolError::InvalidConfig(
                "render_timeout_ms must be positive".to_string(),
            ));
        }
        if self.max_queue_depth == Some(0) {
            return Err(PoolError::InvalidConfig(
                "max_queue_depth must be positive when set".to_string(),
            ));
        }
        if self.supervisor_interval_ms == 0 {
            return Err(PoolError::InvalidConfig(
                "supervisor_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn queue_timeout(&self) -> Option<Duration> {
        self.queue_timeout_ms.map(Duration::from_millis)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn supervisor_interval(&self) -> Duration {
        Duration::from_millis(self.supervisor_interval_ms)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_defaults_match_service_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.max_concurrency, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = PoolConfig::from_toml_str(
            r#"
            concurrency = 3
            max_concurrency = 8
            max_queue_depth = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.concurrency, 3);
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.max_queue_depth, Some(50));
        assert_eq!(config.render_timeout_ms, 30_000);
        assert_eq!(config.queue_timeout_ms, None);
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(PoolConfig::from_toml_str("concurrency = \"many\"").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = PoolConfig::from_file("/nonexistent/pool.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_rejects_zero_sizes() {
        assert!(PoolConfig::new(0, 5).validate().is_err());
        assert!(PoolConfig::new(0, 0).validate().is_err());
    }

    #[test]
    fn test_rejects_zero_queue_depth() {
        let config = PoolConfig {
            max_queue_depth: Some(0),
            ..PoolConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PoolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_zero_render_timeout() {
        let config = PoolConfig {
            render_timeout_ms: 0,
            ..PoolConfig::default()
        };
        assert!(config.validate().is_err());
    }

    proptest! {
        /// Property: a config is valid exactly when 1 <= concurrency <= max_concurrency
        #[test]
        fn sizing_validity(concurrency in 0usize..20, max in 0usize..20) {
            let valid = PoolConfig::new(concurrency, max).validate().is_ok();
            prop_assert_eq!(valid, concurrency >= 1 && concurrency <= max);
        }
    }
}
