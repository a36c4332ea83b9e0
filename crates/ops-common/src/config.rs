//! Configuration for the ops engine
//!
//! All tunables are read once at startup, either from the environment or
//! from an optional TOML file. Every field has a sane default.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub policy: PolicyConfig,
    pub executor: ExecutorConfig,
    pub catalog: CatalogConfig,
    pub loops: LoopConfig,
}

/// Policy engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Maximum autonomous executions per action per hour
    pub max_executions_per_hour: usize,
    /// Failures within the window before the circuit opens
    pub circuit_breaker_threshold: usize,
    /// Circuit breaker failure window
    pub circuit_breaker_window_minutes: u64,
}

/// Safe executor tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Default subprocess timeout in seconds
    pub default_timeout_seconds: u64,
    /// Sliding-window subprocess rate limit
    pub max_executions_per_minute: usize,
    /// Append-only audit log path
    pub audit_log_path: PathBuf,
}

/// Action catalog location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Directory of declarative action definitions (*.toml)
    pub actions_dir: PathBuf,
}

/// Periodic loop intervals
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub health_quick_interval_seconds: u64,
    pub health_deep_interval_seconds: u64,
    pub optimizer_interval_seconds: u64,
    pub security_interval_seconds: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_executions_per_hour: 100,
            circuit_breaker_threshold: 5,
            circuit_breaker_window_minutes: 15,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 60,
            max_executions_per_minute: 20,
            audit_log_path: PathBuf::from("/var/log/ops-engine/audit.log"),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            actions_dir: PathBuf::from("actions"),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            health_quick_interval_seconds: 120,
            health_deep_interval_seconds: 300,
            optimizer_interval_seconds: 1800,
            security_interval_seconds: 3600,
        }
    }
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            executor: ExecutorConfig::default(),
            catalog: CatalogConfig::default(),
            loops: LoopConfig::default(),
        }
    }
}

impl OpsConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read config {}: {}", path.display(), e))
        })?;
        toml::from_str(&raw)
            .map_err(|e| Error::Configuration(format!("invalid config {}: {}", path.display(), e)))
    }

    /// Build configuration from the environment, falling back to defaults.
    /// Unparseable values are a startup error, not a silent fallback.
    pub fn from_env() -> Result<Self> {
        let mut config = OpsConfig::default();

        if let Some(v) = read_env("OPS_MAX_EXECUTIONS_PER_HOUR")? {
            config.policy.max_executions_per_hour = v;
        }
        if let Some(v) = read_env("OPS_CIRCUIT_BREAKER_THRESHOLD")? {
            config.policy.circuit_breaker_threshold = v;
        }
        if let Some(v) = read_env("OPS_CIRCUIT_BREAKER_WINDOW_MINUTES")? {
            config.policy.circuit_breaker_window_minutes = v;
        }
        if let Some(v) = read_env("OPS_DEFAULT_TIMEOUT_SECONDS")? {
            config.executor.default_timeout_seconds = v;
        }
        if let Some(v) = read_env("OPS_MAX_EXECUTIONS_PER_MINUTE")? {
            config.executor.max_executions_per_minute = v;
        }
        if let Ok(path) = std::env::var("OPS_AUDIT_LOG_PATH") {
            config.executor.audit_log_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("OPS_ACTIONS_DIR") {
            config.catalog.actions_dir = PathBuf::from(path);
        }

        Ok(config)
    }
}

fn read_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Configuration(format!("invalid {}={}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = OpsConfig::default();
        assert_eq!(config.policy.max_executions_per_hour, 100);
        assert_eq!(config.policy.circuit_breaker_threshold, 5);
        assert_eq!(config.executor.default_timeout_seconds, 60);
        assert_eq!(config.executor.max_executions_per_minute, 20);
    }

    #[test]
    fn partial_file_keeps_defaults_elsewhere() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[policy]\nmax_executions_per_hour = 7").unwrap();

        let config = OpsConfig::from_file(file.path()).unwrap();
        assert_eq!(config.policy.max_executions_per_hour, 7);
        assert_eq!(config.policy.circuit_breaker_threshold, 5);
        assert_eq!(config.loops.security_interval_seconds, 3600);
    }
}
