//! Engine configuration
//!
//! Loaded from a JSON file. Every field is optional:
//!
//! ```json
//! {
//!   "cache": { "enabled": true, "max_entries": 10000 },
//!   "log": { "min_severity": "info" },
//!   "evolution_log_path": "./evolution.jsonl",
//!   "default_tenant": "acme"
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::TenantId;
use crate::observability::Severity;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Invalid config JSON: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub log: LogConfig,

    /// JSON-lines evolution log; in-memory when absent
    #[serde(default)]
    pub evolution_log_path: Option<PathBuf>,

    /// Tenant used by the CLI when none is given
    #[serde(default)]
    pub default_tenant: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,
}

fn default_cache_enabled() -> bool {
    true
}
fn default_max_entries() -> usize {
    10_000
}
fn default_min_severity() -> Severity {
    Severity::Info
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_entries: default_max_entries(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            min_severity: default_min_severity(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            log: LogConfig::default(),
            evolution_log_path: None,
            default_tenant: None,
        }
    }
}

impl EngineConfig {
    /// Load and validate configuration from file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> ConfigResult<Self> {
        let config: EngineConfig =
            serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_entries must be > 0 when the cache is enabled".into(),
            ));
        }

        if let Some(tenant) = &self.default_tenant {
            TenantId::parse(tenant.as_str())
                .map_err(|e| ConfigError::Invalid(format!("default_tenant: {}", e)))?;
        }

        if self
            .evolution_log_path
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            return Err(ConfigError::Invalid("evolution_log_path must not be empty".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(config.log.min_severity, Severity::Info);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = EngineConfig::from_json(r#"{"cache": {"max_entries": 5}, "log": {"min_severity": "warn"}}"#).unwrap();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_entries, 5);
        assert_eq!(config.log.min_severity, Severity::Warn);
    }

    #[test]
    fn test_rejects_zero_entries() {
        let err = EngineConfig::from_json(r#"{"cache": {"max_entries": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        // A disabled cache needs no capacity
        assert!(EngineConfig::from_json(r#"{"cache": {"enabled": false, "max_entries": 0}}"#).is_ok());
    }

    #[test]
    fn test_rejects_bad_tenant_and_json() {
        assert!(matches!(
            EngineConfig::from_json(r#"{"default_tenant": "bad tenant"}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(EngineConfig::from_json("{"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("formwork.json");
        std::fs::write(&path, r#"{"default_tenant": "acme", "evolution_log_path": "/tmp/evo.jsonl"}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.default_tenant.as_deref(), Some("acme"));
        assert_eq!(config.evolution_log_path, Some(PathBuf::from("/tmp/evo.jsonl")));

        let missing = EngineConfig::load(&dir.path().join("missing.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
