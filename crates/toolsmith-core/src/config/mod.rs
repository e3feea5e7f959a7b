//! Generation configuration record.
//!
//! Every field is optional in YAML and falls back to the defaults below. The
//! generator output is fully determined by a schema plus one of these records.
//!
//! ```yaml
//! ops: [read, insert]
//! rbac:
//!   audit_log: [read]
//! max_limit: 200
//! auth_mode: api-key
//! cache_ttl: 30
//! ```

pub mod ops;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub use ops::{OpSet, Operation};

/// How generated tools authenticate callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    #[default]
    None,
    /// Every call must present the shared secret from `MCP_API_KEY`.
    ApiKey,
}

/// Where the generated read-through cache keeps entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

/// Cosmetic formatting applied to generated source after it parses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatStrategy {
    #[default]
    Prettyplease,
    /// External `rustfmt` process, best effort.
    Rustfmt,
    None,
}

/// Configuration record consumed by the code generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Globally enabled operation families.
    #[serde(default = "default_ops")]
    pub ops: OpSet,

    /// Per-table override of `ops`, keyed by lowercase table name. An entry
    /// fully replaces the global set for that table.
    #[serde(default)]
    pub rbac: BTreeMap<String, OpSet>,

    /// Emit embedding-based search and index rebuild tools.
    #[serde(default)]
    pub semantic: bool,

    #[serde(default = "default_limit")]
    pub default_limit: u32,

    /// Hard cap applied server-side to every requested `limit`.
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,

    /// Structured execution logging around every tool.
    #[serde(default)]
    pub audit: bool,

    /// Tracing spans around every tool.
    #[serde(default)]
    pub otel: bool,

    /// Above this many tables, generate the consolidated generic tool set.
    #[serde(default = "default_consolidate_threshold")]
    pub consolidate_threshold: usize,

    /// Force TLS for network database connections.
    #[serde(default)]
    pub ssl_enabled: bool,

    #[serde(default)]
    pub auth_mode: AuthMode,

    /// Emit async tool bodies and clients instead of blocking ones.
    #[serde(default)]
    pub async_mode: bool,

    /// Read cache lifetime in seconds; 0 disables caching.
    #[serde(default)]
    pub cache_ttl: u64,

    #[serde(default)]
    pub cache_backend: CacheBackend,

    /// Token-bucket refill rate in requests per second.
    #[serde(default)]
    pub rate_limit: Option<f64>,

    /// Webhook subscription tools and post-mutation dispatch.
    #[serde(default)]
    pub webhooks: bool,

    #[serde(default)]
    pub format: FormatStrategy,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            ops: default_ops(),
            rbac: BTreeMap::new(),
            semantic: false,
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            audit: false,
            otel: false,
            consolidate_threshold: default_consolidate_threshold(),
            ssl_enabled: false,
            auth_mode: AuthMode::None,
            async_mode: false,
            cache_ttl: 0,
            cache_backend: CacheBackend::Memory,
            rate_limit: None,
            webhooks: false,
            format: FormatStrategy::Prettyplease,
        }
    }
}

// Default value functions
fn default_ops() -> OpSet {
    OpSet::read_only()
}

fn default_limit() -> u32 {
    50
}

fn default_max_limit() -> u32 {
    500
}

fn default_consolidate_threshold() -> usize {
    20
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GeneratorConfig {
    /// Load and validate configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: GeneratorConfig = serde_yaml::from_str(content)?;
        config.validate()
    }

    /// Reject values no generated server can run with, without normalizing.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.max_limit == 0 {
            return Err(ConfigError::Config("max_limit must be at least 1".to_string()));
        }
        if let Some(rate) = self.rate_limit {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(ConfigError::Config(format!(
                    "rate_limit must be a positive number of requests per second, got {}",
                    rate
                )));
            }
        }
        Ok(())
    }

    /// Check limits and normalize the RBAC map.
    ///
    /// `max_limit` must be positive and `default_limit` is clamped into
    /// `1..=max_limit`. RBAC keys are lowercased.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        self.check()?;
        let clamped = self.default_limit.clamp(1, self.max_limit);
        if clamped != self.default_limit {
            tracing::warn!(
                default_limit = self.default_limit,
                max_limit = self.max_limit,
                "default_limit outside 1..=max_limit; clamped to {}",
                clamped
            );
            self.default_limit = clamped;
        }
        self.rbac = std::mem::take(&mut self.rbac)
            .into_iter()
            .map(|(table, ops)| (table.to_lowercase(), ops))
            .collect();
        Ok(self)
    }

    /// Operation set that applies to `table` after RBAC resolution.
    pub fn effective_ops(&self, table: &str) -> &OpSet {
        self.rbac.get(&table.to_lowercase()).unwrap_or(&self.ops)
    }

    pub fn caching(&self) -> bool {
        self.cache_ttl > 0
    }

    /// Consolidated mode applies when the table count exceeds the threshold.
    pub fn consolidates(&self, table_count: usize) -> bool {
        table_count > self.consolidate_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GeneratorConfig::from_yaml("{}").unwrap();
        assert_eq!(config, GeneratorConfig::default());
        assert_eq!(config.ops, OpSet::read_only());
        assert_eq!(config.default_limit, 50);
        assert_eq!(config.max_limit, 500);
        assert_eq!(config.consolidate_threshold, 20);
        assert_eq!(config.format, FormatStrategy::Prettyplease);
        assert!(!config.caching());
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
ops: [read, insert]
rbac:
  Orders: [read, update]
max_limit: 200
default_limit: 20
auth_mode: api-key
async_mode: true
cache_ttl: 30
cache_backend: redis
rate_limit: 5.5
webhooks: true
format: none
"#;
        let config = GeneratorConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.auth_mode, AuthMode::ApiKey);
        assert_eq!(config.cache_backend, CacheBackend::Redis);
        assert_eq!(config.rate_limit, Some(5.5));
        assert_eq!(config.format, FormatStrategy::None);
        assert!(config.rbac.contains_key("orders"));
    }

    #[test]
    fn test_rbac_entry_replaces_global_ops() {
        let mut config = GeneratorConfig {
            ops: OpSet::all(),
            ..Default::default()
        };
        config.rbac.insert("audit".into(), OpSet::read_only());

        assert_eq!(config.effective_ops("AUDIT"), &OpSet::read_only());
        assert_eq!(config.effective_ops("users"), &OpSet::all());
    }

    #[test]
    fn test_validate_limits() {
        let err = GeneratorConfig::from_yaml("max_limit: 0").unwrap_err();
        assert!(matches!(err, ConfigError::Config(_)));

        let config = GeneratorConfig::from_yaml("max_limit: 10\ndefault_limit: 99").unwrap();
        assert_eq!(config.default_limit, 10);

        let config = GeneratorConfig::from_yaml("default_limit: 0").unwrap();
        assert_eq!(config.default_limit, 1);
    }

    #[test]
    fn test_validate_rate_limit() {
        assert!(GeneratorConfig::from_yaml("rate_limit: 0").is_err());
        assert!(GeneratorConfig::from_yaml("rate_limit: -2").is_err());
        assert!(GeneratorConfig::from_yaml("rate_limit: .nan").is_err());
    }

    #[test]
    fn test_check_constructed_config() {
        let config = GeneratorConfig {
            max_limit: 0,
            ..Default::default()
        };
        assert!(config.check().is_err());

        let config = GeneratorConfig {
            rate_limit: Some(f64::INFINITY),
            ..Default::default()
        };
        assert!(config.check().is_err());

        let mut config = GeneratorConfig::default();
        config.rbac.insert("Orders".into(), OpSet::read_only());
        let config = config.validate().unwrap();
        assert!(config.rbac.contains_key("orders"));
        assert!(GeneratorConfig::default().check().is_ok());
    }

    #[test]
    fn test_consolidation_boundary() {
        let config = GeneratorConfig::default();
        assert!(!config.consolidates(20));
        assert!(config.consolidates(21));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolsmith.yaml");
        fs::write(&path, "semantic: true\nops: [read, delete]\n").unwrap();

        let config = GeneratorConfig::from_file(&path).unwrap();
        assert!(config.semantic);
        assert!(config.ops.contains(Operation::Delete));
    }
}
