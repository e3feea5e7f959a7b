//! Shared command-line arguments and how they override a config file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use toolsmith_codegen::WriteOptions;
use toolsmith_core::{AuthMode, CacheBackend, FormatStrategy, GeneratorConfig, OpSet};

#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Source URIs or paths, e.g. app.db, postgres://..., ./data, crm.schema.json.
    /// Several sources are merged into one schema.
    #[arg(required = true, num_args = 1..)]
    pub sources: Vec<String>,

    /// Only keep these tables (comma separated, case-insensitive)
    #[arg(long, value_delimiter = ',')]
    pub tables: Vec<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthArg {
    None,
    ApiKey,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheArg {
    Memory,
    Redis,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArg {
    Prettyplease,
    Rustfmt,
    None,
}

/// Generation settings. Flags override values from `--config`.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// YAML configuration file
    #[arg(long, env = "TOOLSMITH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enabled operations for every table, e.g. "read,insert,update,delete"
    #[arg(long)]
    pub ops: Option<String>,

    /// Per-table operations, e.g. --rbac audit_log=read (repeatable)
    #[arg(long = "rbac", value_name = "TABLE=OPS")]
    pub rbac: Vec<String>,

    #[arg(long = "async", default_value_t = false)]
    pub async_mode: bool,

    #[arg(long, default_value_t = false)]
    pub semantic: bool,

    #[arg(long, default_value_t = false)]
    pub audit: bool,

    #[arg(long, default_value_t = false)]
    pub otel: bool,

    #[arg(long, default_value_t = false)]
    pub webhooks: bool,

    /// Force TLS for network database connections
    #[arg(long, default_value_t = false)]
    pub ssl: bool,

    #[arg(long, value_enum)]
    pub auth: Option<AuthArg>,

    /// Read cache lifetime in seconds; 0 disables caching
    #[arg(long)]
    pub cache_ttl: Option<u64>,

    #[arg(long, value_enum)]
    pub cache_backend: Option<CacheArg>,

    /// Requests per second allowed across all tools
    #[arg(long)]
    pub rate_limit: Option<f64>,

    #[arg(long)]
    pub default_limit: Option<u32>,

    #[arg(long)]
    pub max_limit: Option<u32>,

    /// Switch to generic tools above this many tables
    #[arg(long)]
    pub consolidate_threshold: Option<usize>,

    #[arg(long, value_enum)]
    pub format: Option<FormatArg>,
}

impl ConfigArgs {
    /// Config file (or defaults) with flags applied, validated.
    pub fn load(&self) -> Result<GeneratorConfig> {
        let base = match &self.config {
            Some(path) => GeneratorConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => GeneratorConfig::default(),
        };
        self.apply(base)
    }

    fn apply(&self, mut config: GeneratorConfig) -> Result<GeneratorConfig> {
        if let Some(ops) = &self.ops {
            config.ops = OpSet::parse_list(ops).context("Invalid --ops")?;
        }
        for entry in &self.rbac {
            let (table, ops) = entry
                .split_once('=')
                .with_context(|| format!("Invalid --rbac '{}': expected TABLE=OPS", entry))?;
            let ops = OpSet::parse_list(ops).with_context(|| format!("Invalid --rbac '{}'", entry))?;
            config.rbac.insert(table.trim().to_string(), ops);
        }
        config.async_mode |= self.async_mode;
        config.semantic |= self.semantic;
        config.audit |= self.audit;
        config.otel |= self.otel;
        config.webhooks |= self.webhooks;
        config.ssl_enabled |= self.ssl;
        if let Some(auth) = self.auth {
            config.auth_mode = match auth {
                AuthArg::None => AuthMode::None,
                AuthArg::ApiKey => AuthMode::ApiKey,
            };
        }
        if let Some(ttl) = self.cache_ttl {
            config.cache_ttl = ttl;
        }
        if let Some(backend) = self.cache_backend {
            config.cache_backend = match backend {
                CacheArg::Memory => CacheBackend::Memory,
                CacheArg::Redis => CacheBackend::Redis,
            };
        }
        if self.rate_limit.is_some() {
            config.rate_limit = self.rate_limit;
        }
        if let Some(limit) = self.default_limit {
            config.default_limit = limit;
        }
        if let Some(limit) = self.max_limit {
            config.max_limit = limit;
        }
        if let Some(threshold) = self.consolidate_threshold {
            config.consolidate_threshold = threshold;
        }
        if let Some(format) = self.format {
            config.format = match format {
                FormatArg::Prettyplease => FormatStrategy::Prettyplease,
                FormatArg::Rustfmt => FormatStrategy::Rustfmt,
                FormatArg::None => FormatStrategy::None,
            };
        }
        Ok(config.validate()?)
    }
}

#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Output directory
    #[arg(long, short, default_value = ".")]
    pub output: PathBuf,

    /// Entry point file name
    #[arg(long, default_value = "main.rs")]
    pub filename: String,

    /// Skip the schema drift report
    #[arg(long, default_value_t = false)]
    pub no_drift: bool,
}

impl OutputArgs {
    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            filename: self.filename.clone(),
            report_drift: !self.no_drift,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use toolsmith_core::Operation;

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("toolsmith.yaml");
        fs::write(&path, "ops: [read, insert]\nmax_limit: 100\ncache_ttl: 60\n").unwrap();

        let args = ConfigArgs {
            config: Some(path),
            max_limit: Some(20),
            rbac: vec!["Audit_Log=read".to_string()],
            auth: Some(AuthArg::ApiKey),
            ..ConfigArgs::default()
        };
        let config = args.load().unwrap();

        assert!(config.ops.contains(Operation::Insert));
        assert_eq!(config.max_limit, 20);
        assert_eq!(config.default_limit, 20);
        assert_eq!(config.cache_ttl, 60);
        assert_eq!(config.auth_mode, AuthMode::ApiKey);
        assert_eq!(config.rbac.get("audit_log"), Some(&OpSet::read_only()));
    }

    #[test]
    fn test_invalid_rbac_flag() {
        let args = ConfigArgs {
            rbac: vec!["orders".to_string()],
            ..ConfigArgs::default()
        };
        assert!(args.load().is_err());
    }

    #[test]
    fn test_zero_max_limit_rejected() {
        let args = ConfigArgs {
            max_limit: Some(0),
            ..ConfigArgs::default()
        };
        assert!(args.load().is_err());
    }
}
