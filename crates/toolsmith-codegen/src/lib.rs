//! Schema-to-tool code generation.
//!
//! Generation runs in three stages:
//!
//! 1. [`planner::plan`] turns a schema and configuration into a list of
//!    [`ir::ToolSpec`]s, resolving RBAC, backend capability and
//!    consolidation.
//! 2. The renderer turns the plan into token streams for the entry point and
//!    the tools module.
//! 3. [`verify`] parses both artifacts and formats them.
//!
//! Output is a pure function of `(schema, config)`: the same inputs always
//! give byte-identical source.

pub mod env_template;
pub mod error;
pub mod ident;
pub mod ir;
pub mod planner;
mod render;
pub mod verify;
pub mod writer;

use toolsmith_core::{sanitize_name, DataSourceSchema, GeneratorConfig, SourceKind};
use tracing::{debug, info};

pub use error::{GenerateError, WriteError};
pub use planner::{plan, Mode, Plan};
pub use writer::{write, write_with, WriteOptions, WriteOutcome};

/// Default module stem; the tools module becomes `autogen_main.rs`.
pub const DEFAULT_STEM: &str = "main";

/// One generated source file before verification.
#[derive(Debug, Clone)]
pub struct RawArtifact {
    /// Human-readable artifact name used in errors.
    pub name: &'static str,
    pub source: String,
}

/// Unverified output of synthesis.
#[derive(Debug, Clone)]
pub struct Synthesized {
    pub plan: Plan,
    pub entry_point: RawArtifact,
    pub tools: RawArtifact,
    pub dependencies: Vec<(&'static str, &'static str)>,
}

/// Verified, formatted generation output.
#[derive(Debug, Clone)]
pub struct GeneratedCode {
    pub entry_point: String,
    pub tools: String,
    /// Name of the tools module file, e.g. `autogen_main.rs`.
    pub tools_module: String,
    pub tool_names: Vec<String>,
    /// Crates the generated code needs, as `(name, version requirement)`.
    pub dependencies: Vec<(&'static str, &'static str)>,
}

/// Fails when `schema.metadata` lacks keys its source type requires.
pub fn check_metadata(schema: &DataSourceSchema, kind: SourceKind) -> Result<(), GenerateError> {
    let missing: Vec<String> = kind
        .required_metadata()
        .iter()
        .filter(|key| match schema.metadata.get(**key) {
            None | Some(serde_json::Value::Null) => true,
            Some(serde_json::Value::String(s)) => s.trim().is_empty(),
            Some(serde_json::Value::Object(map)) => map.is_empty(),
            Some(_) => false,
        })
        .map(|key| key.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(GenerateError::MissingMetadata {
            source_type: kind.to_string(),
            keys: missing,
        })
    }
}

/// Tools-module file stem for an entry point stem.
pub fn tools_module_name(stem: &str) -> String {
    format!("autogen_{}.rs", sanitize_name(stem))
}

/// Builds both artifacts without verifying them.
///
/// The configuration is validated first; a record built in code gets the
/// same checks and normalization as one loaded from YAML.
pub fn synthesize(
    schema: &DataSourceSchema,
    config: &GeneratorConfig,
    stem: &str,
) -> Result<Synthesized, GenerateError> {
    let kind = SourceKind::parse(&schema.source_type)?;
    check_metadata(schema, kind)?;
    let config = config.clone().validate()?;

    let plan = planner::plan(schema, &config, kind);
    let stem = sanitize_name(stem);
    let ctx = render::Ctx::new(schema, &config, &plan);
    let tools = render::tools_module(&ctx)?.to_string();
    let entry_point = render::entry_point(&ctx, &stem).to_string();
    let dependencies = render::dependencies(&ctx);
    debug!(
        source_type = %kind,
        mode = ?plan.mode,
        tools = plan.tools.len(),
        "Synthesized tool server"
    );

    Ok(Synthesized {
        plan,
        entry_point: RawArtifact {
            name: "entry point",
            source: entry_point,
        },
        tools: RawArtifact {
            name: "tools module",
            source: tools,
        },
        dependencies,
    })
}

impl Synthesized {
    /// Verifies and formats both artifacts.
    pub fn finish(self, config: &GeneratorConfig, stem: &str) -> Result<GeneratedCode, GenerateError> {
        let tools_file = verify::verify(&self.tools.source, self.tools.name)?;
        let entry_file = verify::verify(&self.entry_point.source, self.entry_point.name)?;
        Ok(GeneratedCode {
            entry_point: verify::format(&self.entry_point.source, &entry_file, config.format),
            tools: verify::format(&self.tools.source, &tools_file, config.format),
            tools_module: tools_module_name(stem),
            tool_names: self.plan.tool_names(),
            dependencies: self.dependencies,
        })
    }
}

/// Generates the entry point and tools module for `schema`.
pub fn generate(schema: &DataSourceSchema, config: &GeneratorConfig) -> Result<GeneratedCode, GenerateError> {
    generate_for(schema, config, DEFAULT_STEM)
}

/// Like [`generate`], for an entry point named `<stem>.rs`.
pub fn generate_for(
    schema: &DataSourceSchema,
    config: &GeneratorConfig,
    stem: &str,
) -> Result<GeneratedCode, GenerateError> {
    let code = synthesize(schema, config, stem)?.finish(config, stem)?;
    info!(
        source_type = %schema.source_type,
        tables = schema.tables.len(),
        tools = code.tool_names.len(),
        "Generated tool server"
    );
    Ok(code)
}

/// Tool names a generation would produce, without rendering anything.
pub fn preview(schema: &DataSourceSchema, config: &GeneratorConfig) -> Result<Vec<String>, GenerateError> {
    let kind = SourceKind::parse(&schema.source_type)?;
    check_metadata(schema, kind)?;
    let config = config.clone().validate()?;
    Ok(planner::plan(schema, &config, kind).tool_names())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_metadata_names_keys() {
        let schema = DataSourceSchema::new("airtable", "airtable://app");
        let err = generate(&schema, &GeneratorConfig::default()).unwrap_err();
        match err {
            GenerateError::MissingMetadata { keys, .. } => assert_eq!(keys, vec!["base_id"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_metadata_value_counts_as_missing() {
        let schema = DataSourceSchema::new("notion", "notion://workspace")
            .with_metadata("database_map", json!({}));
        assert!(check_metadata(&schema, SourceKind::Notion).is_err());
    }

    #[test]
    fn test_unknown_source_type() {
        let schema = DataSourceSchema::new("cassandra", "cassandra://db");
        assert!(matches!(
            generate(&schema, &GeneratorConfig::default()),
            Err(GenerateError::UnsupportedSource(_))
        ));
    }

    #[test]
    fn test_zero_max_limit_is_rejected() {
        let schema = DataSourceSchema::new("sqlite", "sqlite://app.db");
        let config = GeneratorConfig {
            max_limit: 0,
            ..Default::default()
        };
        assert!(matches!(generate(&schema, &config), Err(GenerateError::Config(_))));
        assert!(matches!(preview(&schema, &config), Err(GenerateError::Config(_))));
    }

    #[test]
    fn test_non_positive_rate_limit_is_rejected() {
        let schema = DataSourceSchema::new("sqlite", "sqlite://app.db");
        for rate in [0.0, -1.0, f64::NAN] {
            let config = GeneratorConfig {
                rate_limit: Some(rate),
                ..Default::default()
            };
            assert!(matches!(generate(&schema, &config), Err(GenerateError::Config(_))));
        }
    }

    #[test]
    fn test_tools_module_name_sanitizes_stem() {
        assert_eq!(tools_module_name("main"), "autogen_main.rs");
        assert_eq!(tools_module_name("My Server"), "autogen_my_server.rs");
    }
}
