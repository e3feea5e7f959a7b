//! CLI command implementations.

pub mod diff;
pub mod init;
pub mod inspect;

use anyhow::{Context, Result};
use toolsmith_connectors::{redact, ConnectorRegistry};
use toolsmith_core::DataSourceSchema;

use crate::options::SourceArgs;

/// Inspect every source, merge them and apply the table filter.
pub async fn load_schema(registry: &ConnectorRegistry, args: &SourceArgs) -> Result<DataSourceSchema> {
    let mut schemas = Vec::with_capacity(args.sources.len());
    for source in &args.sources {
        let schema = registry
            .inspect(source)
            .await
            .with_context(|| format!("Failed to inspect {}", redact(source)))?;
        schemas.push(schema);
    }
    if schemas.len() > 1 {
        let kinds: Vec<&str> = schemas.iter().map(|s| s.source_type.as_str()).collect();
        if kinds.iter().any(|k| *k != kinds[0]) {
            tracing::warn!(
                sources = ?kinds,
                nominal = kinds[0],
                "Merging sources of different types; the first decides the generated backend"
            );
        }
    }
    let schema = DataSourceSchema::merge(schemas).context("No sources given")?;

    if args.tables.is_empty() {
        return Ok(schema);
    }
    let filtered = schema.filter_tables(&args.tables);
    for wanted in &args.tables {
        if !filtered.tables.iter().any(|t| t.name.eq_ignore_ascii_case(wanted.trim())) {
            tracing::warn!(table = %wanted, "Requested table not found in any source");
        }
    }
    Ok(filtered)
}
