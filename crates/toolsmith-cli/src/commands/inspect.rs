//! `toolsmith inspect` command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use toolsmith_codegen::{preview, Mode};
use toolsmith_connectors::{snapshot, ConnectorRegistry};
use toolsmith_core::SourceKind;

use super::load_schema;
use crate::options::{ConfigArgs, SourceArgs};

pub async fn run(
    registry: &ConnectorRegistry,
    source: &SourceArgs,
    config: &ConfigArgs,
    snapshot_path: Option<&Path>,
    json: bool,
) -> Result<()> {
    let config = config.load()?;
    let schema = load_schema(registry, source).await?;

    if let Some(path) = snapshot_path {
        snapshot::save(&schema, path).with_context(|| format!("Failed to save snapshot to {}", path.display()))?;
        println!("📄 Snapshot saved to {}", path.display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    println!("{}", schema.summary());
    println!();

    let tools = preview(&schema, &config).context("Schema cannot be generated")?;
    let kind = SourceKind::parse(&schema.source_type)?;
    let mode = if config.consolidates(schema.tables.len()) {
        Mode::Consolidated
    } else {
        Mode::PerTable
    };
    println!("🧰 {} tools ({:?} mode, {} backend):", tools.len(), mode, kind);
    for tool in &tools {
        println!("   - {}", tool);
    }
    if !kind.writable() && config.ops.has_writes() {
        println!("   ⚠ {} sources are read-only; write tools were dropped", kind);
    }

    Ok(())
}
