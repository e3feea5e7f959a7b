//! `toolsmith init` command implementation.
//!
//! Inspects the sources, generates the tool server and writes it. Safe to run
//! repeatedly: only the tools module is replaced.

use anyhow::{Context, Result};
use toolsmith_codegen::write_with;
use toolsmith_connectors::{redact, ConnectorRegistry};

use super::load_schema;
use crate::options::{ConfigArgs, OutputArgs, SourceArgs};

pub async fn run(
    registry: &ConnectorRegistry,
    source: &SourceArgs,
    config: &ConfigArgs,
    output: &OutputArgs,
) -> Result<()> {
    let config = config.load()?;
    let sources: Vec<String> = source.sources.iter().map(|s| redact(s)).collect();
    println!("🔍 Inspecting {}", sources.join(", "));

    let schema = load_schema(registry, source).await?;
    println!(
        "   ✓ {} tables, {} resources, {} foreign keys",
        schema.tables.len(),
        schema.resources.len(),
        schema.foreign_keys.len()
    );

    println!("⚙️  Generating into {}", output.output.display());
    let outcome = write_with(&schema, &config, &output.output, &output.write_options())
        .context("Generation failed")?;

    if let Some(drift) = &outcome.drift {
        println!("⚠️  Schema changed since the last generation:");
        for line in drift.describe() {
            println!("   {}", line);
        }
    }

    println!("   ✓ {} tools in {}", outcome.tool_names.len(), outcome.tools_path.display());
    if outcome.entry_point_created {
        println!("   ✓ Created {}", outcome.entry_point_path.display());
    } else {
        println!("   • Kept existing {}", outcome.entry_point_path.display());
    }
    println!("   ✓ Lock file {}", outcome.lock_path.display());
    println!("   ✓ Environment template {}", outcome.env_path.display());

    Ok(())
}
