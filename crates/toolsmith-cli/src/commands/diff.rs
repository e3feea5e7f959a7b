//! `toolsmith diff` command implementation.
//!
//! Reports what changed since the last generation without writing anything.

use std::path::Path;

use anyhow::{Context, Result};
use toolsmith_connectors::ConnectorRegistry;
use toolsmith_core::LockRecord;

use super::load_schema;
use crate::options::SourceArgs;

pub async fn run(registry: &ConnectorRegistry, source: &SourceArgs, output: &Path) -> Result<()> {
    let lock_path = LockRecord::path_in(output);
    let Some(previous) = LockRecord::load(&lock_path)
        .with_context(|| format!("Failed to read {}", lock_path.display()))?
    else {
        println!("No lock file at {}; nothing to compare against.", lock_path.display());
        return Ok(());
    };

    let schema = load_schema(registry, source).await?;
    match previous.drift(&schema) {
        None => println!("✓ Schema unchanged since the last generation"),
        Some(diff) => {
            println!("⚠️  Schema changed since the last generation:");
            for line in diff.describe() {
                println!("   {}", line);
            }
        }
    }
    if previous.source_type != schema.source_type {
        println!(
            "⚠️  Source type changed from {} to {}",
            previous.source_type, schema.source_type
        );
    }

    Ok(())
}
