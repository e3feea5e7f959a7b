//! Schema snapshots: a `DataSourceSchema` saved as JSON.
//!
//! Lets hosted backends without a live inspector (Airtable, Notion, OpenAPI
//! and the rest) be generated from a hand-written or exported schema.

use std::path::Path;

use async_trait::async_trait;
use toolsmith_core::{DataSourceSchema, SourceKind};

use crate::{Connector, ConnectorError};

const SUFFIX: &str = ".schema.json";

#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotConnector;

pub fn snapshot_path(uri: &str) -> &str {
    uri.strip_prefix("snapshot://").unwrap_or(uri)
}

/// Write `schema` as a snapshot `inspect` can read back.
pub fn save(schema: &DataSourceSchema, path: impl AsRef<Path>) -> Result<(), ConnectorError> {
    let path = path.as_ref();
    let text = serde_json::to_string_pretty(schema).map_err(|e| ConnectorError::parse(path)(e.to_string()))?;
    std::fs::write(path, text + "\n").map_err(ConnectorError::io(path))
}

#[async_trait]
impl Connector for SnapshotConnector {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["snapshot"]
    }

    fn claims_path(&self, path: &Path) -> bool {
        path.to_string_lossy().ends_with(SUFFIX)
    }

    async fn validate(&self, uri: &str) -> Result<(), ConnectorError> {
        self.inspect(uri).await.map(|_| ())
    }

    async fn inspect(&self, uri: &str) -> Result<DataSourceSchema, ConnectorError> {
        let path = Path::new(snapshot_path(uri));
        let text = std::fs::read_to_string(path).map_err(ConnectorError::io(path))?;
        let schema: DataSourceSchema =
            serde_json::from_str(&text).map_err(|e| ConnectorError::parse(path)(e.to_string()))?;
        SourceKind::parse(&schema.source_type).map_err(|e| ConnectorError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(schema)
    }
}
