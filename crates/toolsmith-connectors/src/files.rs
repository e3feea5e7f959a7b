//! Directory inspection: CSV, JSON and JSON Lines files become tables, other
//! text files become resources.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use toolsmith_core::{DataSourceSchema, Resource};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::infer::Inference;
use crate::{Connector, ConnectorError};

/// Media types read as text even though they are not `text/*`.
const TEXT_APPLICATION_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/yaml",
    "application/x-yaml",
    "application/toml",
    "application/sql",
    "application/javascript",
];

#[derive(Debug, Clone, Copy)]
pub struct FilesConnector {
    /// Rows read per file for type inference.
    pub sample_rows: usize,
    /// Directory levels scanned below the root.
    pub max_depth: usize,
}

impl Default for FilesConnector {
    fn default() -> Self {
        Self {
            sample_rows: 200,
            max_depth: 2,
        }
    }
}

pub fn data_dir(uri: &str) -> &str {
    uri.strip_prefix("files://").unwrap_or(uri)
}

/// Table name for a file relative to the root: path without extension,
/// separators replaced by `_`.
fn table_name(relative: &Path) -> String {
    relative
        .with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("_")
}

fn forward_slashes(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

enum Found {
    Table(Inference),
    Resource(String),
    Skip,
}

impl FilesConnector {
    fn csv(&self, path: &Path) -> Result<Inference, ConnectorError> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| ConnectorError::parse(path)(e.to_string()))?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| ConnectorError::parse(path)(e.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();
        let mut inference = Inference::new().with_columns(headers.iter().map(String::as_str));
        for row in reader.records().take(self.sample_rows) {
            let row = row.map_err(|e| ConnectorError::parse(path)(e.to_string()))?;
            inference.text_row(&headers, row.iter());
        }
        Ok(inference)
    }

    fn json(&self, path: &Path, lines: bool) -> Result<Option<Inference>, ConnectorError> {
        let text = fs::read_to_string(path).map_err(ConnectorError::io(path))?;
        let records: Vec<Value> = if lines {
            text.lines()
                .filter(|line| !line.trim().is_empty())
                .take(self.sample_rows)
                .map(|line| serde_json::from_str(line).map_err(|e| ConnectorError::parse(path)(e.to_string())))
                .collect::<Result<_, _>>()?
        } else {
            match serde_json::from_str::<Value>(&text) {
                Ok(Value::Array(items)) => items,
                Ok(Value::Object(object)) => object
                    .into_iter()
                    .find_map(|(_, v)| match v {
                        Value::Array(items) => Some(items),
                        _ => None,
                    })
                    .unwrap_or_default(),
                Ok(_) => Vec::new(),
                Err(e) => return Err(ConnectorError::parse(path)(e.to_string())),
            }
        };
        if !records.iter().any(Value::is_object) {
            return Ok(None);
        }
        let mut inference = Inference::new();
        for record in records.iter().take(self.sample_rows) {
            inference.record(record);
        }
        Ok(Some(inference))
    }

    fn classify(&self, path: &Path) -> Result<Found, ConnectorError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let found = match extension.as_str() {
            "csv" => Found::Table(self.csv(path)?),
            "jsonl" => Found::Table(self.json(path, true)?.unwrap_or_default()),
            "json" => match self.json(path, false) {
                Ok(Some(inference)) => Found::Table(inference),
                Ok(None) => Found::Resource("application/json".to_string()),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "JSON file does not parse; exposing as a resource");
                    Found::Resource("application/json".to_string())
                }
            },
            _ => {
                let mime = mime_guess::from_path(path).first_or_octet_stream();
                let essence = mime.essence_str();
                if mime.type_() == mime_guess::mime::TEXT || TEXT_APPLICATION_TYPES.contains(&essence) {
                    Found::Resource(essence.to_string())
                } else {
                    Found::Skip
                }
            }
        };
        Ok(found)
    }

    fn scan(&self, root: &Path) -> Result<DataSourceSchema, ConnectorError> {
        let mut schema = DataSourceSchema::new("files", root.to_string_lossy());
        let mut file_map = Map::new();

        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(self.max_depth)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                ConnectorError::Io {
                    path,
                    source: e.into(),
                }
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            if relative.components().any(|c| c.as_os_str().to_string_lossy().starts_with('.')) {
                continue;
            }

            match self.classify(path)? {
                Found::Table(inference) => {
                    let name = table_name(relative);
                    if schema.table(&name).is_some() {
                        warn!(table = %name, path = %path.display(), "Another file already produced this table; skipped");
                        continue;
                    }
                    let rows = inference.rows();
                    let table = inference.into_table(name.clone()).with_row_count(rows);
                    debug!(table = %name, columns = table.columns.len(), "Inspected data file");
                    file_map.insert(name, Value::String(forward_slashes(relative)));
                    schema.tables.push(table);
                }
                Found::Resource(mime_type) => {
                    let name = forward_slashes(relative);
                    let uri = format!("file://{}", path.display());
                    schema.resources.push(Resource::new(name, uri).with_mime_type(mime_type));
                }
                Found::Skip => debug!(path = %path.display(), "Skipping binary file"),
            }
        }

        if !file_map.is_empty() {
            schema.metadata.insert("file_map".to_string(), Value::Object(file_map));
        }
        schema
            .metadata
            .insert("sample_rows".to_string(), json!(self.sample_rows));
        Ok(schema)
    }
}

#[async_trait]
impl Connector for FilesConnector {
    fn name(&self) -> &'static str {
        "files"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["files"]
    }

    fn claims_path(&self, path: &Path) -> bool {
        path.is_dir()
    }

    async fn validate(&self, uri: &str) -> Result<(), ConnectorError> {
        let root = data_dir(uri);
        if Path::new(root).is_dir() {
            Ok(())
        } else {
            Err(ConnectorError::Unreachable {
                target: root.to_string(),
                message: "not a directory".to_string(),
            })
        }
    }

    async fn inspect(&self, uri: &str) -> Result<DataSourceSchema, ConnectorError> {
        self.validate(uri).await?;
        let root = PathBuf::from(data_dir(uri));
        let connector = *self;
        tokio::task::spawn_blocking(move || connector.scan(&root))
            .await
            .map_err(|e| ConnectorError::Unreachable {
                target: data_dir(uri).to_string(),
                message: e.to_string(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_from_relative_path() {
        assert_eq!(table_name(Path::new("orders.csv")), "orders");
        assert_eq!(table_name(Path::new("2024/sales.jsonl")), "2024_sales");
        assert_eq!(forward_slashes(Path::new("2024/sales.jsonl")), "2024/sales.jsonl");
    }

    #[test]
    fn test_data_dir() {
        assert_eq!(data_dir("files://./data"), "./data");
        assert_eq!(data_dir("/srv/data"), "/srv/data");
    }
}
