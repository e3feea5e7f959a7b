//! Schema lock records and drift reports.
//!
//! A lock record is a small JSON sidecar written next to generated output. On
//! the next generation it is compared with the freshly inspected schema so the
//! user can see which tables and columns changed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::schema::{ColumnFingerprint, DataSourceSchema};

/// File name of the lock sidecar inside an output directory.
pub const LOCK_FILE_NAME: &str = ".toolsmith.lock";

/// Error type for lock file access.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("failed to access lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lock file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted fingerprint of the last generated schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub schema_hash: String,
    pub tables: Vec<String>,
    #[serde(default)]
    pub columns: ColumnFingerprint,
    pub source_type: String,
    /// Informational only, never compared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
}

impl LockRecord {
    /// Build a record for `schema`, stamped with the current time.
    pub fn from_schema(schema: &DataSourceSchema) -> Self {
        Self {
            schema_hash: schema.schema_hash(),
            tables: schema.table_names(),
            columns: schema.column_fingerprint(),
            source_type: schema.source_type.clone(),
            generated_at: Some(Utc::now()),
        }
    }

    /// Path of the lock file for an output directory.
    pub fn path_in(dir: impl AsRef<Path>) -> PathBuf {
        dir.as_ref().join(LOCK_FILE_NAME)
    }

    /// Read the lock file at `path`. A missing file is `Ok(None)`.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>, LockError> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(LockError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| LockError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Write this record as pretty JSON to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LockError> {
        let path = path.as_ref();
        let mut json = serde_json::to_string_pretty(self).map_err(|source| LockError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        json.push('\n');
        fs::write(path, json).map_err(|source| LockError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Compare this (previous) record against a freshly inspected schema.
    ///
    /// Returns `None` when the structural hashes match.
    pub fn drift(&self, schema: &DataSourceSchema) -> Option<SchemaDiff> {
        if self.schema_hash == schema.schema_hash() {
            return None;
        }
        Some(diff(
            &self.tables,
            &schema.table_names(),
            Some(&self.columns),
            Some(&schema.column_fingerprint()),
        ))
    }
}

/// Column-level changes for one table present on both sides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnChanges {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub type_changed: Vec<String>,
}

impl ColumnChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.type_changed.is_empty()
    }
}

/// Difference between two schema versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub column_changes: BTreeMap<String, ColumnChanges>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.column_changes.is_empty()
    }

    /// One line per change, for console and log output.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for table in &self.added {
            lines.push(format!("+ table {}", table));
        }
        for table in &self.removed {
            lines.push(format!("- table {}", table));
        }
        for (table, changes) in &self.column_changes {
            for col in &changes.added {
                lines.push(format!("+ column {}.{}", table, col));
            }
            for col in &changes.removed {
                lines.push(format!("- column {}.{}", table, col));
            }
            for col in &changes.type_changed {
                lines.push(format!("~ column {}.{}", table, col));
            }
        }
        lines
    }
}

/// Compute the difference between two schema versions.
///
/// Added and removed table lists are sorted. Column changes are computed only
/// when both fingerprints are given, and only for tables present on both
/// sides; tables without changes are omitted.
pub fn diff<S: AsRef<str>>(
    old_tables: &[S],
    new_tables: &[S],
    old_columns: Option<&ColumnFingerprint>,
    new_columns: Option<&ColumnFingerprint>,
) -> SchemaDiff {
    let old: BTreeSet<&str> = old_tables.iter().map(|t| t.as_ref()).collect();
    let new: BTreeSet<&str> = new_tables.iter().map(|t| t.as_ref()).collect();

    let added = new.difference(&old).map(|t| t.to_string()).collect();
    let removed = old.difference(&new).map(|t| t.to_string()).collect();

    let mut column_changes = BTreeMap::new();
    if let (Some(old_columns), Some(new_columns)) = (old_columns, new_columns) {
        let empty = BTreeMap::new();
        for table in old.intersection(&new) {
            let before = old_columns.get(*table).unwrap_or(&empty);
            let after = new_columns.get(*table).unwrap_or(&empty);

            let changes = ColumnChanges {
                added: after
                    .keys()
                    .filter(|c| !before.contains_key(*c))
                    .cloned()
                    .collect(),
                removed: before
                    .keys()
                    .filter(|c| !after.contains_key(*c))
                    .cloned()
                    .collect(),
                type_changed: before
                    .iter()
                    .filter(|(c, ty)| after.get(*c).is_some_and(|new_ty| new_ty != *ty))
                    .map(|(c, _)| c.clone())
                    .collect(),
            };
            if !changes.is_empty() {
                column_changes.insert(table.to_string(), changes);
            }
        }
    }

    SchemaDiff {
        added,
        removed,
        column_changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType, Table};

    fn fingerprint(entries: &[(&str, &str, &str)]) -> ColumnFingerprint {
        let mut fp = ColumnFingerprint::new();
        for (table, column, ty) in entries {
            fp.entry(table.to_string())
                .or_default()
                .insert(column.to_string(), ty.to_string());
        }
        fp
    }

    #[test]
    fn test_diff_tables_only() {
        let d = diff(&["a", "b"], &["b", "d", "c"], None, None);
        assert_eq!(d.added, vec!["c", "d"]);
        assert_eq!(d.removed, vec!["a"]);
        assert!(d.column_changes.is_empty());
    }

    #[test]
    fn test_diff_columns() {
        let old = fingerprint(&[
            ("users", "id", "integer"),
            ("users", "name", "string"),
            ("users", "age", "integer"),
            ("orders", "id", "integer"),
        ]);
        let new = fingerprint(&[
            ("users", "id", "integer"),
            ("users", "name", "json"),
            ("users", "email", "string"),
            ("orders", "id", "integer"),
        ]);

        let d = diff(&["users", "orders"], &["users", "orders"], Some(&old), Some(&new));
        assert!(d.added.is_empty() && d.removed.is_empty());
        assert_eq!(d.column_changes.len(), 1);
        let users = &d.column_changes["users"];
        assert_eq!(users.added, vec!["email"]);
        assert_eq!(users.removed, vec!["age"]);
        assert_eq!(users.type_changed, vec!["name"]);
    }

    #[test]
    fn test_diff_needs_both_fingerprints() {
        let old = fingerprint(&[("t", "a", "string")]);
        let d = diff(&["t"], &["t"], Some(&old), None);
        assert!(d.is_empty());
    }

    #[test]
    fn test_diff_serializes_only_nonempty_keys() {
        let old = fingerprint(&[("t", "a", "string")]);
        let new = fingerprint(&[("t", "a", "string"), ("t", "b", "string")]);
        let d = diff(&["t"], &["t"], Some(&old), Some(&new));
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"added": [], "removed": [], "column_changes": {"t": {"added": ["b"]}}})
        );
    }

    #[test]
    fn test_lock_roundtrip_and_drift() {
        let dir = tempfile::tempdir().unwrap();
        let path = LockRecord::path_in(dir.path());
        assert!(LockRecord::load(&path).unwrap().is_none());

        let schema = DataSourceSchema::new("sqlite", "demo.db").with_table(
            Table::new("users")
                .with_column(Column::new("id", ColumnType::Integer).primary())
                .with_column(Column::new("name", ColumnType::String)),
        );
        let record = LockRecord::from_schema(&schema);
        record.save(&path).unwrap();

        let loaded = LockRecord::load(&path).unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(loaded.drift(&schema).is_none());

        let changed = schema
            .clone()
            .with_table(Table::new("orders").with_column(Column::new("id", ColumnType::Integer)));
        let drift = loaded.drift(&changed).unwrap();
        assert_eq!(drift.added, vec!["orders"]);
        assert_eq!(drift.describe(), vec!["+ table orders"]);
    }

    #[test]
    fn test_lock_without_timestamp_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        fs::write(
            &path,
            r#"{"schema_hash": "abc", "tables": ["t"], "columns": {"t": {"a": "string"}}, "source_type": "sqlite"}"#,
        )
        .unwrap();
        let record = LockRecord::load(&path).unwrap().unwrap();
        assert_eq!(record.schema_hash, "abc");
        assert!(record.generated_at.is_none());
    }

    #[test]
    fn test_corrupt_lock_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        fs::write(&path, "not json").unwrap();
        assert!(matches!(LockRecord::load(&path), Err(LockError::Parse { .. })));
    }
}
