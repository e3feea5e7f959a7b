//! SQLite inspection through `sqlx`, read-only.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection, Row, SqliteConnection};
use toolsmith_core::{map_sql_type, Column, DataSourceSchema, ForeignKey, Table};
use tracing::debug;

use crate::{Connector, ConnectorError};

const EXTENSIONS: &[&str] = &["db", "sqlite", "sqlite3"];

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

/// Database file path for `sqlite://path`, `sqlite:path` or a bare path.
pub fn database_path(uri: &str) -> &str {
    uri.strip_prefix("sqlite://")
        .or_else(|| uri.strip_prefix("sqlite:"))
        .unwrap_or(uri)
}

async fn open(uri: &str) -> Result<SqliteConnection, ConnectorError> {
    let path = database_path(uri);
    if !Path::new(path).is_file() {
        return Err(ConnectorError::Unreachable {
            target: path.to_string(),
            message: "database file does not exist".to_string(),
        });
    }
    SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .connect()
        .await
        .map_err(|e| ConnectorError::Unreachable {
            target: path.to_string(),
            message: e.to_string(),
        })
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

struct PendingKey {
    from_table: String,
    from_column: String,
    to_table: String,
    to_column: Option<String>,
}

#[async_trait]
impl Connector for SqliteConnector {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["sqlite"]
    }

    fn claims_path(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
    }

    async fn validate(&self, uri: &str) -> Result<(), ConnectorError> {
        let mut conn = open(uri).await?;
        sqlx::query("SELECT 1").execute(&mut conn).await?;
        conn.close().await?;
        Ok(())
    }

    async fn inspect(&self, uri: &str) -> Result<DataSourceSchema, ConnectorError> {
        let mut conn = open(uri).await?;

        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&mut conn)
        .await?;

        let mut schema = DataSourceSchema::new("sqlite", database_path(uri));
        let mut pending = Vec::new();

        for name in names {
            let rows = sqlx::query(
                r#"SELECT "name", "type", "notnull", "pk" FROM pragma_table_info(?1) ORDER BY "cid""#,
            )
            .bind(&name)
            .fetch_all(&mut conn)
            .await?;

            let mut table = Table::new(name.clone());
            for row in rows {
                let column_name: String = row.try_get("name")?;
                let declared: String = row.try_get("type")?;
                let not_null: i64 = row.try_get("notnull")?;
                let pk: i64 = row.try_get("pk")?;

                let mut column = Column::new(column_name, map_sql_type(&declared));
                if not_null != 0 {
                    column = column.not_null();
                }
                if pk > 0 {
                    column = column.primary();
                }
                table = table.with_column(column);
            }

            let count_sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&name));
            let rows: i64 = sqlx::query_scalar(&count_sql).fetch_one(&mut conn).await?;
            table = table.with_row_count(u64::try_from(rows).unwrap_or_default());

            let keys = sqlx::query(
                r#"SELECT "table", "from", "to" FROM pragma_foreign_key_list(?1) ORDER BY "id", "seq""#,
            )
            .bind(&name)
            .fetch_all(&mut conn)
            .await?;
            for key in keys {
                pending.push(PendingKey {
                    from_table: name.clone(),
                    from_column: key.try_get("from")?,
                    to_table: key.try_get("table")?,
                    to_column: key.try_get("to")?,
                });
            }

            debug!(table = %name, columns = table.columns.len(), rows, "Inspected SQLite table");
            schema.tables.push(table);
        }
        conn.close().await?;

        // A reference without a target column points at the target's primary key.
        for key in pending {
            let to_column = match key.to_column {
                Some(column) => Some(column),
                None => schema
                    .table(&key.to_table)
                    .and_then(|t| t.primary_key())
                    .map(|c| c.name.clone()),
            };
            match to_column {
                Some(to_column) => schema.foreign_keys.push(ForeignKey::new(
                    key.from_table,
                    key.from_column,
                    key.to_table,
                    to_column,
                )),
                None => debug!(
                    from = %key.from_table,
                    to = %key.to_table,
                    "Foreign key target has no primary key; skipped"
                ),
            }
        }

        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_path() {
        assert_eq!(database_path("sqlite://data/app.db"), "data/app.db");
        assert_eq!(database_path("sqlite:app.db"), "app.db");
        assert_eq!(database_path("app.db"), "app.db");
    }

    #[test]
    fn test_claims_database_extensions() {
        assert!(SqliteConnector.claims_path(Path::new("shop.DB")));
        assert!(SqliteConnector.claims_path(Path::new("dir/app.sqlite3")));
        assert!(!SqliteConnector.claims_path(Path::new("data.csv")));
        assert!(!SqliteConnector.claims_path(Path::new("data")));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("order items"), "\"order items\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
