//! Inspection against real files: a SQLite database built with `sqlx`, a data
//! directory and a schema snapshot.

use std::fs;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};
use tempfile::TempDir;
use toolsmith_connectors::{snapshot, ConnectorError, ConnectorRegistry};
use toolsmith_core::{ColumnType, DataSourceSchema, ForeignKey};

async fn create_library(path: &std::path::Path) {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .connect()
        .await
        .unwrap();
    for statement in [
        "CREATE TABLE authors (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        "CREATE TABLE books (
            id INTEGER PRIMARY KEY,
            title VARCHAR(200) NOT NULL,
            author_id INTEGER REFERENCES authors(id),
            price REAL,
            published DATE
        )",
        "INSERT INTO authors (id, name) VALUES (1, 'Ursula'), (2, 'Iain')",
        "INSERT INTO books (id, title, author_id, price, published) VALUES (1, 'The Dispossessed', 1, 9.5, '1974-05-01')",
    ] {
        sqlx::query(statement).execute(&mut conn).await.unwrap();
    }
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_sqlite_inspection() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("library.db");
    create_library(&db).await;

    let registry = ConnectorRegistry::with_builtin();
    let uri = format!("sqlite://{}", db.display());
    registry.validate(&uri).await.unwrap();
    let schema = registry.inspect(&uri).await.unwrap();

    assert_eq!(schema.source_type, "sqlite");
    assert_eq!(schema.table_names(), vec!["authors", "books"]);

    let books = schema.table("books").unwrap();
    assert_eq!(books.row_count, Some(1));
    assert_eq!(books.primary_key().unwrap().name, "id");
    assert_eq!(books.column("title").unwrap().column_type, ColumnType::String);
    assert!(!books.column("title").unwrap().nullable);
    assert_eq!(books.column("price").unwrap().column_type, ColumnType::Float);
    assert_eq!(books.column("published").unwrap().column_type, ColumnType::Date);

    assert_eq!(
        schema.foreign_keys,
        vec![ForeignKey::new("books", "author_id", "authors", "id")]
    );
    assert_eq!(schema.table("authors").unwrap().row_count, Some(2));
}

#[tokio::test]
async fn test_sqlite_bare_path() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("library.sqlite");
    create_library(&db).await;

    let schema = ConnectorRegistry::with_builtin()
        .inspect(&db.display().to_string())
        .await
        .unwrap();
    assert_eq!(schema.tables.len(), 2);
}

#[tokio::test]
async fn test_missing_database_is_unreachable() {
    let dir = TempDir::new().unwrap();
    let uri = format!("sqlite://{}", dir.path().join("absent.db").display());
    let err = ConnectorRegistry::with_builtin().validate(&uri).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Unreachable { .. }));
    assert!(!dir.path().join("absent.db").exists());
}

#[tokio::test]
async fn test_files_inspection() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("orders.csv"),
        "id,customer,total,placed\n1,acme,10.5,2024-01-02\n2,globex,7,2024-01-03\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("events.jsonl"),
        "{\"kind\": \"signup\", \"at\": \"2024-01-02T10:00:00Z\"}\n{\"kind\": \"login\", \"meta\": {\"ip\": \"::1\"}}\n",
    )
    .unwrap();
    fs::write(dir.path().join("README.md"), "# Data\n").unwrap();
    fs::write(dir.path().join("logo.png"), [0x89, 0x50, 0x4e, 0x47]).unwrap();

    let uri = format!("files://{}", dir.path().display());
    let schema = ConnectorRegistry::with_builtin().inspect(&uri).await.unwrap();

    assert_eq!(schema.source_type, "files");
    assert_eq!(schema.table_names(), vec!["events", "orders"]);

    let orders = schema.table("orders").unwrap();
    assert_eq!(orders.row_count, Some(2));
    assert!(orders.column("id").unwrap().primary_key);
    assert_eq!(orders.column("total").unwrap().column_type, ColumnType::Float);
    assert_eq!(orders.column("placed").unwrap().column_type, ColumnType::Date);

    let events = schema.table("events").unwrap();
    assert_eq!(events.column("at").unwrap().column_type, ColumnType::Datetime);
    assert_eq!(events.column("meta").unwrap().column_type, ColumnType::Json);
    assert!(events.column("meta").unwrap().nullable);

    assert_eq!(schema.resources.len(), 1);
    assert_eq!(schema.resources[0].name, "README.md");
    assert!(schema.resources[0].mime_type.starts_with("text/"));

    let file_map = schema.metadata["file_map"].as_object().unwrap();
    assert_eq!(file_map["orders"], "orders.csv");
}

#[tokio::test]
async fn test_snapshot_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("crm.schema.json");
    let original = DataSourceSchema::new("airtable", "airtable://appCRM")
        .with_metadata("base_id", serde_json::json!("appCRM"));
    snapshot::save(&original, &path).unwrap();

    let registry = ConnectorRegistry::with_builtin();
    let loaded = registry.inspect(&path.display().to_string()).await.unwrap();
    assert_eq!(loaded, original);
}

#[tokio::test]
async fn test_snapshot_with_unknown_source_type() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("odd.schema.json");
    snapshot::save(&DataSourceSchema::new("cassandra", "cassandra://node"), &path).unwrap();

    let uri = format!("snapshot://{}", path.display());
    let err = ConnectorRegistry::with_builtin().inspect(&uri).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Parse { .. }));
}
