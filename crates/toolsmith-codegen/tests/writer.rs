//! Output writer tests against a temporary directory.

use std::fs;

use tempfile::TempDir;
use toolsmith_codegen::{generate, write, write_with, WriteError, WriteOptions};
use toolsmith_core::{Column, ColumnType, DataSourceSchema, GeneratorConfig, LockRecord, OpSet, Table};

fn schema() -> DataSourceSchema {
    DataSourceSchema::new("sqlite", "shop.db").with_table(
        Table::new("products")
            .with_column(Column::new("id", ColumnType::Integer).primary())
            .with_column(Column::new("name", ColumnType::String).not_null())
            .with_column(Column::new("price", ColumnType::Float)),
    )
}

#[test]
fn test_first_write_creates_all_artifacts() {
    let dir = TempDir::new().unwrap();
    let outcome = write(&schema(), &GeneratorConfig::default(), dir.path()).unwrap();

    assert!(outcome.entry_point_created);
    assert_eq!(outcome.entry_point_path, dir.path().join("main.rs"));
    assert_eq!(outcome.tools_path, dir.path().join("autogen_main.rs"));
    assert!(outcome.entry_point_path.exists());
    assert!(outcome.tools_path.exists());
    assert!(outcome.lock_path.exists());
    assert!(outcome.env_path.exists());
    assert!(outcome.drift.is_none());
    assert!(outcome.tool_names.contains(&"list_products".to_string()));

    let tools = fs::read_to_string(&outcome.tools_path).unwrap();
    assert!(syn::parse_file(&tools).is_ok());
    let env = fs::read_to_string(&outcome.env_path).unwrap();
    assert!(env.contains("SQLITE_PATH="));
}

#[test]
fn test_regeneration_keeps_entry_point_and_replaces_tools() {
    let dir = TempDir::new().unwrap();
    let first = write(&schema(), &GeneratorConfig::default(), dir.path()).unwrap();

    let edited = format!(
        "{}\n// hand edit: register reporting tools here\n",
        fs::read_to_string(&first.entry_point_path).unwrap()
    );
    fs::write(&first.entry_point_path, &edited).unwrap();
    fs::write(&first.tools_path, "// scribbled over").unwrap();

    let config = GeneratorConfig {
        ops: OpSet::all(),
        ..GeneratorConfig::default()
    };
    let second = write(&schema(), &config, dir.path()).unwrap();

    assert!(!second.entry_point_created);
    assert_eq!(fs::read_to_string(&second.entry_point_path).unwrap(), edited);

    let fresh = generate(&schema(), &config).unwrap();
    assert_eq!(fs::read_to_string(&second.tools_path).unwrap(), fresh.tools);
    assert!(second.tool_names.contains(&"insert_products".to_string()));
}

#[test]
fn test_drift_reported_against_previous_lock() {
    let dir = TempDir::new().unwrap();
    write(&schema(), &GeneratorConfig::default(), dir.path()).unwrap();

    let changed = schema().with_table(
        Table::new("orders").with_column(Column::new("id", ColumnType::Integer).primary()),
    );
    let outcome = write(&changed, &GeneratorConfig::default(), dir.path()).unwrap();

    let drift = outcome.drift.expect("schema changed, drift expected");
    assert_eq!(drift.added, vec!["orders".to_string()]);

    let lock = LockRecord::load(&outcome.lock_path).unwrap().unwrap();
    assert_eq!(lock.schema_hash, changed.schema_hash());
}

#[test]
fn test_unchanged_schema_has_no_drift() {
    let dir = TempDir::new().unwrap();
    write(&schema(), &GeneratorConfig::default(), dir.path()).unwrap();
    let outcome = write(&schema(), &GeneratorConfig::default(), dir.path()).unwrap();
    assert!(outcome.drift.is_none());
}

#[test]
fn test_drift_reporting_can_be_disabled() {
    let dir = TempDir::new().unwrap();
    write(&schema(), &GeneratorConfig::default(), dir.path()).unwrap();

    let changed = schema().with_table(Table::new("orders"));
    let options = WriteOptions {
        report_drift: false,
        ..WriteOptions::default()
    };
    let outcome = write_with(&changed, &GeneratorConfig::default(), dir.path(), &options).unwrap();
    assert!(outcome.drift.is_none());
}

#[test]
fn test_custom_filename() {
    let dir = TempDir::new().unwrap();
    let options = WriteOptions {
        filename: "server.rs".into(),
        ..WriteOptions::default()
    };
    let outcome = write_with(&schema(), &GeneratorConfig::default(), dir.path(), &options).unwrap();
    assert_eq!(outcome.tools_path, dir.path().join("autogen_server.rs"));
    let entry = fs::read_to_string(&outcome.entry_point_path).unwrap();
    assert!(entry.contains("mod autogen_server;"));
}

#[test]
fn test_invalid_filename_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let options = WriteOptions {
        filename: "../escape.rs".into(),
        ..WriteOptions::default()
    };
    let err = write_with(&schema(), &GeneratorConfig::default(), dir.path(), &options).unwrap_err();
    assert!(matches!(err, WriteError::InvalidFilename(_)));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_missing_metadata_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("server");
    let schema = DataSourceSchema::new("gsheet", "gsheet://").with_table(Table::new("sheet1"));

    let err = write(&schema, &GeneratorConfig::default(), &out).unwrap_err();
    assert!(matches!(err, WriteError::Generate(_)));
    assert!(!out.exists());
}

#[test]
fn test_stale_diagnostic_file_removed() {
    let dir = TempDir::new().unwrap();
    let broken = dir.path().join("autogen_main.rs.broken");
    fs::write(&broken, "fn broken( {").unwrap();

    write(&schema(), &GeneratorConfig::default(), dir.path()).unwrap();
    assert!(!broken.exists());
}
