//! Core types shared across toolsmith crates: the backend-agnostic schema
//! model, source kinds, the generation configuration record and lock files.

pub mod config;
pub mod lock;
pub mod schema;
pub mod source;

pub use config::{
    AuthMode, CacheBackend, ConfigError, FormatStrategy, GeneratorConfig, OpSet, Operation,
};
pub use lock::{diff, ColumnChanges, LockError, LockRecord, SchemaDiff, LOCK_FILE_NAME};
pub use schema::{
    map_sql_type, sanitize_name, Column, ColumnFingerprint, ColumnType, DataSourceSchema,
    ForeignKey, Resource, Table,
};
pub use source::{BackendFamily, RestProfile, SourceKind, SqlFlavor, UnsupportedSource};
