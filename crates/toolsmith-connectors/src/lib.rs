//! Data source inspectors.
//!
//! A [`Connector`] turns a connection URI into a [`DataSourceSchema`]. The
//! code generator only ever sees that schema, so adding a backend here never
//! touches generation.
//!
//! Connectors are looked up through an explicitly constructed
//! [`ConnectorRegistry`]; there is no process-wide registration.

use std::path::Path;

use async_trait::async_trait;
use toolsmith_core::DataSourceSchema;

mod error;
pub mod files;
mod infer;
pub mod postgres;
pub mod registry;
pub mod snapshot;
pub mod sqlite;

pub use error::ConnectorError;
pub use files::FilesConnector;
pub use postgres::PostgresConnector;
pub use registry::{redact, split_scheme, ConnectorRegistry};
pub use snapshot::SnapshotConnector;
pub use sqlite::SqliteConnector;

/// Inspection contract every backend implements.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Short label used in logs and by `toolsmith connectors`.
    fn name(&self) -> &'static str;

    /// URI schemes handled, without `://`.
    fn schemes(&self) -> &'static [&'static str];

    /// Whether a scheme-less URI (a bare path) belongs to this connector.
    fn claims_path(&self, _path: &Path) -> bool {
        false
    }

    /// Cheap reachability check. Does not read the full schema.
    async fn validate(&self, uri: &str) -> Result<(), ConnectorError>;

    /// Read the complete schema.
    async fn inspect(&self, uri: &str) -> Result<DataSourceSchema, ConnectorError>;
}
