//! URI-scheme lookup over a fixed set of connectors.

use std::path::Path;

use toolsmith_core::DataSourceSchema;
use tracing::{debug, info};

use crate::{
    Connector, ConnectorError, FilesConnector, PostgresConnector, SnapshotConnector, SqliteConnector,
};

/// Split `scheme://rest`. Returns `None` for bare paths.
pub fn split_scheme(uri: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = uri.split_once("://")?;
    let valid = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some((scheme, rest))
}

/// Connectors addressable by URI scheme.
///
/// Built once at startup and passed to whatever needs it.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: Vec<Box<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every connector shipped with toolsmith.
    pub fn with_builtin() -> Self {
        Self::new()
            .register(SqliteConnector)
            .register(PostgresConnector::default())
            .register(FilesConnector::default())
            .register(SnapshotConnector)
    }

    /// Add a connector. Earlier registrations win on overlapping schemes.
    pub fn register(mut self, connector: impl Connector + 'static) -> Self {
        self.connectors.push(Box::new(connector));
        self
    }

    /// Every registered scheme, in registration order.
    pub fn schemes(&self) -> Vec<&'static str> {
        self.connectors.iter().flat_map(|c| c.schemes().iter().copied()).collect()
    }

    pub fn connectors(&self) -> impl Iterator<Item = &dyn Connector> {
        self.connectors.iter().map(|c| c.as_ref())
    }

    /// Connector responsible for `uri`.
    pub fn resolve(&self, uri: &str) -> Result<&dyn Connector, ConnectorError> {
        let found = match split_scheme(uri) {
            Some((scheme, _)) => {
                let scheme = scheme.to_ascii_lowercase();
                self.connectors().find(|c| c.schemes().contains(&scheme.as_str()))
            }
            None => {
                let path = Path::new(uri);
                self.connectors().find(|c| c.claims_path(path))
            }
        };
        match found {
            Some(connector) => {
                debug!(uri = %redact(uri), connector = connector.name(), "Resolved connector");
                Ok(connector)
            }
            None => Err(ConnectorError::Unsupported {
                uri: redact(uri),
                known: self.schemes().join(", "),
            }),
        }
    }

    pub async fn validate(&self, uri: &str) -> Result<(), ConnectorError> {
        self.resolve(uri)?.validate(uri).await
    }

    pub async fn inspect(&self, uri: &str) -> Result<DataSourceSchema, ConnectorError> {
        let connector = self.resolve(uri)?;
        let schema = connector.inspect(uri).await?;
        info!(
            connector = connector.name(),
            tables = schema.tables.len(),
            resources = schema.resources.len(),
            foreign_keys = schema.foreign_keys.len(),
            "Inspected data source"
        );
        Ok(schema)
    }
}

/// URI with any `user:password@` part masked, for logs and errors.
pub fn redact(uri: &str) -> String {
    let Some((scheme, rest)) = split_scheme(uri) else {
        return uri.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}://***@{}", scheme, &rest[at + 1..]),
        None => uri.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_scheme() {
        assert_eq!(split_scheme("postgres://localhost/db"), Some(("postgres", "localhost/db")));
        assert_eq!(split_scheme("./data/app.db"), None);
        assert_eq!(split_scheme("://nothing"), None);
        assert_eq!(split_scheme("not a scheme://x"), None);
    }

    #[test]
    fn test_redact_hides_credentials() {
        assert_eq!(redact("postgres://admin:secret@db:5432/app"), "postgres://***@db:5432/app");
        assert_eq!(redact("sqlite://app.db"), "sqlite://app.db");
        assert_eq!(redact("app.db"), "app.db");
    }

    #[test]
    fn test_resolve_by_scheme_and_path() {
        let registry = ConnectorRegistry::with_builtin();
        assert_eq!(registry.resolve("postgresql://localhost/app").unwrap().name(), "postgres");
        assert_eq!(registry.resolve("sqlite://app.db").unwrap().name(), "sqlite");
        assert_eq!(registry.resolve("shop.sqlite3").unwrap().name(), "sqlite");
        assert_eq!(registry.resolve("snapshot://schema.json").unwrap().name(), "snapshot");
    }

    #[test]
    fn test_unknown_scheme_is_typed_error() {
        let registry = ConnectorRegistry::with_builtin();
        match registry.resolve("cassandra://admin:pw@node/keyspace") {
            Err(ConnectorError::Unsupported { uri, known }) => {
                assert!(!uri.contains("pw"));
                assert!(known.contains("sqlite"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(connector) => panic!("resolved to {}", connector.name()),
        }
    }

    #[test]
    fn test_empty_registry_resolves_nothing() {
        assert!(ConnectorRegistry::new().resolve("sqlite://app.db").is_err());
    }
}
