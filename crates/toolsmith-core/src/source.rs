//! Known data source kinds and the backend family each one belongs to.
//!
//! The family decides which runtime infrastructure the generator emits:
//! connection handling, failure semantics and whether writes are possible.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every backend toolsmith can generate a server for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Sqlite,
    Postgres,
    Mysql,
    Supabase,
    Airtable,
    Gsheet,
    Notion,
    Hubspot,
    Openapi,
    Mongodb,
    Redis,
    Files,
    Excel,
}

/// Raised for a `source_type` tag that is not a known [`SourceKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported source type '{0}'")]
pub struct UnsupportedSource(pub String);

/// SQL dialect of a networked relational backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlFlavor {
    Postgres,
    Mysql,
}

/// Hosted REST API shapes. Each profile fixes the base URL, token variable and
/// where records live in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestProfile {
    Supabase,
    Airtable,
    Gsheet,
    Notion,
    Hubspot,
    Openapi,
}

/// Infrastructure family of a source kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendFamily {
    /// Single-file embedded database: connection per call, explicit rollback.
    EmbeddedSql,
    /// Pooled network database.
    NetworkSql(SqlFlavor),
    HostedRest(RestProfile),
    Document,
    KeyValue,
    /// Read-only file scans (CSV/JSON directories, spreadsheets).
    Files,
}

impl SourceKind {
    pub const ALL: [SourceKind; 13] = [
        SourceKind::Sqlite,
        SourceKind::Postgres,
        SourceKind::Mysql,
        SourceKind::Supabase,
        SourceKind::Airtable,
        SourceKind::Gsheet,
        SourceKind::Notion,
        SourceKind::Hubspot,
        SourceKind::Openapi,
        SourceKind::Mongodb,
        SourceKind::Redis,
        SourceKind::Files,
        SourceKind::Excel,
    ];

    /// Parse a `source_type` tag (case-insensitive). `postgresql` is accepted
    /// as an alias.
    pub fn parse(source_type: &str) -> Result<Self, UnsupportedSource> {
        let kind = match source_type.trim().to_lowercase().as_str() {
            "sqlite" => SourceKind::Sqlite,
            "postgres" | "postgresql" => SourceKind::Postgres,
            "mysql" => SourceKind::Mysql,
            "supabase" => SourceKind::Supabase,
            "airtable" => SourceKind::Airtable,
            "gsheet" => SourceKind::Gsheet,
            "notion" => SourceKind::Notion,
            "hubspot" => SourceKind::Hubspot,
            "openapi" => SourceKind::Openapi,
            "mongodb" => SourceKind::Mongodb,
            "redis" => SourceKind::Redis,
            "files" => SourceKind::Files,
            "excel" => SourceKind::Excel,
            _ => return Err(UnsupportedSource(source_type.to_string())),
        };
        Ok(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Sqlite => "sqlite",
            SourceKind::Postgres => "postgres",
            SourceKind::Mysql => "mysql",
            SourceKind::Supabase => "supabase",
            SourceKind::Airtable => "airtable",
            SourceKind::Gsheet => "gsheet",
            SourceKind::Notion => "notion",
            SourceKind::Hubspot => "hubspot",
            SourceKind::Openapi => "openapi",
            SourceKind::Mongodb => "mongodb",
            SourceKind::Redis => "redis",
            SourceKind::Files => "files",
            SourceKind::Excel => "excel",
        }
    }

    pub fn family(&self) -> BackendFamily {
        match self {
            SourceKind::Sqlite => BackendFamily::EmbeddedSql,
            SourceKind::Postgres => BackendFamily::NetworkSql(SqlFlavor::Postgres),
            SourceKind::Mysql => BackendFamily::NetworkSql(SqlFlavor::Mysql),
            SourceKind::Supabase => BackendFamily::HostedRest(RestProfile::Supabase),
            SourceKind::Airtable => BackendFamily::HostedRest(RestProfile::Airtable),
            SourceKind::Gsheet => BackendFamily::HostedRest(RestProfile::Gsheet),
            SourceKind::Notion => BackendFamily::HostedRest(RestProfile::Notion),
            SourceKind::Hubspot => BackendFamily::HostedRest(RestProfile::Hubspot),
            SourceKind::Openapi => BackendFamily::HostedRest(RestProfile::Openapi),
            SourceKind::Mongodb => BackendFamily::Document,
            SourceKind::Redis => BackendFamily::KeyValue,
            SourceKind::Files | SourceKind::Excel => BackendFamily::Files,
        }
    }

    /// Metadata keys the generator cannot work without for this kind.
    pub fn required_metadata(&self) -> &'static [&'static str] {
        match self {
            SourceKind::Airtable => &["base_id"],
            SourceKind::Gsheet => &["spreadsheet_id"],
            SourceKind::Notion => &["database_map"],
            SourceKind::Openapi => &["base_url"],
            _ => &[],
        }
    }

    /// Whether generated servers can write to this kind at all.
    pub fn writable(&self) -> bool {
        !matches!(
            self,
            SourceKind::Files | SourceKind::Excel | SourceKind::Gsheet
        )
    }

    /// Environment variable the generated server reads its connection target from.
    pub fn connection_env(&self) -> &'static str {
        match self {
            SourceKind::Sqlite => "SQLITE_PATH",
            SourceKind::Postgres | SourceKind::Mysql => "DATABASE_URL",
            SourceKind::Supabase => "SUPABASE_URL",
            SourceKind::Airtable => "AIRTABLE_API_KEY",
            SourceKind::Gsheet => "GOOGLE_API_TOKEN",
            SourceKind::Notion => "NOTION_API_KEY",
            SourceKind::Hubspot => "HUBSPOT_ACCESS_TOKEN",
            SourceKind::Openapi => "OPENAPI_TOKEN",
            SourceKind::Mongodb => "MONGODB_URI",
            SourceKind::Redis => "REDIS_URL",
            SourceKind::Files => "DATA_DIR",
            SourceKind::Excel => "EXCEL_PATH",
        }
    }

    /// Whether `source_uri` may be baked into generated code as a default.
    /// Only true for local paths that cannot carry credentials.
    pub fn embeds_source_uri(&self) -> bool {
        matches!(
            self,
            SourceKind::Sqlite | SourceKind::Files | SourceKind::Excel
        )
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = UnsupportedSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKind::parse(s)
    }
}

impl BackendFamily {
    pub fn is_sql(&self) -> bool {
        matches!(self, BackendFamily::EmbeddedSql | BackendFamily::NetworkSql(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_every_kind() {
        for kind in SourceKind::ALL {
            assert_eq!(SourceKind::parse(kind.as_str()), Ok(kind));
        }
        assert_eq!(SourceKind::parse("PostgreSQL"), Ok(SourceKind::Postgres));
    }

    #[test]
    fn test_parse_unknown_is_typed_error() {
        let err = SourceKind::parse("oracle").unwrap_err();
        assert_eq!(err, UnsupportedSource("oracle".to_string()));
        assert_eq!(err.to_string(), "unsupported source type 'oracle'");
    }

    #[test]
    fn test_required_metadata() {
        assert_eq!(SourceKind::Airtable.required_metadata(), &["base_id"]);
        assert_eq!(SourceKind::Gsheet.required_metadata(), &["spreadsheet_id"]);
        assert_eq!(SourceKind::Notion.required_metadata(), &["database_map"]);
        assert!(SourceKind::Sqlite.required_metadata().is_empty());
    }

    #[test]
    fn test_read_only_families() {
        assert!(!SourceKind::Files.writable());
        assert!(!SourceKind::Excel.writable());
        assert!(!SourceKind::Gsheet.writable());
        assert!(SourceKind::Postgres.writable());
        assert!(SourceKind::Redis.writable());
    }

    #[test]
    fn test_families() {
        assert_eq!(SourceKind::Sqlite.family(), BackendFamily::EmbeddedSql);
        assert_eq!(
            SourceKind::Mysql.family(),
            BackendFamily::NetworkSql(SqlFlavor::Mysql)
        );
        assert!(SourceKind::Postgres.family().is_sql());
        assert!(!SourceKind::Mongodb.family().is_sql());
        assert!(!SourceKind::Postgres.embeds_source_uri());
    }
}
