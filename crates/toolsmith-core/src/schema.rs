//! Backend-agnostic schema model.
//!
//! Every connector produces a [`DataSourceSchema`]; the code generator only
//! ever consumes this model, never a backend-specific description.
//!
//! The structural fingerprint ([`DataSourceSchema::schema_hash`]) covers table
//! names, column names, column types and primary-key flags. Row counts,
//! descriptions and metadata never affect it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Nested `table -> column -> type` map stored in lock records.
pub type ColumnFingerprint = BTreeMap<String, BTreeMap<String, String>>;

/// Universal column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Datetime,
    Json,
    Blob,
    Unknown,
}

impl ColumnType {
    /// Every variant, in declaration order.
    pub const ALL: [ColumnType; 9] = [
        ColumnType::String,
        ColumnType::Integer,
        ColumnType::Float,
        ColumnType::Boolean,
        ColumnType::Date,
        ColumnType::Datetime,
        ColumnType::Json,
        ColumnType::Blob,
        ColumnType::Unknown,
    ];

    /// Lowercase tag used in lock files and generated catalogs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Datetime => "datetime",
            ColumnType::Json => "json",
            ColumnType::Blob => "blob",
            ColumnType::Unknown => "unknown",
        }
    }

    /// Whether values of this type take part in free-text search.
    pub fn is_searchable(&self) -> bool {
        matches!(self, ColumnType::String | ColumnType::Integer)
    }

    /// Whether list tools get `<col>_from` / `<col>_to` range filters.
    pub fn is_temporal(&self) -> bool {
        matches!(self, ColumnType::Date | ColumnType::Datetime)
    }

    /// Whether numeric aggregates (sum/avg/min/max) apply.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SQL type names and the universal type they map to. Order matters for
/// prefix matching: longer names sharing a prefix come first.
const SQL_TYPE_MAP: &[(&str, ColumnType)] = &[
    ("character varying", ColumnType::String),
    ("varchar", ColumnType::String),
    ("nvarchar", ColumnType::String),
    ("nchar", ColumnType::String),
    ("char", ColumnType::String),
    ("text", ColumnType::String),
    ("clob", ColumnType::String),
    ("uuid", ColumnType::String),
    ("integer", ColumnType::Integer),
    ("smallint", ColumnType::Integer),
    ("bigint", ColumnType::Integer),
    ("tinyint", ColumnType::Integer),
    ("bigserial", ColumnType::Integer),
    ("serial", ColumnType::Integer),
    ("int", ColumnType::Integer),
    ("double precision", ColumnType::Float),
    ("double", ColumnType::Float),
    ("real", ColumnType::Float),
    ("float", ColumnType::Float),
    ("decimal", ColumnType::Float),
    ("numeric", ColumnType::Float),
    ("boolean", ColumnType::Boolean),
    ("bool", ColumnType::Boolean),
    ("timestamp with time zone", ColumnType::Datetime),
    ("timestamp without time zone", ColumnType::Datetime),
    ("timestamp", ColumnType::Datetime),
    ("datetime", ColumnType::Datetime),
    ("date", ColumnType::Date),
    ("jsonb", ColumnType::Json),
    ("json", ColumnType::Json),
    ("blob", ColumnType::Blob),
    ("bytea", ColumnType::Blob),
];

/// Map a SQL type string to a universal [`ColumnType`].
///
/// Exact matches win, then prefix matches (`varchar(255)` → `varchar`).
/// Anything else resolves to [`ColumnType::Unknown`]; this never fails.
pub fn map_sql_type(sql_type: &str) -> ColumnType {
    let normalized = sql_type.trim().to_lowercase();
    if let Some((_, ty)) = SQL_TYPE_MAP.iter().find(|(name, _)| *name == normalized) {
        return *ty;
    }
    SQL_TYPE_MAP
        .iter()
        .find(|(name, _)| normalized.starts_with(name))
        .map(|(_, ty)| *ty)
        .unwrap_or(ColumnType::Unknown)
}

/// Convert an arbitrary label ("First Name", "123-count") into a bare
/// identifier (`first_name`, `_123_count`).
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_underscore = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        return "_unnamed".to_string();
    }
    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// A column (or document field) of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Column {
    /// Create a nullable, non-key column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            primary_key: false,
            description: None,
        }
    }

    /// Mark this column as (part of) the primary key. Key columns are not nullable.
    pub fn primary(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A table or collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    /// Advisory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            row_count: None,
            description: None,
        }
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_row_count(mut self, rows: u64) -> Self {
        self.row_count = Some(rows);
        self
    }

    /// Key columns in column order.
    pub fn primary_key_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    /// The key used by by-PK tools: the first key column, if any.
    pub fn primary_key(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// STRING and INTEGER columns, used to build free-text search predicates.
    pub fn searchable_columns(&self) -> Vec<&Column> {
        self.columns
            .iter()
            .filter(|c| c.column_type.is_searchable())
            .collect()
    }

    /// DATE and DATETIME columns, each of which gets a range filter on list tools.
    pub fn temporal_columns(&self) -> Vec<&Column> {
        self.columns
            .iter()
            .filter(|c| c.column_type.is_temporal())
            .collect()
    }

    /// Columns accepted by insert tools (everything except key columns).
    pub fn writable_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| !c.primary_key).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A foreign key relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

impl ForeignKey {
    pub fn new(
        from_table: impl Into<String>,
        from_column: impl Into<String>,
        to_table: impl Into<String>,
        to_column: impl Into<String>,
    ) -> Self {
        Self {
            from_table: from_table.into(),
            from_column: from_column.into(),
            to_table: to_table.into(),
            to_column: to_column.into(),
        }
    }

    /// Name of the join tool this relationship produces.
    pub fn join_name(&self) -> String {
        format!("join_{}_with_{}", self.from_table, self.to_table)
    }
}

/// Non-tabular readable content, such as a text file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub uri: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Resource {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            mime_type: default_mime_type(),
            description: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }
}

/// Complete schema of an inspected data source.
///
/// Built once per inspection run. Filtering and merging return new values;
/// once handed to the generator the schema is treated as read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceSchema {
    /// Backend tag, e.g. "sqlite" or "postgres".
    pub source_type: String,
    /// Connection string or path. May be a `" + "` concatenation after a merge.
    pub source_uri: String,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    /// Backend-specific extras needed at generation time.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize)]
struct CanonicalColumn<'a> {
    name: &'a str,
    pk: bool,
    #[serde(rename = "type")]
    column_type: &'a str,
}

#[derive(Serialize)]
struct CanonicalTable<'a> {
    columns: Vec<CanonicalColumn<'a>>,
    table: &'a str,
}

impl DataSourceSchema {
    pub fn new(source_type: impl Into<String>, source_uri: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            source_uri: source_uri.into(),
            tables: Vec::new(),
            resources: Vec::new(),
            foreign_keys: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn with_foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Stable SHA-256 fingerprint of the schema structure (hex encoded).
    pub fn schema_hash(&self) -> String {
        let mut tables: Vec<&Table> = self.tables.iter().collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));

        let canonical: Vec<CanonicalTable<'_>> = tables
            .into_iter()
            .map(|t| {
                let mut columns: Vec<&Column> = t.columns.iter().collect();
                columns.sort_by(|a, b| a.name.cmp(&b.name));
                CanonicalTable {
                    table: &t.name,
                    columns: columns
                        .into_iter()
                        .map(|c| CanonicalColumn {
                            name: &c.name,
                            pk: c.primary_key,
                            column_type: c.column_type.as_str(),
                        })
                        .collect(),
                }
            })
            .collect();

        // Serializing plain structs of strings and bools cannot fail.
        let blob = serde_json::to_vec(&canonical).unwrap_or_default();
        format!("{:x}", Sha256::digest(&blob))
    }

    /// Sorted table names.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|t| t.name.clone()).collect();
        names.sort();
        names
    }

    /// `table -> column -> type` map used for column-level drift reports.
    pub fn column_fingerprint(&self) -> ColumnFingerprint {
        self.tables
            .iter()
            .map(|t| {
                let cols = t
                    .columns
                    .iter()
                    .map(|c| (c.name.clone(), c.column_type.as_str().to_string()))
                    .collect();
                (t.name.clone(), cols)
            })
            .collect()
    }

    /// Return a copy keeping only the named tables (case-insensitive).
    ///
    /// Foreign keys that reference a dropped table are dropped too.
    pub fn filter_tables<S: AsRef<str>>(&self, wanted: &[S]) -> DataSourceSchema {
        let wanted: BTreeSet<String> = wanted
            .iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();

        let tables: Vec<Table> = self
            .tables
            .iter()
            .filter(|t| wanted.contains(&t.name.to_lowercase()))
            .cloned()
            .collect();
        let kept: BTreeSet<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        let foreign_keys = self
            .foreign_keys
            .iter()
            .filter(|fk| kept.contains(fk.from_table.as_str()) && kept.contains(fk.to_table.as_str()))
            .cloned()
            .collect();

        DataSourceSchema {
            source_type: self.source_type.clone(),
            source_uri: self.source_uri.clone(),
            tables,
            resources: self.resources.clone(),
            foreign_keys,
            metadata: self.metadata.clone(),
        }
    }

    /// Merge several schemas into one.
    ///
    /// The first schema's `source_type` becomes nominal, URIs are joined with
    /// `" + "`, and `metadata.multi_source` is set when more than one schema
    /// was merged. Earlier metadata keys win on conflict. Returns `None` for
    /// an empty input.
    pub fn merge(schemas: Vec<DataSourceSchema>) -> Option<DataSourceSchema> {
        let count = schemas.len();
        let mut iter = schemas.into_iter();
        let mut merged = iter.next()?;
        let mut uris = vec![merged.source_uri.clone()];

        for schema in iter {
            uris.push(schema.source_uri);
            merged.tables.extend(schema.tables);
            merged.resources.extend(schema.resources);
            merged.foreign_keys.extend(schema.foreign_keys);
            for (key, value) in schema.metadata {
                merged.metadata.entry(key).or_insert(value);
            }
        }

        merged.source_uri = uris.join(" + ");
        if count > 1 {
            merged
                .metadata
                .insert("multi_source".to_string(), serde_json::Value::Bool(true));
        }
        Some(merged)
    }

    /// Human-readable multi-line summary.
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("Source: {} ({})", self.source_type, self.source_uri)];
        if !self.tables.is_empty() {
            parts.push(format!("Tables: {}", self.tables.len()));
            for t in &self.tables {
                let cols: Vec<&str> = t.columns.iter().take(5).map(|c| c.name.as_str()).collect();
                let suffix = if t.columns.len() > 5 { "..." } else { "" };
                let rows = t
                    .row_count
                    .map(|n| format!(" ({} rows)", n))
                    .unwrap_or_default();
                parts.push(format!("  - {}{}: {}{}", t.name, rows, cols.join(", "), suffix));
            }
        }
        if !self.resources.is_empty() {
            parts.push(format!("Resources: {}", self.resources.len()));
            for r in &self.resources {
                parts.push(format!("  - {} [{}]", r.name, r.mime_type));
            }
        }
        parts.join("\n")
    }
}

fn default_true() -> bool {
    true
}

fn default_mime_type() -> String {
    "text/plain".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Table {
        Table::new("users")
            .with_column(Column::new("id", ColumnType::Integer).primary())
            .with_column(Column::new("name", ColumnType::String))
            .with_column(Column::new("email", ColumnType::String))
    }

    #[test]
    fn test_map_sql_type() {
        assert_eq!(map_sql_type("INTEGER"), ColumnType::Integer);
        assert_eq!(map_sql_type("varchar(255)"), ColumnType::String);
        assert_eq!(map_sql_type("character varying"), ColumnType::String);
        assert_eq!(map_sql_type("timestamp with time zone"), ColumnType::Datetime);
        assert_eq!(map_sql_type("date"), ColumnType::Date);
        assert_eq!(map_sql_type("numeric(10,2)"), ColumnType::Float);
        assert_eq!(map_sql_type("jsonb"), ColumnType::Json);
        assert_eq!(map_sql_type("geometry"), ColumnType::Unknown);
        assert_eq!(map_sql_type(""), ColumnType::Unknown);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("First Name"), "first_name");
        assert_eq!(sanitize_name("123-count"), "_123_count");
        assert_eq!(sanitize_name("email@address"), "email_address");
        assert_eq!(sanitize_name("__"), "_unnamed");
        assert_eq!(sanitize_name("a  --  b"), "a_b");
    }

    #[test]
    fn test_derived_columns() {
        let table = users()
            .with_column(Column::new("created", ColumnType::Datetime))
            .with_column(Column::new("score", ColumnType::Float));

        assert_eq!(table.primary_key().map(|c| c.name.as_str()), Some("id"));
        let searchable: Vec<&str> = table.searchable_columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(searchable, vec!["id", "name", "email"]);
        assert_eq!(table.temporal_columns().len(), 1);
        assert_eq!(table.writable_columns().len(), 4);
    }

    #[test]
    fn test_composite_key_uses_first_column() {
        let table = Table::new("memberships")
            .with_column(Column::new("group_id", ColumnType::Integer).primary())
            .with_column(Column::new("user_id", ColumnType::Integer).primary());
        assert_eq!(table.primary_key_columns().len(), 2);
        assert_eq!(table.primary_key().map(|c| c.name.as_str()), Some("group_id"));
    }

    #[test]
    fn test_schema_hash_ignores_advisory_fields() {
        let a = DataSourceSchema::new("sqlite", "a.db").with_table(users());
        let mut b = DataSourceSchema::new("postgres", "b")
            .with_table(users().with_row_count(42))
            .with_metadata("base_id", serde_json::json!("app1"));
        b.tables[0].description = Some("people".into());
        b.tables[0].columns[1].description = Some("display name".into());
        b.tables[0].columns[1].nullable = false;

        assert_eq!(a.schema_hash(), b.schema_hash());
        assert_eq!(a.schema_hash().len(), 64);
    }

    #[test]
    fn test_schema_hash_is_order_independent() {
        let orders = Table::new("orders").with_column(Column::new("id", ColumnType::Integer).primary());
        let a = DataSourceSchema::new("sqlite", "x")
            .with_table(users())
            .with_table(orders.clone());
        let b = DataSourceSchema::new("sqlite", "x")
            .with_table(orders)
            .with_table(users());
        assert_eq!(a.schema_hash(), b.schema_hash());
    }

    #[test]
    fn test_schema_hash_tracks_structure() {
        let base = DataSourceSchema::new("sqlite", "x").with_table(users());
        let hash = base.schema_hash();

        let mut renamed = base.clone();
        renamed.tables[0].columns[1].name = "full_name".into();
        assert_ne!(renamed.schema_hash(), hash);

        let mut retyped = base.clone();
        retyped.tables[0].columns[2].column_type = ColumnType::Json;
        assert_ne!(retyped.schema_hash(), hash);

        let mut rekeyed = base.clone();
        rekeyed.tables[0].columns[0].primary_key = false;
        assert_ne!(rekeyed.schema_hash(), hash);

        let mut extra = base.clone();
        extra.tables.push(Table::new("audit"));
        assert_ne!(extra.schema_hash(), hash);
    }

    #[test]
    fn test_column_fingerprint() {
        let schema = DataSourceSchema::new("sqlite", "x").with_table(users());
        let fp = schema.column_fingerprint();
        assert_eq!(fp["users"]["id"], "integer");
        assert_eq!(fp["users"]["email"], "string");
    }

    #[test]
    fn test_filter_tables_returns_new_schema() {
        let schema = DataSourceSchema::new("sqlite", "x")
            .with_table(users())
            .with_table(Table::new("Orders"))
            .with_table(Table::new("audit"))
            .with_foreign_key(ForeignKey::new("Orders", "user_id", "users", "id"))
            .with_foreign_key(ForeignKey::new("audit", "user_id", "users", "id"));

        let filtered = schema.filter_tables(&["USERS", " orders "]);
        assert_eq!(filtered.table_names(), vec!["Orders", "users"]);
        assert_eq!(filtered.foreign_keys.len(), 1);
        // The original is untouched.
        assert_eq!(schema.tables.len(), 3);
    }

    #[test]
    fn test_merge_schemas() {
        let a = DataSourceSchema::new("sqlite", "sqlite:///a.db").with_table(users());
        let b = DataSourceSchema::new("postgres", "postgres://h/b")
            .with_table(Table::new("orders"))
            .with_metadata("pool_max", serde_json::json!(4));

        let merged = DataSourceSchema::merge(vec![a, b]).expect("non-empty input");
        assert_eq!(merged.source_type, "sqlite");
        assert_eq!(merged.source_uri, "sqlite:///a.db + postgres://h/b");
        assert_eq!(merged.tables.len(), 2);
        assert_eq!(merged.metadata["multi_source"], serde_json::json!(true));
        assert_eq!(merged.metadata["pool_max"], serde_json::json!(4));

        assert!(DataSourceSchema::merge(Vec::new()).is_none());
        let single = DataSourceSchema::merge(vec![DataSourceSchema::new("sqlite", "x")]).expect("one");
        assert!(!single.metadata.contains_key("multi_source"));
    }

    #[test]
    fn test_foreign_key_join_name() {
        let fk = ForeignKey::new("books", "author_id", "authors", "id");
        assert_eq!(fk.join_name(), "join_books_with_authors");
    }

    #[test]
    fn test_schema_roundtrips_through_json_defaults() {
        let json = r#"{
            "source_type": "sqlite",
            "source_uri": "demo.db",
            "tables": [{"name": "t", "columns": [{"name": "id", "type": "integer", "primary_key": true}]}],
            "resources": [{"name": "readme", "uri": "file:///tmp/readme.md"}]
        }"#;
        let schema: DataSourceSchema = serde_json::from_str(json).expect("valid schema json");
        assert!(schema.tables[0].columns[0].nullable);
        assert_eq!(schema.resources[0].mime_type, "text/plain");
        assert!(schema.metadata.is_empty());
    }
}
