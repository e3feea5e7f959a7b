//! Decides which tools a schema and configuration produce.
//!
//! | Tool | Generated when |
//! |------|----------------|
//! | `list_<t>`, `count_<t>`, `schema_<t>`, `export_<t>_csv/json` | `read` |
//! | `get_<t>_by_<pk>` | `read` and a primary key exists |
//! | `search_<t>` | `read` and a STRING/INTEGER column exists |
//! | `aggregate_<t>` | `read` and the table has columns |
//! | `insert_<t>`, `batch_insert_<t>` | `insert` |
//! | `update_<t>_by_<pk>` | `update` and a primary key exists |
//! | `delete_<t>_by_<pk>`, `batch_delete_<t>` | `delete` and a primary key exists |
//! | `join_<a>_with_<b>` | a foreign key whose two tables both have `read` |
//! | `read_<resource>` | always, one per resource |
//!
//! Above the consolidation threshold the per-table tools are replaced by a
//! fixed generic set guarded by a table whitelist.

use std::collections::BTreeSet;
use toolsmith_core::{
    sanitize_name, Column, ColumnType, DataSourceSchema, GeneratorConfig, OpSet, Operation,
    SourceKind, Table,
};
use tracing::{debug, warn};

use crate::ident::Namer;
use crate::ir::{Param, ParamRole, ParamType, ToolKind, ToolSpec};

/// Tool layout strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    PerTable,
    Consolidated,
}

/// A table together with its resolved generation settings.
#[derive(Debug, Clone)]
pub struct TablePlan {
    pub table: Table,
    /// Unique sanitized name used in tool and constant names.
    pub slug: String,
    /// Effective operation set after RBAC and backend capability.
    pub ops: OpSet,
}

impl TablePlan {
    pub fn primary_key(&self) -> Option<&Column> {
        self.table.primary_key()
    }

    /// Columns accepted by insert tools. A single INTEGER key is assumed to
    /// be generated by the backend and is left out; any other key is required.
    pub fn insert_columns(&self) -> Vec<&Column> {
        let keys = self.table.primary_key_columns();
        let generated_key = keys.len() == 1 && keys[0].column_type == ColumnType::Integer;
        self.table
            .columns
            .iter()
            .filter(|c| !(generated_key && c.primary_key))
            .collect()
    }
}

/// Output of planning: everything the renderer needs.
#[derive(Debug, Clone)]
pub struct Plan {
    pub kind: SourceKind,
    pub mode: Mode,
    pub tables: Vec<TablePlan>,
    pub tools: Vec<ToolSpec>,
}

impl Plan {
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    pub fn table(&self, slug: &str) -> Option<&TablePlan> {
        self.tables.iter().find(|t| t.slug == slug)
    }

    /// Whether any emitted tool writes data.
    pub fn has_writes(&self) -> bool {
        self.tools.iter().any(|t| t.kind.event().is_some())
    }
}

/// Expected bound format for a range filter on `column`.
fn temporal_format(column: &Column) -> &'static str {
    match column.column_type {
        ColumnType::Date => "date (YYYY-MM-DD)",
        _ => "timestamp (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)",
    }
}

/// Plan the tools for `schema` under `config`.
pub fn plan(schema: &DataSourceSchema, config: &GeneratorConfig, kind: SourceKind) -> Plan {
    let writable = kind.writable();
    if !writable && config.ops.has_writes() {
        warn!(
            source_type = %kind,
            "Source is read-only; insert, update and delete tools will not be generated"
        );
    }

    let known: BTreeSet<String> = schema.tables.iter().map(|t| t.name.to_lowercase()).collect();
    for (key, entry) in &config.rbac {
        if !known.contains(key) {
            warn!(table = %key, "RBAC entry does not match any table");
            continue;
        }
        let dropped: Vec<&str> = config
            .ops
            .iter()
            .filter(|op| !entry.contains(*op))
            .map(|op| op.as_str())
            .collect();
        if !dropped.is_empty() {
            warn!(
                table = %key,
                dropped = ?dropped,
                "RBAC entry replaces the global operations for this table"
            );
        }
    }

    let mut slugs = Namer::new();
    let tables: Vec<TablePlan> = schema
        .tables
        .iter()
        .map(|table| {
            let mut ops = config.effective_ops(&table.name).clone();
            if !writable {
                ops = ops.without_writes();
            }
            if !ops.contains(Operation::Read) {
                warn!(
                    table = %table.name,
                    ops = %ops,
                    "Table has no read access; read tools will not be generated"
                );
            }
            TablePlan {
                table: table.clone(),
                slug: slugs.claim(&sanitize_name(&table.name)),
                ops,
            }
        })
        .collect();

    let mode = if config.consolidates(tables.len()) {
        Mode::Consolidated
    } else {
        Mode::PerTable
    };

    let mut builder = Builder {
        config,
        names: Namer::new(),
        tools: Vec::new(),
    };

    match mode {
        Mode::PerTable => {
            for table in &tables {
                let before = builder.tools.len();
                builder.table_tools(table);
                debug!(
                    table = %table.table.name,
                    ops = %table.ops,
                    tools = ?builder.tools[before..].iter().map(|t| &t.name).collect::<Vec<_>>(),
                    "Planned table tools"
                );
            }
            builder.join_tools(schema, &tables);
        }
        Mode::Consolidated => {
            debug!(
                tables = tables.len(),
                threshold = config.consolidate_threshold,
                "Table count exceeds threshold; planning consolidated tools"
            );
            builder.consolidated_tools(&tables);
        }
    }

    for resource in &schema.resources {
        builder.resource_tool(resource);
    }
    if config.webhooks {
        builder.webhook_tools();
    }

    Plan {
        kind,
        mode,
        tables,
        tools: builder.tools,
    }
}

struct Builder<'c> {
    config: &'c GeneratorConfig,
    names: Namer,
    tools: Vec<ToolSpec>,
}

/// Per-tool parameter allocation keeping Rust identifiers and wire names unique.
struct Params {
    idents: Namer,
    wires: Namer,
    params: Vec<Param>,
}

impl Params {
    fn new() -> Self {
        // `api_key` is the leading parameter of every tool in api-key mode.
        Self {
            idents: Namer::new().reserve(["api_key"]),
            wires: Namer::new(),
            params: Vec::new(),
        }
    }

    fn control(mut self, wire: &str, ty: ParamType, required: bool, description: &str) -> Self {
        let mut param = Param::control(wire, ty, required, description);
        param.wire = self.wires.claim(wire);
        param.ident = self.idents.claim(&sanitize_name(&param.wire));
        self.params.push(param);
        self
    }

    fn column(mut self, column: &Column, required: bool, role: ParamRole) -> Self {
        let (wire_base, description) = match &role {
            ParamRole::RangeFrom(_) => (
                format!("{}_from", sanitize_name(&column.name)),
                format!("Only rows with {} on or after this {}", column.name, temporal_format(column)),
            ),
            ParamRole::RangeTo(_) => (
                format!("{}_to", sanitize_name(&column.name)),
                format!("Only rows with {} on or before this {}", column.name, temporal_format(column)),
            ),
            _ => (
                column.name.clone(),
                column
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Value for column {}", column.name)),
            ),
        };
        let format = match column.column_type {
            ColumnType::Date => Some("date"),
            ColumnType::Datetime => Some("date-time"),
            _ => None,
        };
        let wire = self.wires.claim(&wire_base);
        let ident = self.idents.claim(&sanitize_name(&wire));
        self.params.push(Param {
            wire,
            ident,
            ty: ParamType::for_column(column.column_type),
            required,
            role,
            description,
            format,
        });
        self
    }

    fn pagination(self) -> Self {
        self.control("limit", ParamType::Integer, false, "Maximum rows to return (clamped server-side)")
            .control("offset", ParamType::Integer, false, "Rows to skip")
    }

    fn listing(self) -> Self {
        self.pagination()
            .control("sort_field", ParamType::Text, false, "Column to sort by")
            .control("sort_direction", ParamType::Text, false, "asc or desc")
            .control("fields", ParamType::Text, false, "Comma-separated columns to return")
    }

    fn done(self) -> Vec<Param> {
        self.params
    }
}

impl Builder<'_> {
    fn push(&mut self, base: String, description: String, params: Vec<Param>, kind: ToolKind, table: Option<&str>) {
        let name = self.names.claim(&base);
        if name != base {
            warn!(tool = %base, renamed = %name, "Tool name collision; renamed");
        }
        self.tools.push(ToolSpec {
            name,
            description,
            params,
            kind,
            table: table.map(str::to_string),
        });
    }

    fn table_tools(&mut self, plan: &TablePlan) {
        let t = &plan.table;
        let slug = plan.slug.as_str();
        let pk = plan.primary_key();
        let pk_slug = pk.map(|c| sanitize_name(&c.name));

        if plan.ops.contains(Operation::Read) {
            let mut params = Params::new().listing();
            for column in t.temporal_columns() {
                params = params
                    .column(column, false, ParamRole::RangeFrom(column.name.clone()))
                    .column(column, false, ParamRole::RangeTo(column.name.clone()));
            }
            self.push(
                format!("list_{}", slug),
                format!("List rows from {} with pagination, sorting and field selection", t.name),
                params.done(),
                ToolKind::List,
                Some(slug),
            );

            if let (Some(pk), Some(pk_slug)) = (pk, &pk_slug) {
                self.push(
                    format!("get_{}_by_{}", slug, pk_slug),
                    format!("Fetch one {} row by {}", t.name, pk.name),
                    Params::new().column(pk, true, ParamRole::Column(pk.name.clone())).done(),
                    ToolKind::GetByPk { pk: pk.name.clone() },
                    Some(slug),
                );
            }

            if !t.searchable_columns().is_empty() {
                self.push(
                    format!("search_{}", slug),
                    format!("Free-text search across the text and integer columns of {}", t.name),
                    Params::new()
                        .control("query", ParamType::Text, true, "Text to look for")
                        .control("limit", ParamType::Integer, false, "Maximum rows to return")
                        .done(),
                    ToolKind::Search,
                    Some(slug),
                );
            }

            self.push(
                format!("count_{}", slug),
                format!("Count rows in {}", t.name),
                Vec::new(),
                ToolKind::Count,
                Some(slug),
            );
            self.push(
                format!("schema_{}", slug),
                format!("Describe the columns of {}", t.name),
                Vec::new(),
                ToolKind::Schema,
                Some(slug),
            );

            if !t.columns.is_empty() {
                self.push(
                    format!("aggregate_{}", slug),
                    format!("Group {} rows by a column and aggregate", t.name),
                    Params::new()
                        .control("group_by", ParamType::Text, true, "Column to group by")
                        .control("agg_function", ParamType::Text, true, "count, sum, avg, min or max")
                        .control("agg_field", ParamType::Text, false, "Numeric column to aggregate (not needed for count)")
                        .done(),
                    ToolKind::Aggregate,
                    Some(slug),
                );
            }

            for (suffix, kind) in [("csv", ToolKind::ExportCsv), ("json", ToolKind::ExportJson)] {
                self.push(
                    format!("export_{}_{}", slug, suffix),
                    format!("Export {} rows as {}", t.name, suffix.to_uppercase()),
                    Params::new()
                        .control("limit", ParamType::Integer, false, "Maximum rows to export")
                        .done(),
                    kind,
                    Some(slug),
                );
            }
        }

        if plan.ops.contains(Operation::Insert) {
            let mut params = Params::new();
            for column in plan.insert_columns() {
                let required = column.primary_key || !column.nullable;
                params = params.column(column, required, ParamRole::Column(column.name.clone()));
            }
            self.push(
                format!("insert_{}", slug),
                format!("Insert one row into {}", t.name),
                params.done(),
                ToolKind::Insert,
                Some(slug),
            );
            self.push(
                format!("batch_insert_{}", slug),
                format!("Insert several rows into {} in one transaction", t.name),
                Params::new()
                    .control("records", ParamType::Records, true, "Rows to insert, one object per row")
                    .done(),
                ToolKind::BatchInsert,
                Some(slug),
            );
        }

        if let (Some(pk), Some(pk_slug)) = (pk, &pk_slug) {
            if plan.ops.contains(Operation::Update) {
                let mut params = Params::new().column(pk, true, ParamRole::Column(pk.name.clone()));
                for column in t.columns.iter().filter(|c| c.name != pk.name) {
                    params = params.column(column, false, ParamRole::Column(column.name.clone()));
                }
                self.push(
                    format!("update_{}_by_{}", slug, pk_slug),
                    format!("Update one {} row by {}; only given columns change", t.name, pk.name),
                    params.done(),
                    ToolKind::Update { pk: pk.name.clone() },
                    Some(slug),
                );
            }

            if plan.ops.contains(Operation::Delete) {
                self.push(
                    format!("delete_{}_by_{}", slug, pk_slug),
                    format!("Delete one {} row by {}", t.name, pk.name),
                    Params::new().column(pk, true, ParamRole::Column(pk.name.clone())).done(),
                    ToolKind::Delete { pk: pk.name.clone() },
                    Some(slug),
                );
                self.push(
                    format!("batch_delete_{}", slug),
                    format!("Delete several {} rows by {} in one transaction", t.name, pk.name),
                    Params::new()
                        .control("ids", ParamType::ValueList, true, "Primary key values to delete")
                        .done(),
                    ToolKind::BatchDelete { pk: pk.name.clone() },
                    Some(slug),
                );
            }
        }

        if self.config.semantic && plan.ops.contains(Operation::Read) && !t.searchable_columns().is_empty() {
            self.push(
                format!("semantic_search_{}", slug),
                format!("Find {} rows by meaning using vector similarity", t.name),
                Params::new()
                    .control("query", ParamType::Text, true, "Natural language query")
                    .control("limit", ParamType::Integer, false, "Maximum rows to return")
                    .done(),
                ToolKind::SemanticSearch,
                Some(slug),
            );
            self.push(
                format!("rebuild_index_{}", slug),
                format!("Rebuild the vector index for {}", t.name),
                Vec::new(),
                ToolKind::RebuildIndex,
                Some(slug),
            );
        }
    }

    fn join_tools(&mut self, schema: &DataSourceSchema, tables: &[TablePlan]) {
        let readable = |name: &str| {
            tables
                .iter()
                .find(|t| t.table.name == name)
                .filter(|t| t.ops.contains(Operation::Read))
        };

        let mut seen = BTreeSet::new();
        for fk in &schema.foreign_keys {
            let (Some(from), Some(to)) = (readable(&fk.from_table), readable(&fk.to_table)) else {
                debug!(join = %fk.join_name(), "Skipping join; both tables need read access");
                continue;
            };
            let base = format!("join_{}_with_{}", from.slug, to.slug);
            if !seen.insert(base.clone()) {
                continue;
            }
            if from.table.column(&fk.from_column).is_none() || to.table.column(&fk.to_column).is_none() {
                warn!(join = %base, "Foreign key refers to an unknown column; join skipped");
                continue;
            }
            self.push(
                base,
                format!(
                    "Rows of {} joined with {} on {}.{} = {}.{}",
                    fk.from_table, fk.to_table, fk.from_table, fk.from_column, fk.to_table, fk.to_column
                ),
                Params::new().pagination().done(),
                ToolKind::Join { fk: fk.clone() },
                Some(from.slug.as_str()),
            );
        }
    }

    fn consolidated_tools(&mut self, tables: &[TablePlan]) {
        let any = |op: Operation| tables.iter().any(|t| t.ops.contains(op));

        self.push(
            "list_tables".into(),
            "List the tables this server exposes and the operations allowed on each".into(),
            Vec::new(),
            ToolKind::ListTables,
            None,
        );
        let table_param = || Params::new().control("table", ParamType::Text, true, "Table name");
        self.push(
            "describe_table".into(),
            "Describe the columns of a table".into(),
            table_param().done(),
            ToolKind::DescribeTable,
            None,
        );
        if any(Operation::Read) {
            self.push(
                "query_database".into(),
                "Read rows from any exposed table with pagination, sorting and field selection".into(),
                table_param().listing().done(),
                ToolKind::QueryDatabase,
                None,
            );
        }
        if any(Operation::Insert) {
            self.push(
                "insert_record".into(),
                "Insert one row into a table that allows inserts".into(),
                table_param()
                    .control("record", ParamType::Json, true, "Column values as an object")
                    .done(),
                ToolKind::InsertRecord,
                None,
            );
        }
        if any(Operation::Update) {
            self.push(
                "update_record".into(),
                "Update one row by primary key in a table that allows updates".into(),
                table_param()
                    .control("id", ParamType::Json, true, "Primary key value")
                    .control("changes", ParamType::Json, true, "Column values to change")
                    .done(),
                ToolKind::UpdateRecord,
                None,
            );
        }
        if any(Operation::Delete) {
            self.push(
                "delete_record".into(),
                "Delete one row by primary key in a table that allows deletes".into(),
                table_param()
                    .control("id", ParamType::Json, true, "Primary key value")
                    .done(),
                ToolKind::DeleteRecord,
                None,
            );
        }
    }

    fn resource_tool(&mut self, resource: &toolsmith_core::Resource) {
        self.push(
            format!("read_{}", sanitize_name(&resource.name)),
            resource
                .description
                .clone()
                .unwrap_or_else(|| format!("Read the contents of {}", resource.name)),
            Vec::new(),
            ToolKind::ReadResource {
                resource: resource.clone(),
            },
            None,
        );
    }

    fn webhook_tools(&mut self) {
        self.push(
            "webhook_register".into(),
            "Subscribe a URL to insert, update and delete events".into(),
            Params::new()
                .control("url", ParamType::Text, true, "http(s) URL to POST events to")
                .control("events", ParamType::TextList, false, "Events to receive; all when omitted")
                .done(),
            ToolKind::WebhookRegister,
            None,
        );
        self.push(
            "webhook_list".into(),
            "List webhook subscriptions".into(),
            Vec::new(),
            ToolKind::WebhookList,
            None,
        );
        self.push(
            "webhook_remove".into(),
            "Remove a webhook subscription".into(),
            Params::new()
                .control("url", ParamType::Text, true, "Subscribed URL")
                .done(),
            ToolKind::WebhookRemove,
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolsmith_core::ForeignKey;

    fn users() -> Table {
        Table::new("users")
            .with_column(Column::new("id", ColumnType::Integer).primary())
            .with_column(Column::new("name", ColumnType::String).not_null())
            .with_column(Column::new("email", ColumnType::String))
            .with_column(Column::new("joined", ColumnType::Date))
    }

    fn schema() -> DataSourceSchema {
        DataSourceSchema::new("sqlite", "demo.db").with_table(users())
    }

    fn names(plan: &Plan) -> Vec<String> {
        plan.tool_names()
    }

    #[test]
    fn test_read_only_plan() {
        let plan = plan(&schema(), &GeneratorConfig::default(), SourceKind::Sqlite);
        assert_eq!(
            names(&plan),
            vec![
                "list_users",
                "get_users_by_id",
                "search_users",
                "count_users",
                "schema_users",
                "aggregate_users",
                "export_users_csv",
                "export_users_json",
            ]
        );
        assert_eq!(plan.mode, Mode::PerTable);
        assert!(!plan.has_writes());
    }

    #[test]
    fn test_list_gets_range_filters() {
        let plan = plan(&schema(), &GeneratorConfig::default(), SourceKind::Sqlite);
        let list = &plan.tools[0];
        let wires: Vec<&str> = list.params.iter().map(|p| p.wire.as_str()).collect();
        assert_eq!(
            wires,
            vec!["limit", "offset", "sort_field", "sort_direction", "fields", "joined_from", "joined_to"]
        );
    }

    #[test]
    fn test_insert_params_skip_generated_key() {
        let config = GeneratorConfig {
            ops: OpSet::all(),
            ..Default::default()
        };
        let plan = plan(&schema(), &config, SourceKind::Sqlite);
        let insert = plan.tools.iter().find(|t| t.name == "insert_users").unwrap();
        let wires: Vec<(&str, bool)> = insert.params.iter().map(|p| (p.wire.as_str(), p.required)).collect();
        assert_eq!(wires, vec![("name", true), ("email", false), ("joined", false)]);
    }

    #[test]
    fn test_text_key_is_required_on_insert() {
        let table = Table::new("codes")
            .with_column(Column::new("code", ColumnType::String).primary())
            .with_column(Column::new("label", ColumnType::String));
        let config = GeneratorConfig {
            ops: OpSet::all(),
            ..Default::default()
        };
        let plan = plan(&DataSourceSchema::new("sqlite", "x").with_table(table), &config, SourceKind::Sqlite);
        let insert = plan.tools.iter().find(|t| t.name == "insert_codes").unwrap();
        assert_eq!(insert.params[0].wire, "code");
        assert!(insert.params[0].required);
    }

    #[test]
    fn test_no_primary_key_disables_by_pk_tools() {
        let table = Table::new("events").with_column(Column::new("payload", ColumnType::Json));
        let config = GeneratorConfig {
            ops: OpSet::all(),
            ..Default::default()
        };
        let plan = plan(&DataSourceSchema::new("sqlite", "x").with_table(table), &config, SourceKind::Sqlite);
        let names = names(&plan);
        assert!(names.contains(&"list_events".to_string()));
        assert!(names.contains(&"insert_events".to_string()));
        assert!(!names.iter().any(|n| n.contains("_by_") || n.starts_with("batch_delete")));
        assert!(!names.contains(&"search_events".to_string()));
    }

    #[test]
    fn test_read_only_source_drops_writes() {
        let config = GeneratorConfig {
            ops: OpSet::all(),
            ..Default::default()
        };
        let schema = DataSourceSchema::new("files", "./data").with_table(users());
        let plan = plan(&schema, &config, SourceKind::Files);
        assert!(!plan.has_writes());
        assert!(!plan.tables[0].ops.has_writes());
    }

    #[test]
    fn test_rbac_override() {
        let mut config = GeneratorConfig {
            ops: OpSet::all(),
            ..Default::default()
        };
        config.rbac.insert("users".into(), OpSet::read_only());
        let plan = plan(&schema(), &config, SourceKind::Sqlite);
        assert!(!plan.has_writes());
    }

    #[test]
    fn test_join_requires_read_on_both_tables() {
        let authors = Table::new("authors").with_column(Column::new("id", ColumnType::Integer).primary());
        let books = Table::new("books")
            .with_column(Column::new("id", ColumnType::Integer).primary())
            .with_column(Column::new("author_id", ColumnType::Integer));
        let schema = DataSourceSchema::new("sqlite", "x")
            .with_table(authors)
            .with_table(books)
            .with_foreign_key(ForeignKey::new("books", "author_id", "authors", "id"))
            .with_foreign_key(ForeignKey::new("books", "author_id", "authors", "id"));

        let plan_all = plan(&schema, &GeneratorConfig::default(), SourceKind::Sqlite);
        let joins: Vec<String> = names(&plan_all).into_iter().filter(|n| n.starts_with("join_")).collect();
        assert_eq!(joins, vec!["join_books_with_authors"]);

        let mut config = GeneratorConfig::default();
        config.rbac.insert("authors".into(), OpSet::empty());
        let plan_gated = plan(&schema, &config, SourceKind::Sqlite);
        assert!(!names(&plan_gated).iter().any(|n| n.starts_with("join_")));
    }

    #[test]
    fn test_consolidated_plan() {
        let mut schema = DataSourceSchema::new("postgres", "postgres://db");
        for i in 0..25 {
            schema = schema.with_table(users_named(&format!("t{}", i)));
        }
        let mut config = GeneratorConfig::default();
        config.rbac.insert("t3".into(), OpSet::parse_list("read,insert").unwrap());
        let plan = plan(&schema, &config, SourceKind::Postgres);
        assert_eq!(plan.mode, Mode::Consolidated);
        assert_eq!(
            names(&plan),
            vec!["list_tables", "describe_table", "query_database", "insert_record"]
        );
    }

    fn users_named(name: &str) -> Table {
        let mut t = users();
        t.name = name.to_string();
        t
    }

    #[test]
    fn test_colliding_names_are_unique() {
        let schema = DataSourceSchema::new("sqlite", "x")
            .with_table(Table::new("Order Items").with_column(Column::new("id", ColumnType::Integer)))
            .with_table(Table::new("order_items").with_column(Column::new("id", ColumnType::Integer)));
        let plan = plan(&schema, &GeneratorConfig::default(), SourceKind::Sqlite);
        assert_eq!(plan.tables[0].slug, "order_items");
        assert_eq!(plan.tables[1].slug, "order_items_2");
        let unique: BTreeSet<String> = names(&plan).into_iter().collect();
        assert_eq!(unique.len(), plan.tools.len());
    }

    #[test]
    fn test_semantic_and_webhook_tools() {
        let config = GeneratorConfig {
            semantic: true,
            webhooks: true,
            ..Default::default()
        };
        let plan = plan(&schema(), &config, SourceKind::Sqlite);
        let names = names(&plan);
        assert!(names.contains(&"semantic_search_users".to_string()));
        assert!(names.contains(&"rebuild_index_users".to_string()));
        assert!(names.ends_with(&[
            "webhook_register".to_string(),
            "webhook_list".to_string(),
            "webhook_remove".to_string()
        ]));
    }
}
