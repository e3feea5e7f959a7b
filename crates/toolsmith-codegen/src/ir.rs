//! Intermediate model of the tools to emit.
//!
//! The planner decides *which* tools exist and with what parameters; the
//! renderer turns each [`ToolSpec`] into tokens without making decisions of
//! its own.

use serde_json::{json, Map, Value};
use toolsmith_core::{ColumnType, ForeignKey, Operation, Resource};

/// Rust-side type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Text,
    Integer,
    Float,
    Boolean,
    /// Any JSON value.
    Json,
    TextList,
    /// Array of scalar values, e.g. primary keys.
    ValueList,
    /// Array of JSON objects.
    Records,
}

impl ParamType {
    pub fn for_column(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::String
            | ColumnType::Date
            | ColumnType::Datetime
            | ColumnType::Blob => ParamType::Text,
            ColumnType::Integer => ParamType::Integer,
            ColumnType::Float => ParamType::Float,
            ColumnType::Boolean => ParamType::Boolean,
            ColumnType::Json | ColumnType::Unknown => ParamType::Json,
        }
    }

    /// JSON Schema fragment describing this type.
    fn json_schema(&self, format: Option<&str>) -> Value {
        let mut schema = match self {
            ParamType::Text => json!({"type": "string"}),
            ParamType::Integer => json!({"type": "integer"}),
            ParamType::Float => json!({"type": "number"}),
            ParamType::Boolean => json!({"type": "boolean"}),
            ParamType::Json => json!({}),
            ParamType::TextList => json!({"type": "array", "items": {"type": "string"}}),
            ParamType::ValueList => json!({"type": "array"}),
            ParamType::Records => json!({"type": "array", "items": {"type": "object"}}),
        };
        if let (Some(format), Value::Object(obj)) = (format, &mut schema) {
            obj.insert("format".into(), json!(format));
        }
        schema
    }
}

/// Where a parameter's value goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamRole {
    /// A control argument such as `limit` or `query`.
    Control,
    /// Value for the named column.
    Column(String),
    RangeFrom(String),
    RangeTo(String),
}

/// One tool parameter.
#[derive(Debug, Clone)]
pub struct Param {
    /// Name on the wire (JSON argument key).
    pub wire: String,
    /// Rust identifier text, unique within the tool.
    pub ident: String,
    pub ty: ParamType,
    pub required: bool,
    pub role: ParamRole,
    pub description: String,
    /// JSON Schema `format` hint (`date`, `date-time`).
    pub format: Option<&'static str>,
}

impl Param {
    pub fn control(wire: &str, ty: ParamType, required: bool, description: &str) -> Self {
        Self {
            wire: wire.to_string(),
            ident: wire.to_string(),
            ty,
            required,
            role: ParamRole::Control,
            description: description.to_string(),
            format: None,
        }
    }
}

/// What a tool does. Table-scoped kinds refer to the owning [`ToolSpec::table`].
#[derive(Debug, Clone)]
pub enum ToolKind {
    List,
    GetByPk { pk: String },
    Search,
    Count,
    Schema,
    Aggregate,
    ExportCsv,
    ExportJson,
    Insert,
    BatchInsert,
    Update { pk: String },
    Delete { pk: String },
    BatchDelete { pk: String },
    Join { fk: ForeignKey },
    ReadResource { resource: Resource },
    SemanticSearch,
    RebuildIndex,
    ListTables,
    DescribeTable,
    QueryDatabase,
    InsertRecord,
    UpdateRecord,
    DeleteRecord,
    WebhookRegister,
    WebhookList,
    WebhookRemove,
}

impl ToolKind {
    /// Webhook event fired after a successful call, if this is a mutation.
    pub fn event(&self) -> Option<&'static str> {
        match self {
            ToolKind::Insert | ToolKind::BatchInsert | ToolKind::InsertRecord => Some("insert"),
            ToolKind::Update { .. } | ToolKind::UpdateRecord => Some("update"),
            ToolKind::Delete { .. } | ToolKind::BatchDelete { .. } | ToolKind::DeleteRecord => {
                Some("delete")
            }
            _ => None,
        }
    }

    /// Operation family used for RBAC gating.
    pub fn operation(&self) -> Operation {
        match self.event() {
            Some("insert") => Operation::Insert,
            Some("update") => Operation::Update,
            Some("delete") => Operation::Delete,
            _ => Operation::Read,
        }
    }

    /// Whether results may be served from the read cache.
    pub fn cacheable(&self) -> bool {
        matches!(
            self,
            ToolKind::List
                | ToolKind::GetByPk { .. }
                | ToolKind::Search
                | ToolKind::Count
                | ToolKind::Aggregate
                | ToolKind::ExportCsv
                | ToolKind::ExportJson
                | ToolKind::Join { .. }
                | ToolKind::QueryDatabase
        )
    }
}

/// A tool to emit.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<Param>,
    pub kind: ToolKind,
    /// Slug of the owning table, for table-scoped tools.
    pub table: Option<String>,
}

impl ToolSpec {
    pub fn read_only(&self) -> bool {
        self.kind.event().is_none()
            && !matches!(
                self.kind,
                ToolKind::WebhookRegister | ToolKind::WebhookRemove | ToolKind::RebuildIndex
            )
    }

    pub fn param(&self, wire: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.wire == wire && p.role == ParamRole::Control)
    }

    /// MCP input schema for this tool.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            let mut schema = param.ty.json_schema(param.format);
            if let Value::Object(obj) = &mut schema {
                obj.insert("description".into(), json!(param.description));
            }
            properties.insert(param.wire.clone(), schema);
            if param.required {
                required.push(json!(param.wire));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_schema() {
        let tool = ToolSpec {
            name: "search_users".into(),
            description: "Search users".into(),
            params: vec![
                Param::control("query", ParamType::Text, true, "Text to look for"),
                Param::control("limit", ParamType::Integer, false, "Maximum rows"),
            ],
            kind: ToolKind::Search,
            table: Some("users".into()),
        };
        let schema = tool.input_schema();
        assert_eq!(schema["properties"]["query"]["type"], "string");
        assert_eq!(schema["required"], json!(["query"]));
        assert!(tool.read_only());
    }

    #[test]
    fn test_kind_operations() {
        assert_eq!(ToolKind::BatchInsert.operation(), Operation::Insert);
        assert_eq!(ToolKind::BatchDelete { pk: "id".into() }.event(), Some("delete"));
        assert_eq!(ToolKind::List.operation(), Operation::Read);
        assert!(!ToolKind::Insert.cacheable());
    }
}
