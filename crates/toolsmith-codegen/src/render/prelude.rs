//! Module header, error type and backend-independent runtime helpers.

use std::str::FromStr;

use proc_macro2::{Literal, TokenStream};
use quote::quote;

use super::Ctx;
use crate::error::GenerateError;
use crate::ir::ToolKind;

const PAGING: &str = include_str!("paging.rs");

/// Limit clamping, windowing and the page envelope.
pub fn paging() -> Result<TokenStream, GenerateError> {
    TokenStream::from_str(PAGING).map_err(|e| GenerateError::Synthesis {
        artifact: "tools module".to_string(),
        message: format!("paging helpers: {}", e),
    })
}

pub fn header(ctx: &Ctx<'_>) -> TokenStream {
    let kind = ctx.plan.kind.as_str();
    let summary = format!(
        " Tools generated by toolsmith {} for a {} source.",
        env!("CARGO_PKG_VERSION"),
        kind
    );
    let regenerated =
        " This file is rewritten on every generation. Put hand-written tools in the entry point.";
    let crates: Vec<&str> = super::dependencies(ctx).into_iter().map(|(name, _)| name).collect();
    let requires = format!(" Requires: {}.", crates.join(", "));
    let default_limit = Literal::i64_unsuffixed(i64::from(ctx.config.default_limit));
    let max_limit = Literal::i64_unsuffixed(i64::from(ctx.config.max_limit));

    quote! {
        #![doc = #summary]
        #![doc = ""]
        #![doc = #regenerated]
        #![doc = #requires]
        #![allow(dead_code, unused_imports, unused_variables, unused_mut, clippy::all)]

        use serde_json::{json, Map, Value};
        use std::collections::{BTreeMap, HashMap};
        use std::sync::{Mutex, OnceLock};
        use std::time::{Duration, Instant};

        pub const SOURCE_TYPE: &str = #kind;
        pub const DEFAULT_LIMIT: i64 = #default_limit;
        pub const MAX_LIMIT: i64 = #max_limit;
    }
}

pub fn errors() -> TokenStream {
    quote! {
        /// Failure of a tool call. Sent to clients as a JSON-RPC error, never as a result.
        #[derive(Debug)]
        pub enum ToolError {
            InvalidArgument(String),
            PermissionDenied(String),
            RateLimited,
            UnknownTool(String),
            Backend { tool: String, message: String },
        }

        impl ToolError {
            pub fn backend(tool: &str, err: impl std::fmt::Display) -> Self {
                ToolError::Backend {
                    tool: tool.to_string(),
                    message: err.to_string(),
                }
            }

            /// JSON-RPC error code.
            pub fn code(&self) -> i64 {
                match self {
                    ToolError::InvalidArgument(_) => -32602,
                    ToolError::UnknownTool(_) => -32601,
                    ToolError::PermissionDenied(_) => -32001,
                    ToolError::RateLimited => -32002,
                    ToolError::Backend { .. } => -32000,
                }
            }
        }

        impl std::fmt::Display for ToolError {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    ToolError::InvalidArgument(message) => write!(f, "invalid argument: {}", message),
                    ToolError::PermissionDenied(message) => write!(f, "permission denied: {}", message),
                    ToolError::RateLimited => f.write_str("rate limit exceeded, retry later"),
                    ToolError::UnknownTool(name) => write!(f, "unknown tool: {}", name),
                    ToolError::Backend { tool, message } => write!(f, "{} failed: {}", tool, message),
                }
            }
        }

        impl std::error::Error for ToolError {}

        pub type ToolResult = Result<Value, ToolError>;
    }
}

pub fn helpers(ctx: &Ctx<'_>) -> TokenStream {
    let csv = if ctx
        .plan
        .tools
        .iter()
        .any(|t| matches!(t.kind, ToolKind::ExportCsv))
    {
        quote! {
            fn to_csv(tool: &str, columns: &[&'static ColumnDef], rows: &[Value]) -> Result<String, ToolError> {
                let mut writer = csv::Writer::from_writer(Vec::new());
                writer
                    .write_record(columns.iter().map(|c| c.name))
                    .map_err(|e| ToolError::backend(tool, e))?;
                for row in rows {
                    writer
                        .write_record(columns.iter().map(|c| cell_text(row.get(c.name))))
                        .map_err(|e| ToolError::backend(tool, e))?;
                }
                let bytes = writer.into_inner().map_err(|e| ToolError::backend(tool, e))?;
                String::from_utf8(bytes).map_err(|e| ToolError::backend(tool, e))
            }
        }
    } else {
        TokenStream::new()
    };

    quote! {
        /// Column metadata baked in at generation time.
        #[derive(Debug, Clone, Copy)]
        pub struct ColumnDef {
            pub name: &'static str,
            /// Name as it appears in queries (quoted for SQL backends).
            pub quoted: &'static str,
            pub kind: &'static str,
            pub nullable: bool,
            pub primary_key: bool,
        }

        /// Table metadata baked in at generation time.
        #[derive(Debug, Clone, Copy)]
        pub struct TableDef {
            pub name: &'static str,
            pub quoted: &'static str,
            pub columns: &'static [ColumnDef],
            pub primary_key: Option<&'static str>,
            /// Operations allowed on this table.
            pub ops: &'static [&'static str],
        }

        impl TableDef {
            pub fn column(&self, name: &str) -> Option<&'static ColumnDef> {
                self.columns.iter().find(|c| c.name == name)
            }

            pub fn allows(&self, op: &str) -> bool {
                self.ops.contains(&op)
            }

            pub fn searchable(&self) -> Vec<&'static ColumnDef> {
                self.columns
                    .iter()
                    .filter(|c| c.kind == "string" || c.kind == "integer")
                    .collect()
            }
        }

        /// Inclusive range filter on a date or datetime column.
        #[derive(Debug, Clone)]
        pub struct RangeFilter {
            pub column: &'static str,
            pub from: Option<String>,
            pub to: Option<String>,
        }

        /// Arguments shared by list-style reads.
        #[derive(Debug, Clone, Default)]
        pub struct ListQuery {
            pub limit: Option<i64>,
            pub offset: Option<i64>,
            pub sort_field: Option<String>,
            pub sort_direction: Option<String>,
            pub fields: Option<String>,
            pub ranges: Vec<RangeFilter>,
        }

        fn arg<'a>(args: &'a Value, key: &str) -> Option<&'a Value> {
            args.get(key).filter(|v| !v.is_null())
        }

        fn arg_error(key: &str, expected: &str, got: &Value) -> ToolError {
            ToolError::InvalidArgument(format!("{} must be {}, got {}", key, expected, got))
        }

        fn arg_string(args: &Value, key: &str) -> Result<Option<String>, ToolError> {
            match arg(args, key) {
                None => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(other) => Err(arg_error(key, "a string", other)),
            }
        }

        fn arg_i64(args: &Value, key: &str) -> Result<Option<i64>, ToolError> {
            match arg(args, key) {
                None => Ok(None),
                Some(v) => v.as_i64().map(Some).ok_or_else(|| arg_error(key, "an integer", v)),
            }
        }

        fn arg_f64(args: &Value, key: &str) -> Result<Option<f64>, ToolError> {
            match arg(args, key) {
                None => Ok(None),
                Some(v) => v.as_f64().map(Some).ok_or_else(|| arg_error(key, "a number", v)),
            }
        }

        fn arg_bool(args: &Value, key: &str) -> Result<Option<bool>, ToolError> {
            match arg(args, key) {
                None => Ok(None),
                Some(v) => v.as_bool().map(Some).ok_or_else(|| arg_error(key, "a boolean", v)),
            }
        }

        fn arg_json(args: &Value, key: &str) -> Result<Option<Value>, ToolError> {
            Ok(arg(args, key).cloned())
        }

        fn arg_list(args: &Value, key: &str) -> Result<Option<Vec<Value>>, ToolError> {
            match arg(args, key) {
                None => Ok(None),
                Some(Value::Array(items)) => Ok(Some(items.clone())),
                Some(other) => Err(arg_error(key, "an array", other)),
            }
        }

        fn arg_strings(args: &Value, key: &str) -> Result<Option<Vec<String>>, ToolError> {
            match arg_list(args, key)? {
                None => Ok(None),
                Some(items) => items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| arg_error(key, "an array of strings", item))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Some),
            }
        }

        fn required<T>(value: Option<T>, key: &str) -> Result<T, ToolError> {
            value.ok_or_else(|| ToolError::InvalidArgument(format!("missing required argument {}", key)))
        }

        fn key_column(table: &TableDef) -> Result<&'static ColumnDef, ToolError> {
            table
                .primary_key
                .and_then(|name| table.column(name))
                .ok_or_else(|| ToolError::InvalidArgument(format!("{} has no primary key", table.name)))
        }

        /// Batches must be non-empty and no larger than `MAX_LIMIT`.
        fn check_batch(len: usize, what: &str) -> Result<(), ToolError> {
            if len == 0 {
                return Err(ToolError::InvalidArgument(format!("{} must not be empty", what)));
            }
            if len as i64 > MAX_LIMIT {
                return Err(ToolError::InvalidArgument(format!(
                    "at most {} {} per call",
                    MAX_LIMIT, what
                )));
            }
            Ok(())
        }

        /// Requested fields intersected with the table's real columns. Falls
        /// back to every column when nothing valid was requested.
        fn resolve_fields(table: &TableDef, fields: Option<&str>) -> Vec<&'static ColumnDef> {
            let requested: Vec<&str> = fields
                .map(|f| f.split(',').map(str::trim).filter(|f| !f.is_empty()).collect())
                .unwrap_or_default();
            let selected: Vec<&'static ColumnDef> = table
                .columns
                .iter()
                .filter(|c| requested.contains(&c.name))
                .collect();
            if selected.is_empty() {
                table.columns.iter().collect()
            } else {
                selected
            }
        }

        /// Sort column (must be a real column) and whether it is descending.
        fn resolve_sort(
            table: &TableDef,
            field: Option<&str>,
            direction: Option<&str>,
        ) -> Result<Option<(&'static ColumnDef, bool)>, ToolError> {
            let descending = match direction.map(|d| d.trim().to_ascii_lowercase()) {
                None => false,
                Some(d) if d.is_empty() || d == "asc" => false,
                Some(d) if d == "desc" => true,
                Some(d) => {
                    return Err(ToolError::InvalidArgument(format!(
                        "sort_direction must be asc or desc, got {}",
                        d
                    )));
                }
            };
            match field {
                None => Ok(None),
                Some(name) => table
                    .column(name)
                    .map(|c| Some((c, descending)))
                    .ok_or_else(|| ToolError::InvalidArgument(format!("unknown sort field {}", name))),
            }
        }

        /// Validated aggregate request: group column, lowercase function name
        /// and the numeric column it applies to (`None` for `count`).
        fn checked_aggregate(
            table: &TableDef,
            group_by: &str,
            agg_function: &str,
            agg_field: Option<&str>,
        ) -> Result<(&'static ColumnDef, String, Option<&'static ColumnDef>), ToolError> {
            let group = table
                .column(group_by)
                .ok_or_else(|| ToolError::InvalidArgument(format!("unknown group_by column {}", group_by)))?;
            let function = agg_function.trim().to_ascii_lowercase();
            match function.as_str() {
                "count" => Ok((group, function.clone(), None)),
                "sum" | "avg" | "min" | "max" => {
                    let name = agg_field.ok_or_else(|| {
                        ToolError::InvalidArgument(format!("agg_field is required for {}", function))
                    })?;
                    let field = table
                        .column(name)
                        .ok_or_else(|| ToolError::InvalidArgument(format!("unknown agg_field column {}", name)))?;
                    if field.kind != "integer" && field.kind != "float" {
                        return Err(ToolError::InvalidArgument(format!("agg_field {} is not numeric", name)));
                    }
                    Ok((group, function.clone(), Some(field)))
                }
                other => Err(ToolError::InvalidArgument(format!(
                    "agg_function must be count, sum, avg, min or max, got {}",
                    other
                ))),
            }
        }

        fn table_schema(table: &TableDef) -> Value {
            let columns: Vec<Value> = table
                .columns
                .iter()
                .map(|c| {
                    json!({
                        "name": c.name,
                        "type": c.kind,
                        "nullable": c.nullable,
                        "primary_key": c.primary_key,
                    })
                })
                .collect();
            json!({
                "table": table.name,
                "primary_key": table.primary_key,
                "operations": table.ops,
                "columns": columns,
            })
        }

        fn cell_text(value: Option<&Value>) -> String {
            match value {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            }
        }

        fn record_pairs(record: &Value) -> Result<Vec<(&str, Value)>, ToolError> {
            let object = record
                .as_object()
                .ok_or_else(|| ToolError::InvalidArgument("records must be JSON objects".to_string()))?;
            Ok(object.iter().map(|(k, v)| (k.as_str(), v.clone())).collect())
        }

        #csv
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    const DEFAULT_LIMIT: i64 = 3;
    const MAX_LIMIT: i64 = 5;

    include!("paging.rs");

    fn page(rows: i64, limit: Option<i64>, offset: Option<i64>) -> Value {
        let records: Vec<Value> = (0..rows).map(|id| json!({ "id": id })).collect();
        let limit = clamp_limit(limit);
        let offset = clamp_offset(offset);
        page_envelope(page_window(records, limit, offset), rows, offset)
    }

    #[test]
    fn test_page_size_follows_limit_and_remaining_rows() {
        let cases = [
            (None, None),
            (Some(2), Some(0)),
            (Some(2), Some(6)),
            (Some(99), Some(0)),
            (Some(5), Some(10)),
            (Some(0), Some(0)),
            (Some(-3), Some(-1)),
            (Some(1), Some(7)),
        ];
        for rows in [0i64, 1, 7] {
            for (limit, offset) in cases {
                let envelope = page(rows, limit, offset);
                let effective_limit = clamp_limit(limit);
                let effective_offset = clamp_offset(offset);
                let expected = effective_limit.min((rows - effective_offset).max(0));
                let results = envelope["results"].as_array().unwrap();

                assert_eq!(results.len() as i64, expected, "rows={rows} limit={limit:?} offset={offset:?}");
                assert_eq!(envelope["total"], json!(rows));
                assert_eq!(envelope["next_offset"], json!(effective_offset + expected));
                assert_eq!(envelope["has_more"], json!(effective_offset + expected < rows));
            }
        }
    }

    #[test]
    fn test_limits_are_clamped() {
        assert_eq!(clamp_limit(None), DEFAULT_LIMIT);
        assert_eq!(clamp_limit(Some(99)), MAX_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-4)), 1);
        assert_eq!(clamp_offset(Some(-1)), 0);
    }

    #[test]
    fn test_last_page_of_seven() {
        let envelope = page(7, Some(2), Some(6));
        assert_eq!(envelope["results"], json!([{ "id": 6 }]));
        assert_eq!(envelope["has_more"], json!(false));
        assert_eq!(envelope["next_offset"], json!(7));
    }

    #[test]
    fn test_walking_pages_visits_every_row_once() {
        let mut offset = Some(0);
        let mut seen = Vec::new();
        loop {
            let envelope = page(7, Some(3), offset);
            for row in envelope["results"].as_array().unwrap() {
                seen.push(row["id"].as_i64().unwrap());
            }
            if envelope["has_more"] != json!(true) {
                break;
            }
            offset = envelope["next_offset"].as_i64();
        }
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_paging_helpers_tokenize() {
        let tokens = super::paging().unwrap().to_string();
        assert!(tokens.contains("fn clamp_limit"));
        assert!(tokens.contains("fn page_envelope"));
    }
}
