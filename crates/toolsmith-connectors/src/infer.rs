//! Column type inference for schemaless records (CSV cells, JSON values).

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use toolsmith_core::{Column, ColumnType, Table};

fn text_type(cell: &str) -> Option<ColumnType> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    let ty = if cell.parse::<i64>().is_ok() {
        ColumnType::Integer
    } else if cell.parse::<f64>().is_ok() {
        ColumnType::Float
    } else if cell.eq_ignore_ascii_case("true") || cell.eq_ignore_ascii_case("false") {
        ColumnType::Boolean
    } else if NaiveDate::parse_from_str(cell, "%Y-%m-%d").is_ok() {
        ColumnType::Date
    } else if DateTime::parse_from_rfc3339(cell).is_ok()
        || NaiveDateTime::parse_from_str(cell, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(cell, "%Y-%m-%dT%H:%M:%S").is_ok()
    {
        ColumnType::Datetime
    } else {
        ColumnType::String
    };
    Some(ty)
}

fn value_type(value: &Value) -> Option<ColumnType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(ColumnType::Boolean),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(ColumnType::Integer),
        Value::Number(_) => Some(ColumnType::Float),
        Value::String(s) => text_type(s),
        Value::Array(_) | Value::Object(_) => Some(ColumnType::Json),
    }
}

/// Narrowest type covering both observations.
fn widen(current: ColumnType, seen: ColumnType) -> ColumnType {
    use ColumnType::*;
    match (current, seen) {
        (a, b) if a == b => a,
        (Integer, Float) | (Float, Integer) => Float,
        (Date, Datetime) | (Datetime, Date) => Datetime,
        (Json, _) | (_, Json) => Json,
        _ => String,
    }
}

#[derive(Debug, Default)]
struct Observed {
    ty: Option<ColumnType>,
    missing: bool,
}

/// Accumulates observations for one table, keeping first-seen column order.
#[derive(Debug, Default)]
pub(crate) struct Inference {
    order: Vec<String>,
    columns: BTreeMap<String, Observed>,
    rows: u64,
}

impl Inference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare columns up front, e.g. from a CSV header.
    pub fn with_columns<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        for name in names {
            self.column(name);
        }
        self
    }

    fn column(&mut self, name: &str) -> &mut Observed {
        if !self.columns.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.columns.entry(name.to_string()).or_default()
    }

    fn observe(&mut self, name: &str, ty: Option<ColumnType>) {
        let observed = self.column(name);
        match ty {
            None => observed.missing = true,
            Some(ty) => observed.ty = Some(observed.ty.map_or(ty, |current| widen(current, ty))),
        }
    }

    /// One CSV row, cells aligned with `headers`.
    pub fn text_row<'a>(&mut self, headers: &[String], cells: impl IntoIterator<Item = &'a str>) {
        let mut seen = 0;
        for (name, cell) in headers.iter().zip(cells) {
            self.observe(name, text_type(cell));
            seen += 1;
        }
        for name in &headers[seen.min(headers.len())..] {
            self.observe(name, None);
        }
        self.rows += 1;
    }

    /// One JSON record. Non-object values are ignored.
    pub fn record(&mut self, record: &Value) {
        let Value::Object(object) = record else {
            return;
        };
        for (name, value) in object {
            self.observe(name, value_type(value));
        }
        // Keys absent from this record are nullable.
        let absent: Vec<String> = self
            .order
            .iter()
            .filter(|name| !object.contains_key(name.as_str()))
            .cloned()
            .collect();
        for name in absent {
            self.observe(&name, None);
        }
        self.rows += 1;
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Finished table. Columns never seen with a value become strings; a
    /// column named `id` becomes the primary key.
    pub fn into_table(self, name: impl Into<String>) -> Table {
        let mut table = Table::new(name);
        for column_name in self.order {
            let observed = self.columns.get(&column_name);
            let ty = observed.and_then(|o| o.ty).unwrap_or(ColumnType::String);
            let missing = observed.is_none_or(|o| o.missing || o.ty.is_none());
            let is_id = column_name.eq_ignore_ascii_case("id");
            let mut column = Column::new(column_name, ty);
            if is_id {
                column = column.primary();
            } else if !missing && self.rows > 0 {
                column = column.not_null();
            }
            table = table.with_column(column);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_types() {
        assert_eq!(text_type("42"), Some(ColumnType::Integer));
        assert_eq!(text_type("4.5"), Some(ColumnType::Float));
        assert_eq!(text_type("TRUE"), Some(ColumnType::Boolean));
        assert_eq!(text_type("2024-03-01"), Some(ColumnType::Date));
        assert_eq!(text_type("2024-03-01T10:00:00Z"), Some(ColumnType::Datetime));
        assert_eq!(text_type("2024-03-01 10:00:00"), Some(ColumnType::Datetime));
        assert_eq!(text_type("hello"), Some(ColumnType::String));
        assert_eq!(text_type("  "), None);
    }

    #[test]
    fn test_widening() {
        assert_eq!(widen(ColumnType::Integer, ColumnType::Float), ColumnType::Float);
        assert_eq!(widen(ColumnType::Date, ColumnType::Datetime), ColumnType::Datetime);
        assert_eq!(widen(ColumnType::Integer, ColumnType::String), ColumnType::String);
        assert_eq!(widen(ColumnType::Boolean, ColumnType::Integer), ColumnType::String);
    }

    #[test]
    fn test_csv_rows() {
        let headers = vec!["id".to_string(), "price".to_string(), "note".to_string()];
        let mut inference = Inference::new().with_columns(headers.iter().map(String::as_str));
        inference.text_row(&headers, ["1", "10", "first"]);
        inference.text_row(&headers, ["2", "10.5", ""]);
        let table = inference.into_table("items");

        assert_eq!(table.columns[0].column_type, ColumnType::Integer);
        assert!(table.columns[0].primary_key);
        assert_eq!(table.columns[1].column_type, ColumnType::Float);
        assert!(!table.columns[1].nullable);
        assert_eq!(table.columns[2].column_type, ColumnType::String);
        assert!(table.columns[2].nullable);
    }

    #[test]
    fn test_json_records() {
        let mut inference = Inference::new();
        inference.record(&json!({"name": "a", "tags": ["x"], "score": 1}));
        inference.record(&json!({"name": "b", "score": 2.5}));
        let table = inference.into_table("docs");

        let column = |name: &str| table.column(name).unwrap();
        assert_eq!(column("score").column_type, ColumnType::Float);
        assert_eq!(column("tags").column_type, ColumnType::Json);
        assert!(column("tags").nullable);
        assert!(!column("name").nullable);
    }
}
