//! SQL dialect runtime and per-flavor connection handling.
//!
//! The runtime builds statements from baked-in table metadata only: caller
//! input reaches the database as bound parameters or as clamped integers,
//! never as identifiers.

use proc_macro2::{Literal, TokenStream};
use quote::quote;
use toolsmith_core::{BackendFamily, SqlFlavor};

use super::Ctx;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
}

impl Dialect {
    fn of(ctx: &Ctx<'_>) -> Self {
        match ctx.family() {
            BackendFamily::NetworkSql(SqlFlavor::Postgres) => Dialect::Postgres,
            BackendFamily::NetworkSql(SqlFlavor::Mysql) => Dialect::Mysql,
            _ => Dialect::Sqlite,
        }
    }
}

/// Identifier quote character for the context's SQL flavor, if it has one.
pub fn quote_char(ctx: &Ctx<'_>) -> Option<char> {
    if !ctx.family().is_sql() {
        return None;
    }
    Some(match Dialect::of(ctx) {
        Dialect::Mysql => '`',
        Dialect::Sqlite | Dialect::Postgres => '"',
    })
}

pub fn runtime(ctx: &Ctx<'_>) -> TokenStream {
    let dialect = dialect_items(ctx);
    let reads = read_helpers(ctx);
    let writes = write_helpers(ctx);
    quote! {
        #dialect
        #reads
        #writes
    }
}

fn dialect_items(ctx: &Ctx<'_>) -> TokenStream {
    let dialect = Dialect::of(ctx);
    let quote_char = quote_char(ctx).unwrap_or('"');
    let (text_type, float_type, like_op, empty_insert) = match dialect {
        Dialect::Sqlite => ("TEXT", "REAL", "LIKE", "DEFAULT VALUES"),
        Dialect::Postgres => ("TEXT", "DOUBLE PRECISION", "ILIKE", "DEFAULT VALUES"),
        Dialect::Mysql => ("CHAR", "DOUBLE", "LIKE", "() VALUES ()"),
    };
    let range_bound = match dialect {
        Dialect::Sqlite => quote! {
            /// Left and right operands comparing `column` with bound `n`.
            /// `date()`/`datetime()` normalize both `T` and space separators.
            fn range_bound(column: &ColumnDef, n: usize) -> (String, String) {
                match column.kind {
                    "date" => (format!("date({})", column.quoted), format!("date({})", placeholder(n))),
                    "datetime" => (format!("datetime({})", column.quoted), format!("datetime({})", placeholder(n))),
                    _ => (format!("CAST({} AS {})", column.quoted, TEXT_TYPE), placeholder(n)),
                }
            }
        },
        Dialect::Postgres => quote! {
            /// Left and right operands comparing `column` with bound `n`.
            fn range_bound(column: &ColumnDef, n: usize) -> (String, String) {
                match column.kind {
                    "date" | "datetime" => (column.quoted.to_string(), value_placeholder(column, n)),
                    _ => (format!("CAST({} AS {})", column.quoted, TEXT_TYPE), placeholder(n)),
                }
            }
        },
        Dialect::Mysql => quote! {
            /// Left and right operands comparing `column` with bound `n`.
            fn range_bound(column: &ColumnDef, n: usize) -> (String, String) {
                match column.kind {
                    "date" => (column.quoted.to_string(), format!("CAST({} AS DATE)", placeholder(n))),
                    "datetime" => (column.quoted.to_string(), format!("CAST({} AS DATETIME)", placeholder(n))),
                    _ => (format!("CAST({} AS {})", column.quoted, TEXT_TYPE), placeholder(n)),
                }
            }
        },
    };
    let placeholders = if dialect == Dialect::Postgres {
        quote! {
            fn placeholder(n: usize) -> String {
                format!("${}", n)
            }

            /// Placeholder for a value written to `column`; text input is cast
            /// to the column's type so dates and JSON can be sent as strings.
            fn value_placeholder(column: &ColumnDef, n: usize) -> String {
                match column.kind {
                    "date" => format!("CAST(${} AS DATE)", n),
                    "datetime" => format!("CAST(${} AS TIMESTAMP)", n),
                    "json" => format!("CAST(${} AS JSONB)", n),
                    _ => placeholder(n),
                }
            }
        }
    } else {
        quote! {
            fn placeholder(_n: usize) -> String {
                "?".to_string()
            }

            fn value_placeholder(_column: &ColumnDef, n: usize) -> String {
                placeholder(n)
            }
        }
    };

    quote! {
        const QUOTE: char = #quote_char;
        const TEXT_TYPE: &str = #text_type;
        const FLOAT_TYPE: &str = #float_type;
        const LIKE_OP: &str = #like_op;
        const EMPTY_INSERT: &str = #empty_insert;

        #placeholders
        #range_bound

        /// `%query%` with LIKE wildcards in `query` matched literally
        /// (paired with `ESCAPE '!'`).
        fn like_pattern(query: &str) -> String {
            let mut pattern = String::with_capacity(query.len() + 2);
            pattern.push('%');
            for c in query.chars() {
                if matches!(c, '%' | '_' | '!') {
                    pattern.push('!');
                }
                pattern.push(c);
            }
            pattern.push('%');
            pattern
        }

        /// ` ORDER BY` clause: the requested sort, then the primary key so
        /// pages stay stable across calls.
        fn order_clause(table: &TableDef, sort: Option<(&'static ColumnDef, bool)>, alias: &str) -> String {
            let key = table.primary_key.and_then(|name| table.column(name));
            let mut terms = Vec::new();
            if let Some((column, descending)) = sort {
                terms.push(format!("{}{} {}", alias, column.quoted, if descending { "DESC" } else { "ASC" }));
            }
            if let Some(key) = key {
                if sort.map_or(true, |(column, _)| column.name != key.name) {
                    terms.push(format!("{}{} ASC", alias, key.quoted));
                }
            }
            if terms.is_empty() {
                String::new()
            } else {
                format!(" ORDER BY {}", terms.join(", "))
            }
        }

        fn quote_ident(name: &str) -> String {
            let doubled = format!("{}{}", QUOTE, QUOTE);
            format!("{}{}{}", QUOTE, name.replace(QUOTE, &doubled), QUOTE)
        }

        fn select_list(columns: &[&'static ColumnDef]) -> String {
            if columns.is_empty() {
                "*".to_string()
            } else {
                columns.iter().map(|c| c.quoted).collect::<Vec<_>>().join(", ")
            }
        }

        fn cell_count(value: &Value) -> Option<i64> {
            value
                .as_i64()
                .or_else(|| value.as_f64().map(|f| f as i64))
                .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        }
    }
}

fn read_helpers(ctx: &Ctx<'_>) -> TokenStream {
    let asyncness = ctx.asyncness();
    let dot_await = ctx.dot_await();

    quote! {
        #asyncness fn db_count(tool: &str, sql: &str, params: Vec<Value>) -> Result<i64, ToolError> {
            let rows = db_rows(tool, sql, params)#dot_await?;
            Ok(rows
                .first()
                .and_then(|row| row.get("total"))
                .and_then(cell_count)
                .unwrap_or(0))
        }

        #asyncness fn table_list(tool: &str, table: &TableDef, query: ListQuery) -> ToolResult {
            let limit = clamp_limit(query.limit);
            let offset = clamp_offset(query.offset);
            let columns = resolve_fields(table, query.fields.as_deref());
            let sort = resolve_sort(table, query.sort_field.as_deref(), query.sort_direction.as_deref())?;

            let mut clauses = Vec::new();
            let mut params = Vec::new();
            for range in &query.ranges {
                let Some(column) = table.column(range.column) else {
                    continue;
                };
                if let Some(from) = &range.from {
                    params.push(Value::String(from.clone()));
                    let (left, right) = range_bound(column, params.len());
                    clauses.push(format!("{} >= {}", left, right));
                }
                if let Some(to) = &range.to {
                    params.push(Value::String(to.clone()));
                    let (left, right) = range_bound(column, params.len());
                    clauses.push(format!("{} <= {}", left, right));
                }
            }
            let filter = if clauses.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", clauses.join(" AND "))
            };
            let order = order_clause(table, sort, "");

            let total = db_count(
                tool,
                &format!("SELECT COUNT(*) AS total FROM {}{}", table.quoted, filter),
                params.clone(),
            )#dot_await?;
            let sql = format!(
                "SELECT {} FROM {}{}{} LIMIT {} OFFSET {}",
                select_list(&columns),
                table.quoted,
                filter,
                order,
                limit,
                offset
            );
            let rows = db_rows(tool, &sql, params)#dot_await?;
            Ok(page_envelope(rows, total, offset))
        }

        #asyncness fn table_get(tool: &str, table: &TableDef, key: Value) -> ToolResult {
            let pk = key_column(table)?;
            let columns: Vec<&'static ColumnDef> = table.columns.iter().collect();
            let sql = format!(
                "SELECT {} FROM {} WHERE {} = {} LIMIT 1",
                select_list(&columns),
                table.quoted,
                pk.quoted,
                placeholder(1)
            );
            let rows = db_rows(tool, &sql, vec![key])#dot_await?;
            Ok(rows.into_iter().next().unwrap_or(Value::Null))
        }

        #asyncness fn table_search(tool: &str, table: &TableDef, query: String, limit: Option<i64>) -> ToolResult {
            let limit = clamp_limit(limit);
            let searchable = table.searchable();
            if searchable.is_empty() {
                return Ok(json!({"results": [], "count": 0}));
            }
            let pattern = like_pattern(&query);
            let mut params = Vec::new();
            let mut clauses = Vec::new();
            for column in searchable {
                params.push(Value::String(pattern.clone()));
                clauses.push(format!(
                    "CAST({} AS {}) {} {} ESCAPE '!'",
                    column.quoted,
                    TEXT_TYPE,
                    LIKE_OP,
                    placeholder(params.len())
                ));
            }
            let columns: Vec<&'static ColumnDef> = table.columns.iter().collect();
            let sql = format!(
                "SELECT {} FROM {} WHERE {}{} LIMIT {}",
                select_list(&columns),
                table.quoted,
                clauses.join(" OR "),
                order_clause(table, None, ""),
                limit
            );
            let rows = db_rows(tool, &sql, params)#dot_await?;
            let count = rows.len();
            Ok(json!({"results": rows, "count": count}))
        }

        #asyncness fn table_count(tool: &str, table: &TableDef) -> ToolResult {
            let sql = format!("SELECT COUNT(*) AS total FROM {}", table.quoted);
            let count = db_count(tool, &sql, Vec::new())#dot_await?;
            Ok(json!({"table": table.name, "count": count}))
        }

        #asyncness fn table_aggregate(
            tool: &str,
            table: &TableDef,
            group_by: String,
            agg_function: String,
            agg_field: Option<String>,
        ) -> ToolResult {
            let (group, function, field) = checked_aggregate(table, &group_by, &agg_function, agg_field.as_deref())?;
            let expression = match (function.as_str(), field) {
                (_, None) => "COUNT(*)".to_string(),
                ("sum" | "avg", Some(field)) => {
                    format!("CAST({}({}) AS {})", function.to_uppercase(), field.quoted, FLOAT_TYPE)
                }
                (_, Some(field)) => format!("{}({})", function.to_uppercase(), field.quoted),
            };
            let sql = format!(
                "SELECT {g} AS group_key, {e} AS value FROM {t} GROUP BY {g} ORDER BY {g} LIMIT {l}",
                g = group.quoted,
                e = expression,
                t = table.quoted,
                l = MAX_LIMIT
            );
            let groups = db_rows(tool, &sql, Vec::new())#dot_await?;
            Ok(json!({
                "group_by": group.name,
                "agg_function": function,
                "agg_field": field.map(|f| f.name),
                "groups": groups,
            }))
        }

        /// Up to `limit` rows with every column, in storage order.
        #asyncness fn table_rows(tool: &str, table: &TableDef, limit: Option<i64>) -> Result<Vec<Value>, ToolError> {
            let columns: Vec<&'static ColumnDef> = table.columns.iter().collect();
            let sql = format!(
                "SELECT {} FROM {} LIMIT {}",
                select_list(&columns),
                table.quoted,
                clamp_limit(limit)
            );
            db_rows(tool, &sql, Vec::new())#dot_await
        }

        #asyncness fn table_join(
            tool: &str,
            from: &TableDef,
            from_column: &str,
            to: &TableDef,
            to_column: &str,
            limit: Option<i64>,
            offset: Option<i64>,
        ) -> ToolResult {
            let limit = clamp_limit(limit);
            let offset = clamp_offset(offset);
            let left = from
                .column(from_column)
                .ok_or_else(|| ToolError::backend(tool, format!("{} has no column {}", from.name, from_column)))?;
            let right = to
                .column(to_column)
                .ok_or_else(|| ToolError::backend(tool, format!("{} has no column {}", to.name, to_column)))?;

            let mut select = Vec::new();
            for column in from.columns {
                select.push(format!("a.{} AS {}", column.quoted, quote_ident(&format!("{}.{}", from.name, column.name))));
            }
            for column in to.columns {
                select.push(format!("b.{} AS {}", column.quoted, quote_ident(&format!("{}.{}", to.name, column.name))));
            }
            let select = if select.is_empty() { "*".to_string() } else { select.join(", ") };
            let source = format!(
                "FROM {} a JOIN {} b ON a.{} = b.{}",
                from.quoted, to.quoted, left.quoted, right.quoted
            );

            let total = db_count(tool, &format!("SELECT COUNT(*) AS total {}", source), Vec::new())#dot_await?;
            let sql = format!(
                "SELECT {} {}{} LIMIT {} OFFSET {}",
                select,
                source,
                order_clause(from, None, "a."),
                limit,
                offset
            );
            let rows = db_rows(tool, &sql, Vec::new())#dot_await?;
            Ok(page_envelope(rows, total, offset))
        }
    }
}

fn write_helpers(ctx: &Ctx<'_>) -> TokenStream {
    let asyncness = ctx.asyncness();
    let dot_await = ctx.dot_await();

    quote! {
        fn build_insert(table: &TableDef, values: Vec<(&str, Value)>) -> Result<(String, Vec<Value>), ToolError> {
            let mut columns = Vec::new();
            let mut marks = Vec::new();
            let mut params = Vec::new();
            for (name, value) in values {
                let column = table.column(name).ok_or_else(|| {
                    ToolError::InvalidArgument(format!("unknown column {} for {}", name, table.name))
                })?;
                params.push(value);
                columns.push(column.quoted);
                marks.push(value_placeholder(column, params.len()));
            }
            let sql = if columns.is_empty() {
                format!("INSERT INTO {} {}", table.quoted, EMPTY_INSERT)
            } else {
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table.quoted,
                    columns.join(", "),
                    marks.join(", ")
                )
            };
            Ok((sql, params))
        }

        #asyncness fn table_insert(tool: &str, table: &TableDef, values: Vec<(&str, Value)>) -> ToolResult {
            let record: Map<String, Value> = values.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
            let statement = build_insert(table, values)?;
            let affected = db_write(tool, vec![statement])#dot_await?;
            Ok(json!({"affected": affected, "record": record}))
        }

        #asyncness fn table_batch_insert(tool: &str, table: &TableDef, records: Vec<Value>) -> ToolResult {
            check_batch(records.len(), "records")?;
            let statements = records
                .iter()
                .map(|record| record_pairs(record).and_then(|pairs| build_insert(table, pairs)))
                .collect::<Result<Vec<_>, _>>()?;
            let affected = db_write(tool, statements)#dot_await?;
            Ok(json!({"affected": affected, "count": records.len()}))
        }

        #asyncness fn table_update(tool: &str, table: &TableDef, key: Value, changes: Vec<(&str, Value)>) -> ToolResult {
            let pk = key_column(table)?;
            let mut assignments = Vec::new();
            let mut params = Vec::new();
            for (name, value) in changes {
                if name == pk.name {
                    continue;
                }
                let column = table.column(name).ok_or_else(|| {
                    ToolError::InvalidArgument(format!("unknown column {} for {}", name, table.name))
                })?;
                params.push(value);
                assignments.push(format!("{} = {}", column.quoted, value_placeholder(column, params.len())));
            }
            if assignments.is_empty() {
                return Err(ToolError::InvalidArgument(format!(
                    "nothing to update; pass at least one column besides {}",
                    pk.name
                )));
            }
            params.push(key.clone());
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = {}",
                table.quoted,
                assignments.join(", "),
                pk.quoted,
                placeholder(params.len())
            );
            let affected = db_write(tool, vec![(sql, params)])#dot_await?;
            Ok(json!({"affected": affected, "key": key}))
        }

        #asyncness fn table_delete(tool: &str, table: &TableDef, key: Value) -> ToolResult {
            let pk = key_column(table)?;
            let sql = format!("DELETE FROM {} WHERE {} = {}", table.quoted, pk.quoted, placeholder(1));
            let affected = db_write(tool, vec![(sql, vec![key.clone()])])#dot_await?;
            Ok(json!({"affected": affected, "key": key}))
        }

        #asyncness fn table_batch_delete(tool: &str, table: &TableDef, ids: Vec<Value>) -> ToolResult {
            check_batch(ids.len(), "ids")?;
            let pk = key_column(table)?;
            let marks: Vec<String> = (1..=ids.len()).map(placeholder).collect();
            let sql = format!(
                "DELETE FROM {} WHERE {} IN ({})",
                table.quoted,
                pk.quoted,
                marks.join(", ")
            );
            let count = ids.len();
            let affected = db_write(tool, vec![(sql, ids)])#dot_await?;
            Ok(json!({"affected": affected, "requested": count}))
        }
    }
}

/// Connection handling for the context's SQL flavor and execution mode.
pub fn infrastructure(ctx: &Ctx<'_>) -> TokenStream {
    match (Dialect::of(ctx), ctx.is_async()) {
        (Dialect::Sqlite, false) => sqlite_sync(ctx),
        (Dialect::Sqlite, true) => sqlite_async(ctx),
        (Dialect::Postgres, false) => postgres_sync(ctx),
        (Dialect::Mysql, false) => mysql_sync(ctx),
        (dialect, true) => pooled_async(ctx, dialect),
    }
}

fn sqlite_path(ctx: &Ctx<'_>) -> TokenStream {
    let uri = ctx.schema.source_uri.split(" + ").next().unwrap_or_default();
    let path = uri
        .strip_prefix("sqlite:///")
        .or_else(|| uri.strip_prefix("sqlite://"))
        .or_else(|| uri.strip_prefix("sqlite:"))
        .unwrap_or(uri);
    let env = ctx.plan.kind.connection_env();
    quote! {
        const DEFAULT_SQLITE_PATH: &str = #path;

        fn database_path() -> String {
            std::env::var(#env).unwrap_or_else(|_| DEFAULT_SQLITE_PATH.to_string())
        }
    }
}

fn sqlite_sync(ctx: &Ctx<'_>) -> TokenStream {
    let path = sqlite_path(ctx);
    quote! {
        #path

        fn connect(tool: &str) -> Result<rusqlite::Connection, ToolError> {
            rusqlite::Connection::open(database_path()).map_err(|e| ToolError::backend(tool, e))
        }

        fn sql_param(value: &Value) -> rusqlite::types::Value {
            use rusqlite::types::Value as Sql;
            match value {
                Value::Null => Sql::Null,
                Value::Bool(b) => Sql::Integer(i64::from(*b)),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => Sql::Integer(i),
                    None => Sql::Real(n.as_f64().unwrap_or_default()),
                },
                Value::String(s) => Sql::Text(s.clone()),
                other => Sql::Text(other.to_string()),
            }
        }

        fn sql_value(value: rusqlite::types::ValueRef<'_>) -> Value {
            use rusqlite::types::ValueRef;
            match value {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(i) => json!(i),
                ValueRef::Real(f) => json!(f),
                ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
                ValueRef::Blob(b) => Value::String(b.iter().map(|byte| format!("{:02x}", byte)).collect()),
            }
        }

        fn db_rows(tool: &str, sql: &str, params: Vec<Value>) -> Result<Vec<Value>, ToolError> {
            let conn = connect(tool)?;
            let mut statement = conn.prepare(sql).map_err(|e| ToolError::backend(tool, e))?;
            let names: Vec<String> = statement.column_names().into_iter().map(str::to_string).collect();
            let params: Vec<rusqlite::types::Value> = params.iter().map(sql_param).collect();
            let mut rows = statement
                .query(rusqlite::params_from_iter(params))
                .map_err(|e| ToolError::backend(tool, e))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(|e| ToolError::backend(tool, e))? {
                let mut record = Map::new();
                for (index, name) in names.iter().enumerate() {
                    let value = row.get_ref(index).map_err(|e| ToolError::backend(tool, e))?;
                    record.insert(name.clone(), sql_value(value));
                }
                out.push(Value::Object(record));
            }
            Ok(out)
        }

        /// Runs `statements` in one transaction, rolling back explicitly on
        /// the first failure.
        fn db_write(tool: &str, statements: Vec<(String, Vec<Value>)>) -> Result<u64, ToolError> {
            let mut conn = connect(tool)?;
            let tx = conn.transaction().map_err(|e| ToolError::backend(tool, e))?;
            let mut affected = 0u64;
            for (sql, params) in &statements {
                let params: Vec<rusqlite::types::Value> = params.iter().map(sql_param).collect();
                match tx.execute(sql, rusqlite::params_from_iter(params)) {
                    Ok(n) => affected += n as u64,
                    Err(e) => {
                        if let Err(rollback) = tx.rollback() {
                            tracing::warn!(tool, error = %rollback, "Rollback failed");
                        }
                        return Err(ToolError::backend(tool, e));
                    }
                }
            }
            tx.commit().map_err(|e| ToolError::backend(tool, e))?;
            Ok(affected)
        }
    }
}

/// `fn column_value(row, index) -> Value` trying each `(type, conversion)` in order.
fn try_get_chain(row_type: TokenStream, candidates: &[(TokenStream, TokenStream)]) -> TokenStream {
    let arms = candidates.iter().map(|(ty, convert)| {
        quote! {
            if let Ok(v) = row.try_get::<Option<#ty>, _>(index) {
                return v.map(|v| #convert).unwrap_or(Value::Null);
            }
        }
    });
    quote! {
        fn column_value(row: &#row_type, index: usize) -> Value {
            use sqlx::Row;
            #(#arms)*
            Value::Null
        }

        fn row_to_json(row: &#row_type) -> Value {
            use sqlx::{Column, Row};
            let mut record = Map::new();
            for (index, column) in row.columns().iter().enumerate() {
                record.insert(column.name().to_string(), column_value(row, index));
            }
            Value::Object(record)
        }
    }
}

fn bind_value(db: TokenStream, json_objects: bool) -> TokenStream {
    let objects = if json_objects {
        quote!(other => query.bind(sqlx::types::Json(other)),)
    } else {
        quote!(other => query.bind(other.to_string()),)
    };
    quote! {
        type Db = #db;
        type DbQuery<'q> = sqlx::query::Query<'q, Db, <Db as sqlx::Database>::Arguments<'q>>;

        fn bind_value<'q>(query: DbQuery<'q>, value: Value) -> DbQuery<'q> {
            match value {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => query.bind(i),
                    None => query.bind(n.as_f64().unwrap_or_default()),
                },
                Value::String(s) => query.bind(s),
                #objects
            }
        }
    }
}

fn sqlx_execution(executor: TokenStream, target: TokenStream, begin: TokenStream) -> TokenStream {
    quote! {
        async fn db_rows(tool: &str, sql: &str, params: Vec<Value>) -> Result<Vec<Value>, ToolError> {
            #executor
            let mut query = sqlx::query(sql);
            for value in params {
                query = bind_value(query, value);
            }
            let rows = query
                .fetch_all(#target)
                .await
                .map_err(|e| ToolError::backend(tool, e))?;
            Ok(rows.iter().map(row_to_json).collect())
        }

        /// Runs `statements` in one transaction, rolling back explicitly on
        /// the first failure.
        async fn db_write(tool: &str, statements: Vec<(String, Vec<Value>)>) -> Result<u64, ToolError> {
            #begin
            let mut affected = 0u64;
            for (sql, params) in statements {
                let mut query = sqlx::query(&sql);
                for value in params {
                    query = bind_value(query, value);
                }
                match query.execute(&mut *tx).await {
                    Ok(done) => affected += done.rows_affected(),
                    Err(e) => {
                        if let Err(rollback) = tx.rollback().await {
                            tracing::warn!(tool, error = %rollback, "Rollback failed");
                        }
                        return Err(ToolError::backend(tool, e));
                    }
                }
            }
            tx.commit().await.map_err(|e| ToolError::backend(tool, e))?;
            Ok(affected)
        }
    }
}

fn sqlite_async(ctx: &Ctx<'_>) -> TokenStream {
    let path = sqlite_path(ctx);
    let bind = bind_value(quote!(sqlx::Sqlite), false);
    let decode = try_get_chain(
        quote!(sqlx::sqlite::SqliteRow),
        &[
            (quote!(i64), quote!(json!(v))),
            (quote!(f64), quote!(json!(v))),
            (quote!(String), quote!(Value::String(v))),
            (
                quote!(Vec<u8>),
                quote!(Value::String(v.iter().map(|b| format!("{:02x}", b)).collect())),
            ),
        ],
    );
    let execution = sqlx_execution(
        quote! {
            let mut conn = connect(tool).await?;
        },
        quote!(&mut conn),
        quote! {
            use sqlx::Connection;
            let mut conn = connect(tool).await?;
            let mut tx = conn.begin().await.map_err(|e| ToolError::backend(tool, e))?;
        },
    );

    quote! {
        #path

        async fn connect(tool: &str) -> Result<sqlx::SqliteConnection, ToolError> {
            use sqlx::Connection;
            let options = sqlx::sqlite::SqliteConnectOptions::new().filename(database_path());
            sqlx::SqliteConnection::connect_with(&options)
                .await
                .map_err(|e| ToolError::backend(tool, e))
        }

        #bind
        #decode
        #execution
    }
}

fn pool_bounds(ctx: &Ctx<'_>) -> (Literal, Literal) {
    let min = ctx.meta_u32("pool_min", 1);
    let max = ctx.meta_u32("pool_max", 10).max(min).max(1);
    (Literal::u32_unsuffixed(min), Literal::u32_unsuffixed(max))
}

fn database_url(ctx: &Ctx<'_>, ssl_param: Option<&str>) -> TokenStream {
    let env = ctx.plan.kind.connection_env();
    let missing = format!("{} is not set", env);
    let ssl = match ssl_param.filter(|_| ctx.config.ssl_enabled) {
        Some(param) => quote! {
            if !url.contains(#param) {
                let separator = if url.contains('?') { '&' } else { '?' };
                url = format!("{}{}{}", url, separator, #param);
            }
        },
        None => TokenStream::new(),
    };
    quote! {
        /// Connection string from the environment; never baked into the source.
        fn database_url(tool: &str) -> Result<String, ToolError> {
            let mut url = std::env::var(#env).map_err(|_| ToolError::backend(tool, #missing))?;
            #ssl
            Ok(url)
        }
    }
}

fn pooled_async(ctx: &Ctx<'_>, dialect: Dialect) -> TokenStream {
    let (min, max) = pool_bounds(ctx);
    let (pool_type, options, db, row, ssl_param) = match dialect {
        Dialect::Mysql => (
            quote!(sqlx::MySqlPool),
            quote!(sqlx::mysql::MySqlPoolOptions),
            quote!(sqlx::MySql),
            quote!(sqlx::mysql::MySqlRow),
            "ssl-mode=REQUIRED",
        ),
        _ => (
            quote!(sqlx::PgPool),
            quote!(sqlx::postgres::PgPoolOptions),
            quote!(sqlx::Postgres),
            quote!(sqlx::postgres::PgRow),
            "sslmode=require",
        ),
    };
    let url = database_url(ctx, Some(ssl_param));
    let bind = bind_value(db, dialect == Dialect::Postgres);

    let mut candidates = vec![
        (quote!(bool), quote!(json!(v))),
        (quote!(i64), quote!(json!(v))),
        (quote!(i32), quote!(json!(v))),
        (quote!(i16), quote!(json!(v))),
    ];
    if dialect == Dialect::Mysql {
        candidates.push((quote!(i8), quote!(json!(v))));
        candidates.push((quote!(u64), quote!(json!(v))));
    }
    candidates.extend([
        (quote!(f64), quote!(json!(v))),
        (quote!(f32), quote!(json!(v))),
        (quote!(String), quote!(Value::String(v))),
        (quote!(chrono::NaiveDate), quote!(Value::String(v.to_string()))),
        (quote!(chrono::NaiveDateTime), quote!(Value::String(v.to_string()))),
        (
            quote!(chrono::DateTime<chrono::Utc>),
            quote!(Value::String(v.to_rfc3339())),
        ),
        (quote!(Value), quote!(v)),
        (
            quote!(Vec<u8>),
            quote!(Value::String(v.iter().map(|b| format!("{:02x}", b)).collect())),
        ),
    ]);
    let decode = try_get_chain(row, &candidates);
    let execution = sqlx_execution(
        quote! {
            let pool = pool(tool).await?;
        },
        quote!(pool),
        quote! {
            let mut tx = pool(tool)
                .await?
                .begin()
                .await
                .map_err(|e| ToolError::backend(tool, e))?;
        },
    );

    quote! {
        const POOL_MIN: u32 = #min;
        const POOL_MAX: u32 = #max;

        static POOL: tokio::sync::OnceCell<#pool_type> = tokio::sync::OnceCell::const_new();

        #url

        /// Shared pool, built on first use. Connections are tested before
        /// every checkout and returned when the guard drops.
        async fn pool(tool: &str) -> Result<&'static #pool_type, ToolError> {
            POOL.get_or_try_init(|| async {
                let url = database_url(tool)?;
                tracing::info!(min = POOL_MIN, max = POOL_MAX, "Opening connection pool");
                #options::new()
                    .min_connections(POOL_MIN)
                    .max_connections(POOL_MAX)
                    .test_before_acquire(true)
                    .connect(&url)
                    .await
                    .map_err(|e| ToolError::backend(tool, e))
            })
            .await
        }

        #bind
        #decode
        #execution
    }
}

fn postgres_sync(ctx: &Ctx<'_>) -> TokenStream {
    let (min, max) = pool_bounds(ctx);
    let url = database_url(ctx, None);
    let tls = if ctx.config.ssl_enabled {
        quote! {
            type Tls = postgres_native_tls::MakeTlsConnector;

            fn tls(tool: &str, config: &mut postgres::Config) -> Result<Tls, ToolError> {
                config.ssl_mode(postgres::config::SslMode::Require);
                let connector = native_tls::TlsConnector::new().map_err(|e| ToolError::backend(tool, e))?;
                Ok(postgres_native_tls::MakeTlsConnector::new(connector))
            }
        }
    } else {
        quote! {
            type Tls = postgres::NoTls;

            fn tls(_tool: &str, _config: &mut postgres::Config) -> Result<Tls, ToolError> {
                Ok(postgres::NoTls)
            }
        }
    };

    quote! {
        const POOL_MIN: u32 = #min;
        const POOL_MAX: u32 = #max;

        type Pool = r2d2::Pool<r2d2_postgres::PostgresConnectionManager<Tls>>;

        static POOL: Mutex<Option<Pool>> = Mutex::new(None);

        #tls
        #url

        /// Shared pool, built on first use. Every checkout is tested and dead
        /// connections are replaced; connections return when the guard drops.
        fn pool(tool: &str) -> Result<Pool, ToolError> {
            let mut guard = POOL
                .lock()
                .map_err(|_| ToolError::backend(tool, "connection pool lock poisoned"))?;
            if let Some(pool) = guard.as_ref() {
                return Ok(pool.clone());
            }
            let mut config: postgres::Config = database_url(tool)?
                .parse()
                .map_err(|e| ToolError::backend(tool, e))?;
            let connector = tls(tool, &mut config)?;
            let manager = r2d2_postgres::PostgresConnectionManager::new(config, connector);
            tracing::info!(min = POOL_MIN, max = POOL_MAX, "Opening connection pool");
            let pool = r2d2::Pool::builder()
                .min_idle(Some(POOL_MIN))
                .max_size(POOL_MAX)
                .test_on_check_out(true)
                .build(manager)
                .map_err(|e| ToolError::backend(tool, e))?;
            *guard = Some(pool.clone());
            Ok(pool)
        }

        /// JSON value bound as a parameter of whatever type the server expects.
        #[derive(Debug)]
        struct Param(Value);

        impl postgres::types::ToSql for Param {
            fn to_sql(
                &self,
                ty: &postgres::types::Type,
                out: &mut bytes::BytesMut,
            ) -> Result<postgres::types::IsNull, Box<dyn std::error::Error + Sync + Send>> {
                use postgres::types::{IsNull, ToSql, Type};
                match &self.0 {
                    Value::Null => Ok(IsNull::Yes),
                    Value::Bool(b) => b.to_sql(ty, out),
                    Value::Number(n) => {
                        if *ty == Type::INT2 {
                            i16::try_from(n.as_i64().ok_or("expected an integer")?)?.to_sql(ty, out)
                        } else if *ty == Type::INT4 {
                            i32::try_from(n.as_i64().ok_or("expected an integer")?)?.to_sql(ty, out)
                        } else if *ty == Type::INT8 {
                            n.as_i64().ok_or("expected an integer")?.to_sql(ty, out)
                        } else if *ty == Type::FLOAT4 {
                            (n.as_f64().ok_or("expected a number")? as f32).to_sql(ty, out)
                        } else if *ty == Type::FLOAT8 {
                            n.as_f64().ok_or("expected a number")?.to_sql(ty, out)
                        } else if *ty == Type::JSON || *ty == Type::JSONB {
                            self.0.to_sql(ty, out)
                        } else {
                            n.to_string().to_sql(ty, out)
                        }
                    }
                    Value::String(s) => {
                        if *ty == Type::INT2 {
                            s.parse::<i16>()?.to_sql(ty, out)
                        } else if *ty == Type::INT4 {
                            s.parse::<i32>()?.to_sql(ty, out)
                        } else if *ty == Type::INT8 {
                            s.parse::<i64>()?.to_sql(ty, out)
                        } else if *ty == Type::FLOAT4 {
                            s.parse::<f32>()?.to_sql(ty, out)
                        } else if *ty == Type::FLOAT8 {
                            s.parse::<f64>()?.to_sql(ty, out)
                        } else if *ty == Type::BOOL {
                            s.parse::<bool>()?.to_sql(ty, out)
                        } else if *ty == Type::DATE {
                            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")?.to_sql(ty, out)
                        } else if *ty == Type::TIMESTAMP {
                            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                                .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))?
                                .to_sql(ty, out)
                        } else if *ty == Type::TIMESTAMPTZ {
                            chrono::DateTime::parse_from_rfc3339(s)?
                                .with_timezone(&chrono::Utc)
                                .to_sql(ty, out)
                        } else if *ty == Type::JSON || *ty == Type::JSONB {
                            serde_json::from_str::<Value>(s)
                                .unwrap_or_else(|_| Value::String(s.clone()))
                                .to_sql(ty, out)
                        } else {
                            s.as_str().to_sql(ty, out)
                        }
                    }
                    other => {
                        if *ty == Type::JSON || *ty == Type::JSONB {
                            other.to_sql(ty, out)
                        } else {
                            other.to_string().to_sql(ty, out)
                        }
                    }
                }
            }

            fn accepts(_ty: &postgres::types::Type) -> bool {
                true
            }

            postgres::types::to_sql_checked!();
        }

        fn column_value(row: &postgres::Row, index: usize) -> Value {
            use postgres::types::Type;
            let Some(column) = row.columns().get(index) else {
                return Value::Null;
            };
            let ty = column.type_();
            let value = if *ty == Type::BOOL {
                row.try_get::<_, Option<bool>>(index).map(|v| v.map(Value::from))
            } else if *ty == Type::INT2 {
                row.try_get::<_, Option<i16>>(index).map(|v| v.map(Value::from))
            } else if *ty == Type::INT4 {
                row.try_get::<_, Option<i32>>(index).map(|v| v.map(Value::from))
            } else if *ty == Type::INT8 {
                row.try_get::<_, Option<i64>>(index).map(|v| v.map(Value::from))
            } else if *ty == Type::FLOAT4 {
                row.try_get::<_, Option<f32>>(index).map(|v| v.map(|f| json!(f)))
            } else if *ty == Type::FLOAT8 {
                row.try_get::<_, Option<f64>>(index).map(|v| v.map(|f| json!(f)))
            } else if *ty == Type::DATE {
                row.try_get::<_, Option<chrono::NaiveDate>>(index)
                    .map(|v| v.map(|d| Value::String(d.to_string())))
            } else if *ty == Type::TIMESTAMP {
                row.try_get::<_, Option<chrono::NaiveDateTime>>(index)
                    .map(|v| v.map(|d| Value::String(d.to_string())))
            } else if *ty == Type::TIMESTAMPTZ {
                row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(index)
                    .map(|v| v.map(|d| Value::String(d.to_rfc3339())))
            } else if *ty == Type::JSON || *ty == Type::JSONB {
                row.try_get::<_, Option<Value>>(index)
            } else if *ty == Type::BYTEA {
                row.try_get::<_, Option<Vec<u8>>>(index)
                    .map(|v| v.map(|b| Value::String(b.iter().map(|x| format!("{:02x}", x)).collect())))
            } else {
                row.try_get::<_, Option<String>>(index).map(|v| v.map(Value::String))
            };
            value.ok().flatten().unwrap_or(Value::Null)
        }

        fn row_to_json(row: &postgres::Row) -> Value {
            let mut record = Map::new();
            for (index, column) in row.columns().iter().enumerate() {
                record.insert(column.name().to_string(), column_value(row, index));
            }
            Value::Object(record)
        }

        fn db_rows(tool: &str, sql: &str, params: Vec<Value>) -> Result<Vec<Value>, ToolError> {
            let mut conn = pool(tool)?.get().map_err(|e| ToolError::backend(tool, e))?;
            let params: Vec<Param> = params.into_iter().map(Param).collect();
            let refs: Vec<&(dyn postgres::types::ToSql + Sync)> =
                params.iter().map(|p| p as &(dyn postgres::types::ToSql + Sync)).collect();
            let rows = conn.query(sql, &refs).map_err(|e| ToolError::backend(tool, e))?;
            Ok(rows.iter().map(row_to_json).collect())
        }

        /// Runs `statements` in one transaction, rolling back explicitly on
        /// the first failure.
        fn db_write(tool: &str, statements: Vec<(String, Vec<Value>)>) -> Result<u64, ToolError> {
            let mut conn = pool(tool)?.get().map_err(|e| ToolError::backend(tool, e))?;
            let mut tx = conn.transaction().map_err(|e| ToolError::backend(tool, e))?;
            let mut affected = 0u64;
            for (sql, params) in statements {
                let params: Vec<Param> = params.into_iter().map(Param).collect();
                let refs: Vec<&(dyn postgres::types::ToSql + Sync)> =
                    params.iter().map(|p| p as &(dyn postgres::types::ToSql + Sync)).collect();
                match tx.execute(sql.as_str(), &refs) {
                    Ok(n) => affected += n,
                    Err(e) => {
                        if let Err(rollback) = tx.rollback() {
                            tracing::warn!(tool, error = %rollback, "Rollback failed");
                        }
                        return Err(ToolError::backend(tool, e));
                    }
                }
            }
            tx.commit().map_err(|e| ToolError::backend(tool, e))?;
            Ok(affected)
        }
    }
}

fn mysql_sync(ctx: &Ctx<'_>) -> TokenStream {
    let (min, max) = pool_bounds(ctx);
    let url = database_url(ctx, None);
    let ssl = if ctx.config.ssl_enabled {
        quote!(.ssl_opts(mysql::SslOpts::default()))
    } else {
        TokenStream::new()
    };

    quote! {
        const POOL_MIN: usize = #min;
        const POOL_MAX: usize = #max;

        static POOL: Mutex<Option<mysql::Pool>> = Mutex::new(None);

        #url

        /// Shared pool, built on first use. Connections are pinged on checkout
        /// and replaced when dead; they return to the pool when dropped.
        fn pool(tool: &str) -> Result<mysql::Pool, ToolError> {
            let mut guard = POOL
                .lock()
                .map_err(|_| ToolError::backend(tool, "connection pool lock poisoned"))?;
            if let Some(pool) = guard.as_ref() {
                return Ok(pool.clone());
            }
            let opts = mysql::Opts::from_url(&database_url(tool)?).map_err(|e| ToolError::backend(tool, e))?;
            let constraints = mysql::PoolConstraints::new(POOL_MIN, POOL_MAX)
                .ok_or_else(|| ToolError::backend(tool, "pool_min must not exceed pool_max"))?;
            let builder = mysql::OptsBuilder::from_opts(opts)
                .pool_opts(
                    mysql::PoolOpts::default()
                        .with_constraints(constraints)
                        .with_check_health(true),
                )
                #ssl;
            tracing::info!(min = POOL_MIN, max = POOL_MAX, "Opening connection pool");
            let pool = mysql::Pool::new(builder).map_err(|e| ToolError::backend(tool, e))?;
            *guard = Some(pool.clone());
            Ok(pool)
        }

        fn sql_param(value: &Value) -> mysql::Value {
            match value {
                Value::Null => mysql::Value::NULL,
                Value::Bool(b) => mysql::Value::Int(i64::from(*b)),
                Value::Number(n) => n
                    .as_i64()
                    .map(mysql::Value::Int)
                    .or_else(|| n.as_u64().map(mysql::Value::UInt))
                    .unwrap_or_else(|| mysql::Value::Double(n.as_f64().unwrap_or_default())),
                Value::String(s) => mysql::Value::Bytes(s.clone().into_bytes()),
                other => mysql::Value::Bytes(other.to_string().into_bytes()),
            }
        }

        fn sql_value(value: Option<&mysql::Value>) -> Value {
            match value {
                None | Some(mysql::Value::NULL) => Value::Null,
                Some(mysql::Value::Int(i)) => json!(i),
                Some(mysql::Value::UInt(u)) => json!(u),
                Some(mysql::Value::Float(f)) => json!(f),
                Some(mysql::Value::Double(d)) => json!(d),
                Some(mysql::Value::Bytes(b)) => Value::String(String::from_utf8_lossy(b).into_owned()),
                Some(mysql::Value::Date(y, mo, d, 0, 0, 0, 0)) => {
                    Value::String(format!("{:04}-{:02}-{:02}", y, mo, d))
                }
                Some(mysql::Value::Date(y, mo, d, h, mi, s, us)) => Value::String(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
                    y, mo, d, h, mi, s, us
                )),
                Some(mysql::Value::Time(negative, days, h, mi, s, _)) => Value::String(format!(
                    "{}{:02}:{:02}:{:02}",
                    if *negative { "-" } else { "" },
                    u32::from(*h) + days * 24,
                    mi,
                    s
                )),
            }
        }

        fn row_to_json(row: &mysql::Row) -> Value {
            let mut record = Map::new();
            for (index, column) in row.columns_ref().iter().enumerate() {
                record.insert(column.name_str().into_owned(), sql_value(row.as_ref(index)));
            }
            Value::Object(record)
        }

        fn db_rows(tool: &str, sql: &str, params: Vec<Value>) -> Result<Vec<Value>, ToolError> {
            use mysql::prelude::Queryable;
            let mut conn = pool(tool)?.get_conn().map_err(|e| ToolError::backend(tool, e))?;
            let params = mysql::Params::Positional(params.iter().map(sql_param).collect());
            let rows: Vec<mysql::Row> = conn.exec(sql, params).map_err(|e| ToolError::backend(tool, e))?;
            Ok(rows.iter().map(row_to_json).collect())
        }

        /// Runs `statements` in one transaction, rolling back explicitly on
        /// the first failure.
        fn db_write(tool: &str, statements: Vec<(String, Vec<Value>)>) -> Result<u64, ToolError> {
            use mysql::prelude::Queryable;
            let mut conn = pool(tool)?.get_conn().map_err(|e| ToolError::backend(tool, e))?;
            let mut tx = conn
                .start_transaction(mysql::TxOpts::default())
                .map_err(|e| ToolError::backend(tool, e))?;
            let mut affected = 0u64;
            for (sql, params) in statements {
                let params = mysql::Params::Positional(params.iter().map(sql_param).collect());
                match tx.exec_drop(sql.as_str(), params) {
                    Ok(()) => affected += tx.affected_rows(),
                    Err(e) => {
                        if let Err(rollback) = tx.rollback() {
                            tracing::warn!(tool, error = %rollback, "Rollback failed");
                        }
                        return Err(ToolError::backend(tool, e));
                    }
                }
            }
            tx.commit().map_err(|e| ToolError::backend(tool, e))?;
            Ok(affected)
        }
    }
}
