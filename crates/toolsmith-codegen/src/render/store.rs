//! Record-store runtime for non-SQL backends.
//!
//! Backends only provide `fetch_records` plus, when writable, single-record
//! `store_insert`, `store_update` and `store_delete`. Filtering, sorting,
//! paging, search, aggregation and joins run in memory over fetched records.

use std::collections::BTreeMap;

use proc_macro2::TokenStream;
use quote::quote;
use serde_json::Value;
use toolsmith_core::{BackendFamily, RestProfile, SourceKind};

use super::Ctx;

pub fn runtime(ctx: &Ctx<'_>) -> TokenStream {
    let asyncness = ctx.asyncness();
    let dot_await = ctx.dot_await();
    let writes = if ctx.plan.kind.writable() {
        write_helpers(ctx)
    } else {
        TokenStream::new()
    };

    quote! {
        fn same_value(a: &Value, b: &Value) -> bool {
            a == b || cell_text(Some(a)) == cell_text(Some(b))
        }

        fn numeric(value: &Value) -> Option<f64> {
            value.as_f64().or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        }

        fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
            use std::cmp::Ordering;
            match (a, b) {
                (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
                (None | Some(Value::Null), _) => Ordering::Less,
                (_, None | Some(Value::Null)) => Ordering::Greater,
                (Some(x), Some(y)) => match (x.as_f64(), y.as_f64()) {
                    (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                    _ => cell_text(Some(x)).cmp(&cell_text(Some(y))),
                },
            }
        }

        fn project(record: Value, columns: &[&'static ColumnDef]) -> Value {
            let Value::Object(mut object) = record else {
                return record;
            };
            let mut out = Map::new();
            for column in columns {
                out.insert(column.name.to_string(), object.remove(column.name).unwrap_or(Value::Null));
            }
            Value::Object(out)
        }

        /// Objects in a response body: the body itself when it is an array,
        /// otherwise the first array found among its fields.
        fn records_in(body: Value) -> Vec<Value> {
            let items = match body {
                Value::Array(items) => items,
                Value::Object(object) => object
                    .into_iter()
                    .find_map(|(_, v)| match v {
                        Value::Array(items) => Some(items),
                        _ => None,
                    })
                    .unwrap_or_default(),
                _ => Vec::new(),
            };
            items.into_iter().filter(Value::is_object).collect()
        }

        /// Typed value for a textual cell according to the column kind.
        fn coerce_cell(kind: &str, text: &str) -> Value {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Value::Null;
            }
            match kind {
                "integer" => trimmed
                    .parse::<i64>()
                    .map(Value::from)
                    .unwrap_or_else(|_| Value::String(text.to_string())),
                "float" => trimmed
                    .parse::<f64>()
                    .map(|f| json!(f))
                    .unwrap_or_else(|_| Value::String(text.to_string())),
                "boolean" => match trimmed.to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" => Value::Bool(true),
                    "false" | "0" | "no" => Value::Bool(false),
                    _ => Value::String(text.to_string()),
                },
                "json" => serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(text.to_string())),
                _ => Value::String(text.to_string()),
            }
        }

        fn column_kind(table: &TableDef, name: &str) -> &'static str {
            table.column(name).map(|c| c.kind).unwrap_or("string")
        }

        #asyncness fn table_list(tool: &str, table: &TableDef, query: ListQuery) -> ToolResult {
            let limit = clamp_limit(query.limit);
            let offset = clamp_offset(query.offset);
            let sort = resolve_sort(table, query.sort_field.as_deref(), query.sort_direction.as_deref())?;
            let projected = query.fields.as_deref().map(|fields| resolve_fields(table, Some(fields)));

            let mut records = fetch_records(tool, table)#dot_await?;
            for range in &query.ranges {
                records.retain(|record| {
                    let text = cell_text(record.get(range.column));
                    if text.is_empty() {
                        return range.from.is_none() && range.to.is_none();
                    }
                    range.from.as_ref().map_or(true, |from| text.as_str() >= from.as_str())
                        && range.to.as_ref().map_or(true, |to| text.as_str() <= to.as_str())
                });
            }
            if let Some((column, descending)) = sort {
                records.sort_by(|a, b| {
                    let ordering = compare_values(a.get(column.name), b.get(column.name));
                    if descending { ordering.reverse() } else { ordering }
                });
            }

            let total = records.len() as i64;
            let page: Vec<Value> = page_window(records, limit, offset)
                .into_iter()
                .map(|record| match &projected {
                    Some(columns) => project(record, columns),
                    None => record,
                })
                .collect();
            Ok(page_envelope(page, total, offset))
        }

        #asyncness fn table_get(tool: &str, table: &TableDef, key: Value) -> ToolResult {
            let pk = key_column(table)?;
            let records = fetch_records(tool, table)#dot_await?;
            Ok(records
                .into_iter()
                .find(|record| record.get(pk.name).is_some_and(|v| same_value(v, &key)))
                .unwrap_or(Value::Null))
        }

        #asyncness fn table_search(tool: &str, table: &TableDef, query: String, limit: Option<i64>) -> ToolResult {
            let limit = clamp_limit(limit) as usize;
            let needle = query.to_lowercase();
            let searchable = table.searchable();
            let records = fetch_records(tool, table)#dot_await?;
            let results: Vec<Value> = records
                .into_iter()
                .filter(|record| {
                    searchable
                        .iter()
                        .any(|c| cell_text(record.get(c.name)).to_lowercase().contains(&needle))
                })
                .take(limit)
                .collect();
            let count = results.len();
            Ok(json!({"results": results, "count": count}))
        }

        #asyncness fn table_count(tool: &str, table: &TableDef) -> ToolResult {
            let records = fetch_records(tool, table)#dot_await?;
            Ok(json!({"table": table.name, "count": records.len()}))
        }

        #asyncness fn table_aggregate(
            tool: &str,
            table: &TableDef,
            group_by: String,
            agg_function: String,
            agg_field: Option<String>,
        ) -> ToolResult {
            let (group, function, field) = checked_aggregate(table, &group_by, &agg_function, agg_field.as_deref())?;
            let records = fetch_records(tool, table)#dot_await?;

            let mut groups: BTreeMap<String, (Value, Vec<f64>, i64)> = BTreeMap::new();
            for record in &records {
                let key = record.get(group.name).cloned().unwrap_or(Value::Null);
                let entry = groups
                    .entry(cell_text(Some(&key)))
                    .or_insert_with(|| (key, Vec::new(), 0));
                entry.2 += 1;
                if let Some(n) = field.and_then(|f| record.get(f.name)).and_then(numeric) {
                    entry.1.push(n);
                }
            }

            let rows: Vec<Value> = groups
                .into_values()
                .take(MAX_LIMIT as usize)
                .map(|(key, numbers, count)| {
                    let value = match function.as_str() {
                        "count" => json!(count),
                        "sum" => json!(numbers.iter().sum::<f64>()),
                        "avg" if numbers.is_empty() => Value::Null,
                        "avg" => json!(numbers.iter().sum::<f64>() / numbers.len() as f64),
                        "min" => numbers.iter().copied().reduce(f64::min).map_or(Value::Null, |v| json!(v)),
                        _ => numbers.iter().copied().reduce(f64::max).map_or(Value::Null, |v| json!(v)),
                    };
                    json!({"group_key": key, "value": value})
                })
                .collect();
            Ok(json!({
                "group_by": group.name,
                "agg_function": function,
                "agg_field": field.map(|f| f.name),
                "groups": rows,
            }))
        }

        /// Up to `limit` records, in backend order.
        #asyncness fn table_rows(tool: &str, table: &TableDef, limit: Option<i64>) -> Result<Vec<Value>, ToolError> {
            let records = fetch_records(tool, table)#dot_await?;
            Ok(records.into_iter().take(clamp_limit(limit) as usize).collect())
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
            let left = fetch_records(tool, from)#dot_await?;
            let right = fetch_records(tool, to)#dot_await?;

            let mut index: HashMap<String, Vec<&Value>> = HashMap::new();
            for record in &right {
                if let Some(value) = record.get(to_column).filter(|v| !v.is_null()) {
                    index.entry(cell_text(Some(value))).or_default().push(record);
                }
            }

            let mut joined = Vec::new();
            for record in &left {
                let Some(value) = record.get(from_column).filter(|v| !v.is_null()) else {
                    continue;
                };
                for other in index.get(&cell_text(Some(value))).into_iter().flatten() {
                    let mut row = Map::new();
                    for (side, source) in [(from.name, record), (to.name, *other)] {
                        if let Some(object) = source.as_object() {
                            for (name, value) in object {
                                row.insert(format!("{}.{}", side, name), value.clone());
                            }
                        }
                    }
                    joined.push(Value::Object(row));
                }
            }

            let total = joined.len() as i64;
            let page = page_window(joined, limit, offset);
            Ok(page_envelope(page, total, offset))
        }

        #writes
    }
}

fn write_helpers(ctx: &Ctx<'_>) -> TokenStream {
    let asyncness = ctx.asyncness();
    let dot_await = ctx.dot_await();

    quote! {
        fn checked_record(table: &TableDef, values: Vec<(&str, Value)>) -> Result<Map<String, Value>, ToolError> {
            let mut record = Map::new();
            for (name, value) in values {
                if !table.columns.is_empty() && table.column(name).is_none() {
                    return Err(ToolError::InvalidArgument(format!("unknown column {} for {}", name, table.name)));
                }
                record.insert(name.to_string(), value);
            }
            Ok(record)
        }

        #asyncness fn table_insert(tool: &str, table: &TableDef, values: Vec<(&str, Value)>) -> ToolResult {
            let record = checked_record(table, values)?;
            let created = store_insert(tool, table, record)#dot_await?;
            Ok(json!({"affected": 1, "record": created}))
        }

        /// Inserts one record at a time; the store has no transactions, so a
        /// failure reports how many records were already written.
        #asyncness fn table_batch_insert(tool: &str, table: &TableDef, records: Vec<Value>) -> ToolResult {
            check_batch(records.len(), "records")?;
            let mut checked = Vec::with_capacity(records.len());
            for record in &records {
                checked.push(checked_record(table, record_pairs(record)?)?);
            }
            let total = checked.len();
            let mut created = Vec::with_capacity(total);
            for record in checked {
                match store_insert(tool, table, record)#dot_await {
                    Ok(value) => created.push(value),
                    Err(e) => {
                        return Err(ToolError::backend(
                            tool,
                            format!("{} ({} of {} records written)", e, created.len(), total),
                        ));
                    }
                }
            }
            Ok(json!({"affected": created.len(), "count": total, "records": created}))
        }

        #asyncness fn table_update(tool: &str, table: &TableDef, key: Value, changes: Vec<(&str, Value)>) -> ToolResult {
            let pk = key_column(table)?;
            let changes: Vec<(&str, Value)> = changes.into_iter().filter(|(name, _)| *name != pk.name).collect();
            if changes.is_empty() {
                return Err(ToolError::InvalidArgument(format!(
                    "nothing to update; pass at least one column besides {}",
                    pk.name
                )));
            }
            let changes = checked_record(table, changes)?;
            let affected = store_update(tool, table, &key, changes)#dot_await?;
            Ok(json!({"affected": affected, "key": key}))
        }

        #asyncness fn table_delete(tool: &str, table: &TableDef, key: Value) -> ToolResult {
            key_column(table)?;
            let affected = store_delete(tool, table, &key)#dot_await?;
            Ok(json!({"affected": affected, "key": key}))
        }

        #asyncness fn table_batch_delete(tool: &str, table: &TableDef, ids: Vec<Value>) -> ToolResult {
            check_batch(ids.len(), "ids")?;
            key_column(table)?;
            let mut affected = 0u64;
            for (done, key) in ids.iter().enumerate() {
                match store_delete(tool, table, key)#dot_await {
                    Ok(n) => affected += n,
                    Err(e) => {
                        return Err(ToolError::backend(
                            tool,
                            format!("{} ({} of {} ids processed)", e, done, ids.len()),
                        ));
                    }
                }
            }
            Ok(json!({"affected": affected, "requested": ids.len()}))
        }
    }
}

/// Backend primitives for the context's family.
pub fn infrastructure(ctx: &Ctx<'_>) -> TokenStream {
    let names = remote_names(ctx);
    let body = match ctx.family() {
        BackendFamily::HostedRest(profile) => rest(ctx, profile),
        BackendFamily::Document => document(ctx),
        BackendFamily::KeyValue => key_value(ctx),
        _ if ctx.plan.kind == SourceKind::Excel => excel(ctx),
        _ => files(ctx),
    };
    quote! {
        #names
        #body
    }
}

/// Name, path or id the backend knows each table by, when it differs from
/// the schema name.
fn remote_names(ctx: &Ctx<'_>) -> TokenStream {
    let kind = ctx.plan.kind;
    let map_key = match kind {
        SourceKind::Airtable => Some("table_name_map"),
        SourceKind::Notion => Some("database_map"),
        SourceKind::Gsheet | SourceKind::Excel => Some("sheet_name_map"),
        SourceKind::Files => Some("file_map"),
        _ => None,
    };
    let mapped: BTreeMap<String, String> = map_key
        .and_then(|key| ctx.schema.metadata.get(key))
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let mut arms = Vec::new();
    for plan in &ctx.plan.tables {
        let table = &plan.table;
        let remote = mapped.get(&table.name).cloned().or_else(|| match kind {
            SourceKind::Airtable | SourceKind::Gsheet | SourceKind::Excel => table.description.clone(),
            SourceKind::Openapi => table
                .column("_path")
                .and_then(|c| c.description.clone())
                .filter(|path| path.starts_with('/')),
            _ => None,
        });
        if let Some(remote) = remote.filter(|r| *r != table.name) {
            let name = table.name.as_str();
            arms.push(quote!(#name => #remote,));
        }
    }

    quote! {
        fn remote_name(table: &TableDef) -> &'static str {
            match table.name {
                #(#arms)*
                _ => table.name,
            }
        }
    }
}

/// Shared HTTP client, also used by the webhook dispatcher.
pub fn http_client(ctx: &Ctx<'_>) -> TokenStream {
    let client = if ctx.is_async() {
        quote!(reqwest::Client)
    } else {
        quote!(reqwest::blocking::Client)
    };
    quote! {
        fn http_client() -> &'static #client {
            static CLIENT: OnceLock<#client> = OnceLock::new();
            CLIENT.get_or_init(|| {
                #client::builder()
                    .timeout(Duration::from_secs(30))
                    .build()
                    .unwrap_or_else(|_| #client::new())
            })
        }
    }
}

fn rest(ctx: &Ctx<'_>, profile: RestProfile) -> TokenStream {
    let asyncness = ctx.asyncness();
    let dot_await = ctx.dot_await();
    let client = http_client(ctx);
    let kind = ctx.plan.kind;

    let token_env = match profile {
        RestProfile::Supabase => "SUPABASE_KEY",
        _ => kind.connection_env(),
    };
    let token = if profile == RestProfile::Openapi {
        quote! {
            fn api_token(_tool: &str) -> Result<Option<String>, ToolError> {
                Ok(std::env::var(#token_env).ok().filter(|t| !t.is_empty()))
            }
        }
    } else {
        let missing = format!("{} is not set", token_env);
        quote! {
            fn api_token(tool: &str) -> Result<Option<String>, ToolError> {
                std::env::var(#token_env)
                    .map(Some)
                    .map_err(|_| ToolError::backend(tool, #missing))
            }
        }
    };
    let headers = match profile {
        RestProfile::Supabase => quote! {
            if let Some(token) = &token {
                request = request.header("apikey", token.as_str());
            }
            request = request.header("Prefer", "return=representation");
        },
        RestProfile::Notion => quote! {
            request = request.header("Notion-Version", "2022-06-28");
        },
        _ => TokenStream::new(),
    };

    let profile_items = match profile {
        RestProfile::Supabase => supabase(ctx),
        RestProfile::Airtable => airtable(ctx),
        RestProfile::Gsheet => gsheet(ctx),
        RestProfile::Notion => notion(ctx),
        RestProfile::Hubspot => hubspot(ctx),
        RestProfile::Openapi => openapi(ctx),
    };

    quote! {
        #client
        #token

        fn encode_segment(segment: &str) -> String {
            let mut out = String::with_capacity(segment.len());
            for byte in segment.bytes() {
                if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
                    out.push(byte as char);
                } else {
                    out.push_str(&format!("%{:02X}", byte));
                }
            }
            out
        }

        /// Sends one request and decodes the JSON body. Non-2xx responses are
        /// errors carrying the status and body.
        #asyncness fn http_json(tool: &str, method: reqwest::Method, url: &str, body: Option<Value>) -> Result<Value, ToolError> {
            let token = api_token(tool)?;
            let mut request = http_client().request(method, url);
            if let Some(token) = &token {
                request = request.bearer_auth(token);
            }
            #headers
            if let Some(body) = body {
                request = request.json(&body);
            }
            let response = request.send()#dot_await.map_err(|e| ToolError::backend(tool, e))?;
            let status = response.status();
            let text = response.text()#dot_await.map_err(|e| ToolError::backend(tool, e))?;
            if !status.is_success() {
                return Err(ToolError::backend(tool, format!("HTTP {}: {}", status, text)));
            }
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&text).map_err(|e| ToolError::backend(tool, e))
        }

        /// Upper bound on pages fetched per call.
        const MAX_PAGES: usize = 100;

        fn key_segment(key: &Value) -> String {
            encode_segment(&cell_text(Some(key)))
        }

        /// Moves `item[nested]` fields to the top level next to `id`.
        fn flatten_record(item: Value, nested: &str) -> Value {
            let Value::Object(mut object) = item else {
                return item;
            };
            let mut record = match object.remove(nested) {
                Some(Value::Object(fields)) => fields,
                _ => Map::new(),
            };
            if let Some(id) = object.remove("id") {
                record.entry("id".to_string()).or_insert(id);
            }
            Value::Object(record)
        }

        #profile_items
    }
}

fn supabase(ctx: &Ctx<'_>) -> TokenStream {
    let asyncness = ctx.asyncness();
    let dot_await = ctx.dot_await();
    let url_env = ctx.plan.kind.connection_env();
    let missing = format!("{} is not set", url_env);
    quote! {
        fn collection_url(tool: &str, table: &TableDef) -> Result<String, ToolError> {
            let base = std::env::var(#url_env).map_err(|_| ToolError::backend(tool, #missing))?;
            Ok(format!("{}/rest/v1/{}", base.trim_end_matches('/'), encode_segment(remote_name(table))))
        }

        fn key_filter(tool: &str, table: &TableDef, key: &Value) -> Result<String, ToolError> {
            let pk = key_column(table)?;
            Ok(format!(
                "{}?{}=eq.{}",
                collection_url(tool, table)?,
                encode_segment(pk.name),
                key_segment(key)
            ))
        }

        #asyncness fn fetch_records(tool: &str, table: &TableDef) -> Result<Vec<Value>, ToolError> {
            let url = format!("{}?select=*", collection_url(tool, table)?);
            let body = http_json(tool, reqwest::Method::GET, &url, None)#dot_await?;
            Ok(records_in(body))
        }

        #asyncness fn store_insert(tool: &str, table: &TableDef, record: Map<String, Value>) -> Result<Value, ToolError> {
            let url = collection_url(tool, table)?;
            let body = http_json(tool, reqwest::Method::POST, &url, Some(Value::Object(record)))#dot_await?;
            Ok(records_in(body).into_iter().next().unwrap_or(Value::Null))
        }

        #asyncness fn store_update(tool: &str, table: &TableDef, key: &Value, changes: Map<String, Value>) -> Result<u64, ToolError> {
            let url = key_filter(tool, table, key)?;
            let body = http_json(tool, reqwest::Method::PATCH, &url, Some(Value::Object(changes)))#dot_await?;
            Ok(records_in(body).len() as u64)
        }

        #asyncness fn store_delete(tool: &str, table: &TableDef, key: &Value) -> Result<u64, ToolError> {
            let url = key_filter(tool, table, key)?;
            let body = http_json(tool, reqwest::Method::DELETE, &url, None)#dot_await?;
            Ok(records_in(body).len() as u64)
        }
    }
}

fn airtable(ctx: &Ctx<'_>) -> TokenStream {
    let asyncness = ctx.asyncness();
    let dot_await = ctx.dot_await();
    let base_id = ctx.meta_str("base_id", "");
    quote! {
        const BASE_ID: &str = #base_id;

        fn collection_url(table: &TableDef) -> String {
            format!("https://api.airtable.com/v0/{}/{}", BASE_ID, encode_segment(remote_name(table)))
        }

        #asyncness fn fetch_records(tool: &str, table: &TableDef) -> Result<Vec<Value>, ToolError> {
            let base = collection_url(table);
            let mut records = Vec::new();
            let mut offset: Option<String> = None;
            for _ in 0..MAX_PAGES {
                let url = match &offset {
                    Some(offset) => format!("{}?pageSize=100&offset={}", base, encode_segment(offset)),
                    None => format!("{}?pageSize=100", base),
                };
                let body = http_json(tool, reqwest::Method::GET, &url, None)#dot_await?;
                let items = body.get("records").and_then(Value::as_array).cloned().unwrap_or_default();
                records.extend(items.into_iter().map(|item| flatten_record(item, "fields")));
                offset = body.get("offset").and_then(Value::as_str).map(str::to_string);
                if offset.is_none() {
                    break;
                }
            }
            Ok(records)
        }

        #asyncness fn store_insert(tool: &str, table: &TableDef, record: Map<String, Value>) -> Result<Value, ToolError> {
            let body = json!({"fields": record, "typecast": true});
            let created = http_json(tool, reqwest::Method::POST, &collection_url(table), Some(body))#dot_await?;
            Ok(flatten_record(created, "fields"))
        }

        #asyncness fn store_update(tool: &str, table: &TableDef, key: &Value, changes: Map<String, Value>) -> Result<u64, ToolError> {
            let url = format!("{}/{}", collection_url(table), key_segment(key));
            let body = json!({"fields": changes, "typecast": true});
            http_json(tool, reqwest::Method::PATCH, &url, Some(body))#dot_await?;
            Ok(1)
        }

        #asyncness fn store_delete(tool: &str, table: &TableDef, key: &Value) -> Result<u64, ToolError> {
            let url = format!("{}/{}", collection_url(table), key_segment(key));
            http_json(tool, reqwest::Method::DELETE, &url, None)#dot_await?;
            Ok(1)
        }
    }
}

fn gsheet(ctx: &Ctx<'_>) -> TokenStream {
    let asyncness = ctx.asyncness();
    let dot_await = ctx.dot_await();
    let spreadsheet_id = ctx.meta_str("spreadsheet_id", "");
    quote! {
        const SPREADSHEET_ID: &str = #spreadsheet_id;

        /// Sheet rows as records keyed by the header row.
        #asyncness fn fetch_records(tool: &str, table: &TableDef) -> Result<Vec<Value>, ToolError> {
            let url = format!(
                "https://sheets.googleapis.com/v4/spreadsheets/{}/values/{}",
                SPREADSHEET_ID,
                encode_segment(remote_name(table))
            );
            let body = http_json(tool, reqwest::Method::GET, &url, None)#dot_await?;
            let rows = body.get("values").and_then(Value::as_array).cloned().unwrap_or_default();
            let mut rows = rows.into_iter();
            let Some(header) = rows.next() else {
                return Ok(Vec::new());
            };
            let header: Vec<String> = header
                .as_array()
                .map(|cells| cells.iter().map(|c| cell_text(Some(c))).collect())
                .unwrap_or_default();
            Ok(rows
                .map(|row| {
                    let cells = row.as_array().cloned().unwrap_or_default();
                    let mut record = Map::new();
                    for (index, name) in header.iter().enumerate() {
                        let text = cells.get(index).map(|c| cell_text(Some(c))).unwrap_or_default();
                        record.insert(name.clone(), coerce_cell(column_kind(table, name), &text));
                    }
                    Value::Object(record)
                })
                .collect())
        }
    }
}

fn notion(ctx: &Ctx<'_>) -> TokenStream {
    let asyncness = ctx.asyncness();
    let dot_await = ctx.dot_await();
    let title_property = ctx.meta_str("title_property", "Name");
    quote! {
        const TITLE_PROPERTY: &str = #title_property;

        fn notion_value(property: &Value) -> Value {
            let kind = property.get("type").and_then(Value::as_str).unwrap_or_default();
            let inner = property.get(kind).cloned().unwrap_or(Value::Null);
            match kind {
                "title" | "rich_text" => Value::String(
                    inner
                        .as_array()
                        .map(|parts| {
                            parts
                                .iter()
                                .filter_map(|p| p.get("plain_text").and_then(Value::as_str))
                                .collect::<String>()
                        })
                        .unwrap_or_default(),
                ),
                "select" | "status" => inner.get("name").cloned().unwrap_or(Value::Null),
                "multi_select" => Value::Array(
                    inner
                        .as_array()
                        .map(|options| options.iter().filter_map(|o| o.get("name").cloned()).collect())
                        .unwrap_or_default(),
                ),
                "date" => inner.get("start").cloned().unwrap_or(Value::Null),
                "formula" => {
                    let formula_kind = inner.get("type").and_then(Value::as_str).unwrap_or_default();
                    inner.get(formula_kind).cloned().unwrap_or(Value::Null)
                }
                _ => inner,
            }
        }

        fn notion_record(page: Value) -> Value {
            let mut record = Map::new();
            if let Some(id) = page.get("id") {
                record.insert("id".to_string(), id.clone());
            }
            if let Some(properties) = page.get("properties").and_then(Value::as_object) {
                for (name, property) in properties {
                    record.insert(name.clone(), notion_value(property));
                }
            }
            Value::Object(record)
        }

        /// Column values as Notion property objects.
        fn notion_properties(table: &TableDef, record: Map<String, Value>) -> Value {
            let mut properties = Map::new();
            for (name, value) in record {
                if name == "id" {
                    continue;
                }
                let property = match column_kind(table, &name) {
                    "integer" | "float" => json!({"number": value}),
                    "boolean" => json!({"checkbox": value}),
                    "date" | "datetime" => json!({"date": {"start": value}}),
                    "json" => value,
                    _ => {
                        let text = json!([{"text": {"content": cell_text(Some(&value))}}]);
                        if name == TITLE_PROPERTY {
                            json!({"title": text})
                        } else {
                            json!({"rich_text": text})
                        }
                    }
                };
                properties.insert(name, property);
            }
            Value::Object(properties)
        }

        #asyncness fn fetch_records(tool: &str, table: &TableDef) -> Result<Vec<Value>, ToolError> {
            let url = format!("https://api.notion.com/v1/databases/{}/query", encode_segment(remote_name(table)));
            let mut records = Vec::new();
            let mut cursor: Option<String> = None;
            for _ in 0..MAX_PAGES {
                let body = match &cursor {
                    Some(cursor) => json!({"page_size": 100, "start_cursor": cursor}),
                    None => json!({"page_size": 100}),
                };
                let page = http_json(tool, reqwest::Method::POST, &url, Some(body))#dot_await?;
                let results = page.get("results").and_then(Value::as_array).cloned().unwrap_or_default();
                records.extend(results.into_iter().map(notion_record));
                cursor = page
                    .get("next_cursor")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .filter(|_| page.get("has_more").and_then(Value::as_bool).unwrap_or(false));
                if cursor.is_none() {
                    break;
                }
            }
            Ok(records)
        }

        #asyncness fn store_insert(tool: &str, table: &TableDef, record: Map<String, Value>) -> Result<Value, ToolError> {
            let body = json!({
                "parent": {"database_id": remote_name(table)},
                "properties": notion_properties(table, record),
            });
            let page = http_json(tool, reqwest::Method::POST, "https://api.notion.com/v1/pages", Some(body))#dot_await?;
            Ok(notion_record(page))
        }

        #asyncness fn store_update(tool: &str, table: &TableDef, key: &Value, changes: Map<String, Value>) -> Result<u64, ToolError> {
            let url = format!("https://api.notion.com/v1/pages/{}", key_segment(key));
            let body = json!({"properties": notion_properties(table, changes)});
            http_json(tool, reqwest::Method::PATCH, &url, Some(body))#dot_await?;
            Ok(1)
        }

        /// Notion pages are archived rather than deleted.
        #asyncness fn store_delete(tool: &str, table: &TableDef, key: &Value) -> Result<u64, ToolError> {
            let url = format!("https://api.notion.com/v1/pages/{}", key_segment(key));
            http_json(tool, reqwest::Method::PATCH, &url, Some(json!({"archived": true})))#dot_await?;
            Ok(1)
        }
    }
}

fn hubspot(ctx: &Ctx<'_>) -> TokenStream {
    let asyncness = ctx.asyncness();
    let dot_await = ctx.dot_await();
    quote! {
        fn collection_url(table: &TableDef) -> String {
            format!("https://api.hubapi.com/crm/v3/objects/{}", encode_segment(remote_name(table)))
        }

        #asyncness fn fetch_records(tool: &str, table: &TableDef) -> Result<Vec<Value>, ToolError> {
            let properties: Vec<String> = table
                .columns
                .iter()
                .filter(|c| c.name != "id")
                .map(|c| encode_segment(c.name))
                .collect();
            let base = format!("{}?limit=100&properties={}", collection_url(table), properties.join(","));
            let mut records = Vec::new();
            let mut after: Option<String> = None;
            for _ in 0..MAX_PAGES {
                let url = match &after {
                    Some(after) => format!("{}&after={}", base, encode_segment(after)),
                    None => base.clone(),
                };
                let page = http_json(tool, reqwest::Method::GET, &url, None)#dot_await?;
                let results = page.get("results").and_then(Value::as_array).cloned().unwrap_or_default();
                records.extend(results.into_iter().map(|item| flatten_record(item, "properties")));
                after = page
                    .pointer("/paging/next/after")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if after.is_none() {
                    break;
                }
            }
            Ok(records)
        }

        #asyncness fn store_insert(tool: &str, table: &TableDef, record: Map<String, Value>) -> Result<Value, ToolError> {
            let body = json!({"properties": record});
            let created = http_json(tool, reqwest::Method::POST, &collection_url(table), Some(body))#dot_await?;
            Ok(flatten_record(created, "properties"))
        }

        #asyncness fn store_update(tool: &str, table: &TableDef, key: &Value, changes: Map<String, Value>) -> Result<u64, ToolError> {
            let url = format!("{}/{}", collection_url(table), key_segment(key));
            http_json(tool, reqwest::Method::PATCH, &url, Some(json!({"properties": changes})))#dot_await?;
            Ok(1)
        }

        #asyncness fn store_delete(tool: &str, table: &TableDef, key: &Value) -> Result<u64, ToolError> {
            let url = format!("{}/{}", collection_url(table), key_segment(key));
            http_json(tool, reqwest::Method::DELETE, &url, None)#dot_await?;
            Ok(1)
        }
    }
}

fn openapi(ctx: &Ctx<'_>) -> TokenStream {
    let asyncness = ctx.asyncness();
    let dot_await = ctx.dot_await();
    let base_url = ctx.meta_str("base_url", "");
    let base_url = base_url.trim_end_matches('/');
    quote! {
        const BASE_URL: &str = #base_url;

        /// Endpoint URL; the remote name is the operation's path.
        fn collection_url(table: &TableDef) -> String {
            let remote = remote_name(table);
            if remote.starts_with('/') {
                format!("{}{}", BASE_URL, remote)
            } else {
                format!("{}/{}", BASE_URL, encode_segment(remote))
            }
        }

        #asyncness fn fetch_records(tool: &str, table: &TableDef) -> Result<Vec<Value>, ToolError> {
            let body = http_json(tool, reqwest::Method::GET, &collection_url(table), None)#dot_await?;
            Ok(match body {
                Value::Object(_) if records_in(body.clone()).is_empty() => vec![body],
                other => records_in(other),
            })
        }

        #asyncness fn store_insert(tool: &str, table: &TableDef, record: Map<String, Value>) -> Result<Value, ToolError> {
            let sent = Value::Object(record);
            let created = http_json(tool, reqwest::Method::POST, &collection_url(table), Some(sent.clone()))#dot_await?;
            Ok(if created.is_null() { sent } else { created })
        }

        #asyncness fn store_update(tool: &str, table: &TableDef, key: &Value, changes: Map<String, Value>) -> Result<u64, ToolError> {
            let url = format!("{}/{}", collection_url(table), key_segment(key));
            http_json(tool, reqwest::Method::PATCH, &url, Some(Value::Object(changes)))#dot_await?;
            Ok(1)
        }

        #asyncness fn store_delete(tool: &str, table: &TableDef, key: &Value) -> Result<u64, ToolError> {
            let url = format!("{}/{}", collection_url(table), key_segment(key));
            http_json(tool, reqwest::Method::DELETE, &url, None)#dot_await?;
            Ok(1)
        }
    }
}

fn document(ctx: &Ctx<'_>) -> TokenStream {
    let env = ctx.plan.kind.connection_env();
    let missing = format!("{} is not set", env);
    let database = ctx.meta_str("database", "test");

    let (client, fetch, run) = if ctx.is_async() {
        (
            quote! {
                static CLIENT: tokio::sync::OnceCell<mongodb::Client> = tokio::sync::OnceCell::const_new();

                /// Client built on first use; the driver pools and monitors connections.
                async fn collection(tool: &str, table: &TableDef) -> Result<mongodb::Collection<mongodb::bson::Document>, ToolError> {
                    let client = CLIENT
                        .get_or_try_init(|| async {
                            let uri = std::env::var(#env).map_err(|_| ToolError::backend(tool, #missing))?;
                            mongodb::Client::with_uri_str(&uri)
                                .await
                                .map_err(|e| ToolError::backend(tool, e))
                        })
                        .await?;
                    Ok(client.database(&database_name()).collection(remote_name(table)))
                }
            },
            quote! {
                async fn fetch_records(tool: &str, table: &TableDef) -> Result<Vec<Value>, ToolError> {
                    use futures::TryStreamExt;
                    let documents: Vec<mongodb::bson::Document> = collection(tool, table)
                        .await?
                        .find(mongodb::bson::Document::new())
                        .await
                        .map_err(|e| ToolError::backend(tool, e))?
                        .try_collect()
                        .await
                        .map_err(|e| ToolError::backend(tool, e))?;
                    Ok(documents.into_iter().map(document_json).collect())
                }
            },
            quote!(.await),
        )
    } else {
        (
            quote! {
                static CLIENT: Mutex<Option<mongodb::sync::Client>> = Mutex::new(None);

                /// Client built on first use; the driver pools and monitors connections.
                fn collection(tool: &str, table: &TableDef) -> Result<mongodb::sync::Collection<mongodb::bson::Document>, ToolError> {
                    let mut guard = CLIENT
                        .lock()
                        .map_err(|_| ToolError::backend(tool, "client lock poisoned"))?;
                    let client = match guard.as_ref() {
                        Some(client) => client.clone(),
                        None => {
                            let uri = std::env::var(#env).map_err(|_| ToolError::backend(tool, #missing))?;
                            let client = mongodb::sync::Client::with_uri_str(&uri)
                                .map_err(|e| ToolError::backend(tool, e))?;
                            *guard = Some(client.clone());
                            client
                        }
                    };
                    Ok(client.database(&database_name()).collection(remote_name(table)))
                }
            },
            quote! {
                fn fetch_records(tool: &str, table: &TableDef) -> Result<Vec<Value>, ToolError> {
                    let cursor = collection(tool, table)?
                        .find(mongodb::bson::Document::new())
                        .run()
                        .map_err(|e| ToolError::backend(tool, e))?;
                    let mut records = Vec::new();
                    for document in cursor {
                        records.push(document_json(document.map_err(|e| ToolError::backend(tool, e))?));
                    }
                    Ok(records)
                }
            },
            quote!(.run()),
        )
    };
    let asyncness = ctx.asyncness();
    let dot_await = ctx.dot_await();

    quote! {
        const DEFAULT_DATABASE: &str = #database;

        fn database_name() -> String {
            std::env::var("MONGODB_DATABASE").unwrap_or_else(|_| DEFAULT_DATABASE.to_string())
        }

        #client

        /// Relaxed extended JSON with object ids flattened to hex strings.
        fn document_json(document: mongodb::bson::Document) -> Value {
            let mut value = mongodb::bson::Bson::Document(document).into_relaxed_extjson();
            if let Some(object) = value.as_object_mut() {
                for field in object.values_mut() {
                    if let Some(oid) = field.get("$oid").and_then(Value::as_str).map(str::to_string) {
                        *field = Value::String(oid);
                    }
                }
            }
            value
        }

        fn key_filter(tool: &str, table: &TableDef, key: &Value) -> Result<mongodb::bson::Document, ToolError> {
            let pk = key_column(table)?;
            let oid = key
                .as_str()
                .filter(|_| pk.name == "_id")
                .and_then(|s| mongodb::bson::oid::ObjectId::parse_str(s).ok());
            let value = match oid {
                Some(oid) => mongodb::bson::Bson::ObjectId(oid),
                None => mongodb::bson::to_bson(key).map_err(|e| ToolError::backend(tool, e))?,
            };
            let mut filter = mongodb::bson::Document::new();
            filter.insert(pk.name, value);
            Ok(filter)
        }

        fn to_document(tool: &str, record: Map<String, Value>) -> Result<mongodb::bson::Document, ToolError> {
            mongodb::bson::to_document(&Value::Object(record)).map_err(|e| ToolError::backend(tool, e))
        }

        #fetch

        #asyncness fn store_insert(tool: &str, table: &TableDef, record: Map<String, Value>) -> Result<Value, ToolError> {
            let mut created = record.clone();
            let result = collection(tool, table)#dot_await?
                .insert_one(to_document(tool, record)?)
                #run
                .map_err(|e| ToolError::backend(tool, e))?;
            created.insert(
                "_id".to_string(),
                document_json(mongodb::bson::doc! { "_id": result.inserted_id })
                    .get("_id")
                    .cloned()
                    .unwrap_or(Value::Null),
            );
            Ok(Value::Object(created))
        }

        #asyncness fn store_update(tool: &str, table: &TableDef, key: &Value, changes: Map<String, Value>) -> Result<u64, ToolError> {
            let filter = key_filter(tool, table, key)?;
            let update = mongodb::bson::doc! { "$set": to_document(tool, changes)? };
            let result = collection(tool, table)#dot_await?
                .update_one(filter, update)
                #run
                .map_err(|e| ToolError::backend(tool, e))?;
            Ok(result.matched_count)
        }

        #asyncness fn store_delete(tool: &str, table: &TableDef, key: &Value) -> Result<u64, ToolError> {
            let filter = key_filter(tool, table, key)?;
            let result = collection(tool, table)#dot_await?
                .delete_one(filter)
                #run
                .map_err(|e| ToolError::backend(tool, e))?;
            Ok(result.deleted_count)
        }
    }
}

fn key_value(ctx: &Ctx<'_>) -> TokenStream {
    let asyncness = ctx.asyncness();
    let dot_await = ctx.dot_await();
    let env = ctx.plan.kind.connection_env();
    let missing = format!("{} is not set", env);
    let (connect, query) = if ctx.is_async() {
        (
            quote! {
                async fn connect(tool: &str) -> Result<redis::aio::MultiplexedConnection, ToolError> {
                    let url = std::env::var(#env).map_err(|_| ToolError::backend(tool, #missing))?;
                    let client = redis::Client::open(url.as_str()).map_err(|e| ToolError::backend(tool, e))?;
                    client
                        .get_multiplexed_async_connection()
                        .await
                        .map_err(|e| ToolError::backend(tool, e))
                }
            },
            quote!(.query_async(&mut conn).await),
        )
    } else {
        (
            quote! {
                fn connect(tool: &str) -> Result<redis::Connection, ToolError> {
                    let url = std::env::var(#env).map_err(|_| ToolError::backend(tool, #missing))?;
                    let client = redis::Client::open(url.as_str()).map_err(|e| ToolError::backend(tool, e))?;
                    client.get_connection().map_err(|e| ToolError::backend(tool, e))
                }
            },
            quote!(.query(&mut conn)),
        )
    };

    quote! {
        #connect

        /// Full key for a record; bare ids get the table prefix.
        fn record_key(table: &TableDef, key: &Value) -> String {
            let key = cell_text(Some(key));
            let prefix = format!("{}:", remote_name(table));
            if key.starts_with(&prefix) { key } else { format!("{}{}", prefix, key) }
        }

        /// Every key under `<table>:`, read according to its Redis type.
        #asyncness fn fetch_records(tool: &str, table: &TableDef) -> Result<Vec<Value>, ToolError> {
            let mut conn = connect(tool)#dot_await?;
            let pattern = format!("{}:*", remote_name(table));
            let mut keys: Vec<String> = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(500)
                    #query
                    .map_err(|e| ToolError::backend(tool, e))?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            keys.sort();
            keys.dedup();

            let mut records = Vec::new();
            for key in keys {
                let kind: String = redis::cmd("TYPE").arg(&key)#query.map_err(|e| ToolError::backend(tool, e))?;
                let mut record = Map::new();
                record.insert("key".to_string(), Value::String(key.clone()));
                match kind.as_str() {
                    "hash" => {
                        let fields: HashMap<String, String> =
                            redis::cmd("HGETALL").arg(&key)#query.map_err(|e| ToolError::backend(tool, e))?;
                        for (field, value) in fields {
                            let value = coerce_cell(column_kind(table, &field), &value);
                            record.insert(field, value);
                        }
                    }
                    "string" => {
                        let value: Option<String> =
                            redis::cmd("GET").arg(&key)#query.map_err(|e| ToolError::backend(tool, e))?;
                        record.insert("value".to_string(), value.map(Value::String).unwrap_or(Value::Null));
                    }
                    "list" => {
                        let values: Vec<String> = redis::cmd("LRANGE")
                            .arg(&key)
                            .arg(0)
                            .arg(-1)
                            #query
                            .map_err(|e| ToolError::backend(tool, e))?;
                        record.insert("length".to_string(), json!(values.len()));
                        record.insert("values".to_string(), json!(values));
                    }
                    "set" => {
                        let members: Vec<String> =
                            redis::cmd("SMEMBERS").arg(&key)#query.map_err(|e| ToolError::backend(tool, e))?;
                        record.insert("cardinality".to_string(), json!(members.len()));
                        record.insert("members".to_string(), json!(members));
                    }
                    "zset" => {
                        let members: Vec<(String, f64)> = redis::cmd("ZRANGE")
                            .arg(&key)
                            .arg(0)
                            .arg(-1)
                            .arg("WITHSCORES")
                            #query
                            .map_err(|e| ToolError::backend(tool, e))?;
                        record.insert("cardinality".to_string(), json!(members.len()));
                        record.insert("members_with_scores".to_string(), json!(members));
                    }
                    _ => continue,
                }
                records.push(Value::Object(record));
            }
            Ok(records)
        }

        fn hash_fields(record: &Map<String, Value>) -> Vec<(String, String)> {
            record
                .iter()
                .filter(|(name, _)| name.as_str() != "key")
                .map(|(name, value)| (name.clone(), cell_text(Some(value))))
                .collect()
        }

        /// Stores the record as a hash; refuses to overwrite an existing key.
        #asyncness fn store_insert(tool: &str, table: &TableDef, record: Map<String, Value>) -> Result<Value, ToolError> {
            let key = record
                .get("key")
                .map(|k| record_key(table, k))
                .ok_or_else(|| ToolError::InvalidArgument("key is required".to_string()))?;
            let fields = hash_fields(&record);
            if fields.is_empty() {
                return Err(ToolError::InvalidArgument("at least one field besides key is required".to_string()));
            }
            let mut conn = connect(tool)#dot_await?;
            let exists: bool = redis::cmd("EXISTS").arg(&key)#query.map_err(|e| ToolError::backend(tool, e))?;
            if exists {
                return Err(ToolError::InvalidArgument(format!("{} already exists", key)));
            }
            let _: () = redis::cmd("HSET").arg(&key).arg(&fields)#query.map_err(|e| ToolError::backend(tool, e))?;
            let mut created = record;
            created.insert("key".to_string(), Value::String(key));
            Ok(Value::Object(created))
        }

        #asyncness fn store_update(tool: &str, table: &TableDef, key: &Value, changes: Map<String, Value>) -> Result<u64, ToolError> {
            let key = record_key(table, key);
            let fields = hash_fields(&changes);
            let mut conn = connect(tool)#dot_await?;
            let exists: bool = redis::cmd("EXISTS").arg(&key)#query.map_err(|e| ToolError::backend(tool, e))?;
            if !exists || fields.is_empty() {
                return Ok(0);
            }
            let _: () = redis::cmd("HSET").arg(&key).arg(&fields)#query.map_err(|e| ToolError::backend(tool, e))?;
            Ok(1)
        }

        #asyncness fn store_delete(tool: &str, table: &TableDef, key: &Value) -> Result<u64, ToolError> {
            let key = record_key(table, key);
            let mut conn = connect(tool)#dot_await?;
            let removed: u64 = redis::cmd("DEL").arg(&key)#query.map_err(|e| ToolError::backend(tool, e))?;
            Ok(removed)
        }
    }
}

/// Wraps a blocking `load_records` for the execution mode.
fn blocking_fetch(ctx: &Ctx<'_>) -> TokenStream {
    if ctx.is_async() {
        quote! {
            async fn fetch_records(tool: &str, table: &TableDef) -> Result<Vec<Value>, ToolError> {
                let owned_tool = tool.to_string();
                let table = *table;
                tokio::task::spawn_blocking(move || load_records(&owned_tool, &table))
                    .await
                    .map_err(|e| ToolError::backend(tool, e))?
            }
        }
    } else {
        quote! {
            fn fetch_records(tool: &str, table: &TableDef) -> Result<Vec<Value>, ToolError> {
                load_records(tool, table)
            }
        }
    }
}

fn files(ctx: &Ctx<'_>) -> TokenStream {
    let env = ctx.plan.kind.connection_env();
    let default_dir = ctx.schema.source_uri.split(" + ").next().unwrap_or_default();
    let fetch = blocking_fetch(ctx);
    quote! {
        const DEFAULT_DATA_DIR: &str = #default_dir;

        fn data_dir() -> std::path::PathBuf {
            std::path::PathBuf::from(std::env::var(#env).unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string()))
        }

        fn table_path(table: &TableDef) -> std::path::PathBuf {
            let dir = data_dir();
            let remote = remote_name(table);
            if std::path::Path::new(remote).extension().is_some() {
                return dir.join(remote);
            }
            ["csv", "json", "jsonl"]
                .iter()
                .map(|ext| dir.join(format!("{}.{}", remote, ext)))
                .find(|path| path.exists())
                .unwrap_or_else(|| dir.join(format!("{}.csv", remote)))
        }

        /// Records from the table's CSV, JSON or JSON Lines file.
        fn load_records(tool: &str, table: &TableDef) -> Result<Vec<Value>, ToolError> {
            let path = table_path(table);
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase)
                .unwrap_or_default();
            match extension.as_str() {
                "json" => {
                    let text = std::fs::read_to_string(&path).map_err(|e| ToolError::backend(tool, e))?;
                    let body: Value = serde_json::from_str(&text).map_err(|e| ToolError::backend(tool, e))?;
                    Ok(records_in(body))
                }
                "jsonl" => {
                    let text = std::fs::read_to_string(&path).map_err(|e| ToolError::backend(tool, e))?;
                    text.lines()
                        .filter(|line| !line.trim().is_empty())
                        .map(|line| serde_json::from_str(line).map_err(|e| ToolError::backend(tool, e)))
                        .collect()
                }
                _ => {
                    let mut reader = csv::Reader::from_path(&path).map_err(|e| ToolError::backend(tool, e))?;
                    let headers = reader.headers().map_err(|e| ToolError::backend(tool, e))?.clone();
                    let mut records = Vec::new();
                    for row in reader.records() {
                        let row = row.map_err(|e| ToolError::backend(tool, e))?;
                        let mut record = Map::new();
                        for (name, cell) in headers.iter().zip(row.iter()) {
                            record.insert(name.to_string(), coerce_cell(column_kind(table, name), cell));
                        }
                        records.push(Value::Object(record));
                    }
                    Ok(records)
                }
            }
        }

        #fetch
    }
}

fn excel(ctx: &Ctx<'_>) -> TokenStream {
    let env = ctx.plan.kind.connection_env();
    let uri = ctx.schema.source_uri.split(" + ").next().unwrap_or_default();
    let default_path = ctx.meta_str("file_path", uri);
    let fetch = blocking_fetch(ctx);
    quote! {
        const DEFAULT_WORKBOOK: &str = #default_path;

        fn workbook_path() -> String {
            std::env::var(#env).unwrap_or_else(|_| DEFAULT_WORKBOOK.to_string())
        }

        fn excel_value(kind: &str, cell: &calamine::Data) -> Value {
            use calamine::Data;
            match cell {
                Data::Empty => Value::Null,
                Data::Int(i) => json!(i),
                Data::Float(f) if kind == "integer" && f.fract() == 0.0 => json!(*f as i64),
                Data::Float(f) => json!(f),
                Data::Bool(b) => json!(b),
                Data::String(s) => coerce_cell(kind, s),
                other => Value::String(other.to_string()),
            }
        }

        /// Worksheet rows as records keyed by the header row.
        fn load_records(tool: &str, table: &TableDef) -> Result<Vec<Value>, ToolError> {
            use calamine::Reader;
            let mut workbook = calamine::open_workbook_auto(workbook_path()).map_err(|e| ToolError::backend(tool, e))?;
            let range = workbook
                .worksheet_range(remote_name(table))
                .map_err(|e| ToolError::backend(tool, e))?;
            let mut rows = range.rows();
            let Some(header) = rows.next() else {
                return Ok(Vec::new());
            };
            let header: Vec<String> = header.iter().map(|cell| cell.to_string()).collect();
            let mut records = Vec::new();
            for row in rows {
                let mut record = Map::new();
                for (name, cell) in header.iter().zip(row.iter()) {
                    record.insert(name.clone(), excel_value(column_kind(table, name), cell));
                }
                records.push(Value::Object(record));
            }
            Ok(records)
        }

        #fetch
    }
}
