// Paging helpers emitted verbatim into every tools module.
//
// The including scope provides `serde_json::{json, Value}` and the
// `DEFAULT_LIMIT` / `MAX_LIMIT` constants. This file is also compiled into the
// generator's own tests, so it must stay free of inner attributes.

/// Requested limit clamped to `1..=MAX_LIMIT`.
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).max(1).min(MAX_LIMIT.max(1))
}

pub fn clamp_offset(offset: Option<i64>) -> i64 {
    offset.unwrap_or(0).max(0)
}

/// The `offset..offset + limit` window of already fetched records.
pub fn page_window<T>(items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    items
        .into_iter()
        .skip(usize::try_from(offset).unwrap_or(0))
        .take(usize::try_from(limit).unwrap_or(0))
        .collect()
}

/// Pagination envelope returned by every list tool.
pub fn page_envelope(results: Vec<Value>, total: i64, offset: i64) -> Value {
    let count = results.len() as i64;
    json!({
        "results": results,
        "total": total,
        "has_more": offset + count < total,
        "next_offset": offset + count,
    })
}
