//! Optional runtime features wrapped around every tool body: API-key guard,
//! rate limiting, read cache, audit logging, tracing spans, webhooks and the
//! semantic index.

use proc_macro2::{Literal, TokenStream};
use quote::quote;
use toolsmith_core::{AuthMode, BackendFamily, CacheBackend};

use super::Ctx;
use crate::ident;
use crate::ir::ToolKind;

pub fn blocks(ctx: &Ctx<'_>) -> TokenStream {
    let guard = guard(ctx);
    let cache = cache(ctx);
    let webhooks = webhooks(ctx);
    let semantic = semantic(ctx);
    let run_tool = run_tool(ctx);
    quote! {
        #guard
        #cache
        #webhooks
        #semantic
        #run_tool
    }
}

fn guard(ctx: &Ctx<'_>) -> TokenStream {
    let auth = if ctx.config.auth_mode == AuthMode::ApiKey {
        quote! {
            fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
                if a.len() != b.len() {
                    return false;
                }
                a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
            }

            /// Rejects calls whose key does not match `MCP_API_KEY`.
            fn check_api_key(api_key: Option<&str>) -> Result<(), ToolError> {
                let expected = std::env::var("MCP_API_KEY")
                    .ok()
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| ToolError::PermissionDenied("MCP_API_KEY is not configured".to_string()))?;
                let presented = api_key.ok_or_else(|| ToolError::PermissionDenied("missing API key".to_string()))?;
                if !constant_time_eq(expected.as_bytes(), presented.as_bytes()) {
                    return Err(ToolError::PermissionDenied("invalid API key".to_string()));
                }
                Ok(())
            }
        }
    } else {
        TokenStream::new()
    };
    let auth_call = if ctx.config.auth_mode == AuthMode::ApiKey {
        quote!(check_api_key(api_key)?;)
    } else {
        TokenStream::new()
    };

    let rate = ctx.config.rate_limit.filter(|r| r.is_finite() && *r > 0.0);
    let (limiter, limiter_call) = match rate {
        Some(rate) => {
            let rate = Literal::f64_unsuffixed(rate);
            (
                quote! {
                    /// Requests per second accepted across all tools.
                    const RATE_LIMIT: f64 = #rate;

                    struct TokenBucket {
                        tokens: f64,
                        refilled: Instant,
                    }

                    static BUCKET: Mutex<Option<TokenBucket>> = Mutex::new(None);

                    fn take_token() -> Result<(), ToolError> {
                        let mut guard = BUCKET.lock().map_err(|_| ToolError::RateLimited)?;
                        let now = Instant::now();
                        let capacity = RATE_LIMIT.max(1.0);
                        let bucket = guard.get_or_insert(TokenBucket {
                            tokens: capacity,
                            refilled: now,
                        });
                        let elapsed = now.duration_since(bucket.refilled).as_secs_f64();
                        bucket.tokens = (bucket.tokens + elapsed * RATE_LIMIT).min(capacity);
                        bucket.refilled = now;
                        if bucket.tokens < 1.0 {
                            return Err(ToolError::RateLimited);
                        }
                        bucket.tokens -= 1.0;
                        Ok(())
                    }
                },
                quote!(take_token()?;),
            )
        }
        None => (TokenStream::new(), TokenStream::new()),
    };

    quote! {
        #auth
        #limiter

        /// Runs before the data source is touched.
        fn guard(tool: &str, api_key: Option<&str>) -> Result<(), ToolError> {
            #auth_call
            #limiter_call
            Ok(())
        }
    }
}

fn cache(ctx: &Ctx<'_>) -> TokenStream {
    if !ctx.config.caching() {
        return TokenStream::new();
    }
    let asyncness = ctx.asyncness();
    let ttl = Literal::u64_unsuffixed(ctx.config.cache_ttl);

    let store = match ctx.config.cache_backend {
        CacheBackend::Memory => quote! {
            fn cache_entries() -> &'static Mutex<HashMap<String, (Instant, Value)>> {
                static ENTRIES: OnceLock<Mutex<HashMap<String, (Instant, Value)>>> = OnceLock::new();
                ENTRIES.get_or_init(Default::default)
            }

            #asyncness fn cache_get(key: &str) -> Option<Value> {
                let mut entries = cache_entries().lock().ok()?;
                match entries.get(key) {
                    Some((stored, value)) if stored.elapsed() < CACHE_TTL => Some(value.clone()),
                    Some(_) => {
                        entries.remove(key);
                        None
                    }
                    None => None,
                }
            }

            #asyncness fn cache_put(key: String, value: &Value) {
                let Ok(mut entries) = cache_entries().lock() else {
                    return;
                };
                if entries.len() >= CACHE_CAPACITY {
                    entries.retain(|_, (stored, _)| stored.elapsed() < CACHE_TTL);
                }
                if entries.len() < CACHE_CAPACITY {
                    entries.insert(key, (Instant::now(), value.clone()));
                }
            }
        },
        CacheBackend::Redis => {
            let (connect, query) = if ctx.is_async() {
                (
                    quote! {
                        async fn cache_connection() -> Option<redis::aio::MultiplexedConnection> {
                            let url = std::env::var("CACHE_REDIS_URL").or_else(|_| std::env::var("REDIS_URL")).ok()?;
                            let client = redis::Client::open(url.as_str()).ok()?;
                            client.get_multiplexed_async_connection().await.ok()
                        }
                    },
                    quote!(.query_async(&mut conn).await),
                )
            } else {
                (
                    quote! {
                        fn cache_connection() -> Option<redis::Connection> {
                            let url = std::env::var("CACHE_REDIS_URL").or_else(|_| std::env::var("REDIS_URL")).ok()?;
                            let client = redis::Client::open(url.as_str()).ok()?;
                            client.get_connection().ok()
                        }
                    },
                    quote!(.query(&mut conn)),
                )
            };
            let dot_await = ctx.dot_await();
            quote! {
                #connect

                #asyncness fn cache_get(key: &str) -> Option<Value> {
                    let mut conn = cache_connection()#dot_await?;
                    let text: Option<String> = redis::cmd("GET")
                        .arg(format!("toolsmith:{}", key))
                        #query
                        .ok()?;
                    serde_json::from_str(&text?).ok()
                }

                #asyncness fn cache_put(key: String, value: &Value) {
                    let Some(mut conn) = cache_connection()#dot_await else {
                        tracing::debug!("Cache backend unavailable; result not cached");
                        return;
                    };
                    let stored: Result<(), redis::RedisError> = redis::cmd("SET")
                        .arg(format!("toolsmith:{}", key))
                        .arg(value.to_string())
                        .arg("EX")
                        .arg(CACHE_TTL.as_secs())
                        #query;
                    if let Err(e) = stored {
                        tracing::warn!(error = %e, "Failed to store cached result");
                    }
                }
            }
        }
    };

    quote! {
        const CACHE_TTL: Duration = Duration::from_secs(#ttl);
        const CACHE_CAPACITY: usize = 4096;

        /// Cache key for a call: tool name plus canonical JSON arguments.
        fn cache_key(tool: &str, args: &Value) -> String {
            format!("{}:{}", tool, args)
        }

        #store
    }
}

fn webhooks(ctx: &Ctx<'_>) -> TokenStream {
    if !ctx.config.webhooks {
        return TokenStream::new();
    }
    let asyncness = ctx.asyncness();
    let dot_await = ctx.dot_await();
    let client = if matches!(ctx.family(), BackendFamily::HostedRest(_)) {
        TokenStream::new()
    } else {
        super::store::http_client(ctx)
    };

    quote! {
        #client

        const WEBHOOK_EVENTS: &[&str] = &["insert", "update", "delete"];

        #[derive(Debug, Clone)]
        struct Webhook {
            url: String,
            events: Vec<String>,
        }

        static WEBHOOKS: Mutex<Vec<Webhook>> = Mutex::new(Vec::new());

        fn hook_json(hook: &Webhook) -> Value {
            json!({"url": hook.url, "events": hook.events})
        }

        fn subscribe_webhook(url: String, events: Option<Vec<String>>) -> ToolResult {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ToolError::InvalidArgument(format!("url must be http(s), got {}", url)));
            }
            let events = match events {
                None => WEBHOOK_EVENTS.iter().map(|e| e.to_string()).collect(),
                Some(events) if events.is_empty() => {
                    return Err(ToolError::InvalidArgument("events must not be empty".to_string()));
                }
                Some(events) => events,
            };
            if let Some(bad) = events.iter().find(|e| !WEBHOOK_EVENTS.contains(&e.as_str())) {
                return Err(ToolError::InvalidArgument(format!(
                    "unknown event {}; expected insert, update or delete",
                    bad
                )));
            }
            let hook = Webhook { url, events };
            let mut hooks = WEBHOOKS
                .lock()
                .map_err(|_| ToolError::backend("webhook_register", "webhook registry poisoned"))?;
            hooks.retain(|h| h.url != hook.url);
            hooks.push(hook.clone());
            Ok(json!({"registered": true, "webhook": hook_json(&hook)}))
        }

        fn registered_webhooks() -> ToolResult {
            let hooks = WEBHOOKS
                .lock()
                .map_err(|_| ToolError::backend("webhook_list", "webhook registry poisoned"))?;
            let webhooks: Vec<Value> = hooks.iter().map(hook_json).collect();
            Ok(json!({"count": webhooks.len(), "webhooks": webhooks}))
        }

        fn unsubscribe_webhook(url: String) -> ToolResult {
            let mut hooks = WEBHOOKS
                .lock()
                .map_err(|_| ToolError::backend("webhook_remove", "webhook registry poisoned"))?;
            let before = hooks.len();
            hooks.retain(|h| h.url != url);
            Ok(json!({"url": url, "removed": hooks.len() < before}))
        }

        /// Posts a mutation event to every subscriber. Delivery failures are
        /// logged; the mutation has already succeeded.
        #asyncness fn fire_webhooks(tool: &str, event: &str, payload: &Value) {
            let targets: Vec<String> = match WEBHOOKS.lock() {
                Ok(hooks) => hooks
                    .iter()
                    .filter(|h| h.events.iter().any(|e| e == event))
                    .map(|h| h.url.clone())
                    .collect(),
                Err(_) => return,
            };
            if targets.is_empty() {
                return;
            }
            let body = json!({
                "event": event,
                "tool": tool,
                "source_type": SOURCE_TYPE,
                "data": payload,
            });
            for url in targets {
                match http_client().post(url.as_str()).json(&body).send()#dot_await {
                    Ok(response) if response.status().is_success() => {
                        tracing::debug!(url = %url, event, "Webhook delivered");
                    }
                    Ok(response) => {
                        tracing::warn!(url = %url, event, status = %response.status(), "Webhook rejected");
                    }
                    Err(e) => {
                        tracing::warn!(url = %url, event, error = %e, "Webhook delivery failed");
                    }
                }
            }
        }
    }
}

fn semantic(ctx: &Ctx<'_>) -> TokenStream {
    let indexed: Vec<&str> = ctx
        .plan
        .tools
        .iter()
        .filter(|t| matches!(t.kind, ToolKind::RebuildIndex))
        .filter_map(|t| t.table.as_deref())
        .collect();
    if indexed.is_empty() {
        return TokenStream::new();
    }
    let asyncness = ctx.asyncness();
    let dot_await = ctx.dot_await();

    let builders = indexed.iter().map(|slug| {
        let name = quote::format_ident!("build_index_{}", slug);
        let table = ident::constant(slug, "TABLE");
        quote! {
            #asyncness fn #name(tool: &str) -> Result<usize, ToolError> {
                index_table(tool, &#table)#dot_await
            }
        }
    });

    let embed_texts = if ctx.is_async() {
        quote! {
            /// Model load and inference run on the blocking pool.
            async fn embed_texts(tool: &str, texts: Vec<String>) -> Result<Vec<Vec<f32>>, ToolError> {
                let owned_tool = tool.to_string();
                tokio::task::spawn_blocking(move || embed_blocking(&owned_tool, texts))
                    .await
                    .map_err(|e| ToolError::backend(tool, e))?
            }
        }
    } else {
        quote! {
            fn embed_texts(tool: &str, texts: Vec<String>) -> Result<Vec<Vec<f32>>, ToolError> {
                embed_blocking(tool, texts)
            }
        }
    };

    quote! {
        static EMBEDDER: Mutex<Option<fastembed::TextEmbedding>> = Mutex::new(None);

        fn vector_index() -> &'static Mutex<HashMap<&'static str, Vec<(Vec<f32>, Value)>>> {
            static INDEX: OnceLock<Mutex<HashMap<&'static str, Vec<(Vec<f32>, Value)>>>> = OnceLock::new();
            INDEX.get_or_init(Default::default)
        }

        /// Embeds `texts`, loading the model on first use. Blocks the caller.
        fn embed_blocking(tool: &str, texts: Vec<String>) -> Result<Vec<Vec<f32>>, ToolError> {
            let mut guard = EMBEDDER
                .lock()
                .map_err(|_| ToolError::backend(tool, "embedding model lock poisoned"))?;
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(Default::default())
                    .map_err(|e| ToolError::backend(tool, e))?;
                *guard = Some(model);
            }
            let Some(model) = guard.as_mut() else {
                return Err(ToolError::backend(tool, "embedding model unavailable"));
            };
            model.embed(texts, None).map_err(|e| ToolError::backend(tool, e))
        }

        #embed_texts

        fn cosine(a: &[f32], b: &[f32]) -> f32 {
            let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            let norm = a.iter().map(|x| x * x).sum::<f32>().sqrt() * b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm == 0.0 { 0.0 } else { dot / norm }
        }

        fn has_index(table: &TableDef) -> bool {
            vector_index()
                .lock()
                .map(|index| index.contains_key(table.name))
                .unwrap_or(false)
        }

        /// Embeds the searchable text of up to `MAX_LIMIT` rows.
        #asyncness fn index_table(tool: &str, table: &TableDef) -> Result<usize, ToolError> {
            let rows = table_rows(tool, table, Some(MAX_LIMIT))#dot_await?;
            let searchable = table.searchable();
            let texts: Vec<String> = rows
                .iter()
                .map(|row| {
                    searchable
                        .iter()
                        .map(|c| cell_text(row.get(c.name)))
                        .filter(|text| !text.is_empty())
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect();
            let vectors = if texts.is_empty() { Vec::new() } else { embed_texts(tool, texts)#dot_await? };
            let entries: Vec<(Vec<f32>, Value)> = vectors.into_iter().zip(rows).collect();
            let count = entries.len();
            vector_index()
                .lock()
                .map_err(|_| ToolError::backend(tool, "vector index lock poisoned"))?
                .insert(table.name, entries);
            tracing::info!(table = table.name, rows = count, "Vector index built");
            Ok(count)
        }

        #asyncness fn nearest_rows(tool: &str, table: &TableDef, query: &str, limit: Option<i64>) -> ToolResult {
            let limit = clamp_limit(limit) as usize;
            let target = embed_texts(tool, vec![query.to_string()])#dot_await?
                .into_iter()
                .next()
                .unwrap_or_default();
            let index = vector_index()
                .lock()
                .map_err(|_| ToolError::backend(tool, "vector index lock poisoned"))?;
            let entries = index.get(table.name).map(Vec::as_slice).unwrap_or(&[]);
            let mut scored: Vec<(f32, &Value)> = entries
                .iter()
                .map(|(vector, row)| (cosine(&target, vector), row))
                .collect();
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            let results: Vec<Value> = scored
                .into_iter()
                .take(limit)
                .map(|(score, row)| json!({"score": score, "record": row}))
                .collect();
            Ok(json!({"count": results.len(), "results": results}))
        }

        #(#builders)*
    }
}

/// The wrapper every tool body runs inside.
fn run_tool(ctx: &Ctx<'_>) -> TokenStream {
    let asyncness = ctx.asyncness();
    let dot_await = ctx.dot_await();
    let caching = ctx.config.caching();
    let audit = ctx.config.audit;

    let cache_lookup = if caching {
        quote! {
            if let Some(key) = &cache_key {
                if let Some(hit) = cache_get(key)#dot_await {
                    tracing::debug!(tool, "Cache hit");
                    return Ok(hit);
                }
            }
        }
    } else {
        TokenStream::new()
    };
    let cache_store = if caching {
        quote! {
            if let (Ok(value), Some(key)) = (&result, cache_key) {
                cache_put(key, value)#dot_await;
            }
        }
    } else {
        TokenStream::new()
    };
    let audit_record = if audit {
        quote! {
            let duration_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(_) => tracing::info!(target: "audit", tool, outcome = "ok", duration_ms, "Tool call"),
                Err(e) => tracing::warn!(target: "audit", tool, outcome = "error", duration_ms, error = %e, "Tool call"),
            }
        }
    } else {
        quote! {
            if let Err(e) = &result {
                tracing::debug!(tool, error = %e, "Tool call failed");
            }
        }
    };
    let dispatch = if ctx.config.webhooks {
        quote! {
            if let (Ok(value), Some(event)) = (&result, event) {
                fire_webhooks(tool, event, value)#dot_await;
            }
        }
    } else {
        TokenStream::new()
    };

    let (generics, bounds, invoke) = if ctx.is_async() {
        (
            quote!(<F, Fut>),
            quote!(where F: FnOnce() -> Fut, Fut: std::future::Future<Output = ToolResult>),
            quote!(body().await),
        )
    } else {
        (quote!(<F>), quote!(where F: FnOnce() -> ToolResult), quote!(body()))
    };

    let execute_call = quote!(execute_tool(tool, api_key, cache_key, event, body));
    let entry = match (ctx.config.otel, ctx.is_async()) {
        (true, true) => quote! {
            let span = tracing::info_span!("tool_call", tool, otel.kind = "server");
            tracing::Instrument::instrument(#execute_call, span).await
        },
        (true, false) => quote! {
            let _entered = tracing::info_span!("tool_call", tool, otel.kind = "server").entered();
            #execute_call
        },
        (false, _) => quote!(#execute_call #dot_await),
    };

    quote! {
        #asyncness fn execute_tool #generics(
            tool: &'static str,
            api_key: Option<&str>,
            cache_key: Option<String>,
            event: Option<&'static str>,
            body: F,
        ) -> ToolResult
        #bounds
        {
            guard(tool, api_key)?;
            #cache_lookup
            let started = Instant::now();
            let result = #invoke;
            #audit_record
            #cache_store
            #dispatch
            result
        }

        /// Runs one tool call: guard, cache, body, audit and webhooks.
        #asyncness fn run_tool #generics(
            tool: &'static str,
            api_key: Option<&str>,
            cache_key: Option<String>,
            event: Option<&'static str>,
            body: F,
        ) -> ToolResult
        #bounds
        {
            #entry
        }
    }
}
