//! Token renderers for the two generated artifacts.
//!
//! Every renderer returns a `proc_macro2::TokenStream`. Sync and async output
//! come from the same templates: [`Ctx::asyncness`] and [`Ctx::dot_await`]
//! expand to `async`/`.await` or to nothing, so one module never mixes both.

mod entry;
mod features;
mod prelude;
mod server;
mod sql;
mod store;
mod tools;

use proc_macro2::TokenStream;
use quote::quote;
use serde_json::Value;
use toolsmith_core::{BackendFamily, DataSourceSchema, GeneratorConfig};

use crate::error::GenerateError;
use crate::planner::Plan;

pub use entry::entry_point;

/// Everything a renderer may look at.
pub struct Ctx<'a> {
    pub schema: &'a DataSourceSchema,
    pub config: &'a GeneratorConfig,
    pub plan: &'a Plan,
}

impl<'a> Ctx<'a> {
    pub fn new(schema: &'a DataSourceSchema, config: &'a GeneratorConfig, plan: &'a Plan) -> Self {
        Self {
            schema,
            config,
            plan,
        }
    }

    pub fn family(&self) -> BackendFamily {
        self.plan.kind.family()
    }

    pub fn is_async(&self) -> bool {
        self.config.async_mode
    }

    pub fn asyncness(&self) -> TokenStream {
        if self.is_async() { quote!(async) } else { TokenStream::new() }
    }

    pub fn dot_await(&self) -> TokenStream {
        if self.is_async() { quote!(.await) } else { TokenStream::new() }
    }

    /// String metadata value, or `default` when absent.
    pub fn meta_str(&self, key: &str, default: &str) -> String {
        match self.schema.metadata.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => default.to_string(),
            Some(other) => other.to_string(),
        }
    }

    pub fn meta_u32(&self, key: &str, default: u32) -> u32 {
        self.schema
            .metadata
            .get(key)
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(default)
    }
}

/// Render the always-regenerated tools module.
pub fn tools_module(ctx: &Ctx<'_>) -> Result<TokenStream, GenerateError> {
    let header = prelude::header(ctx);
    let errors = prelude::errors();
    let helpers = prelude::helpers(ctx);
    let paging = prelude::paging()?;
    let runtime = if ctx.family().is_sql() {
        sql::runtime(ctx)
    } else {
        store::runtime(ctx)
    };
    let infrastructure = if ctx.family().is_sql() {
        sql::infrastructure(ctx)
    } else {
        store::infrastructure(ctx)
    };
    let features = features::blocks(ctx);
    let catalogs = tools::catalogs(ctx);
    let tool_fns = tools::tool_fns(ctx);
    let server = server::server(ctx);

    Ok(quote! {
        #header
        #errors
        #helpers
        #paging
        #runtime
        #infrastructure
        #features
        #catalogs
        #tool_fns
        #server
    })
}

/// Crates the generated code depends on, as `(name, version requirement)`.
pub fn dependencies(ctx: &Ctx<'_>) -> Vec<(&'static str, &'static str)> {
    use toolsmith_core::{SourceKind, SqlFlavor};

    let mut deps = vec![
        ("serde_json", "1"),
        ("tracing", "0.1"),
        ("tracing-subscriber", "{ version = \"0.3\", features = [\"env-filter\"] }"),
    ];
    let asynchronous = ctx.is_async();
    if asynchronous {
        deps.push(("tokio", "{ version = \"1\", features = [\"full\"] }"));
    }
    match (ctx.family(), asynchronous) {
        (BackendFamily::EmbeddedSql, false) => deps.push(("rusqlite", "{ version = \"0.32\", features = [\"bundled\"] }")),
        (BackendFamily::EmbeddedSql, true) => deps.push((
            "sqlx",
            "{ version = \"0.8\", features = [\"runtime-tokio\", \"sqlite\", \"json\", \"chrono\"] }",
        )),
        (BackendFamily::NetworkSql(SqlFlavor::Postgres), false) => {
            deps.push(("postgres", "{ version = \"0.19\", features = [\"with-serde_json-1\", \"with-chrono-0_4\"] }"));
            deps.push(("r2d2", "0.8"));
            deps.push(("r2d2_postgres", "0.18"));
            deps.push(("bytes", "1"));
            deps.push(("chrono", "{ version = \"0.4\", features = [\"serde\"] }"));
            if ctx.config.ssl_enabled {
                deps.push(("postgres-native-tls", "0.5"));
                deps.push(("native-tls", "0.2"));
            }
        }
        (BackendFamily::NetworkSql(SqlFlavor::Mysql), false) => deps.push(("mysql", "25")),
        (BackendFamily::NetworkSql(flavor), true) => {
            let features = match flavor {
                SqlFlavor::Postgres => "{ version = \"0.8\", features = [\"runtime-tokio\", \"tls-rustls\", \"postgres\", \"json\", \"chrono\"] }",
                SqlFlavor::Mysql => "{ version = \"0.8\", features = [\"runtime-tokio\", \"tls-rustls\", \"mysql\", \"json\", \"chrono\"] }",
            };
            deps.push(("sqlx", features));
            deps.push(("chrono", "{ version = \"0.4\", features = [\"serde\"] }"));
        }
        (BackendFamily::HostedRest(_), false) => deps.push(("reqwest", "{ version = \"0.12\", features = [\"blocking\", \"json\"] }")),
        (BackendFamily::HostedRest(_), true) => deps.push(("reqwest", "{ version = \"0.12\", features = [\"json\"] }")),
        (BackendFamily::Document, false) => deps.push(("mongodb", "{ version = \"3\", features = [\"sync\"] }")),
        (BackendFamily::Document, true) => {
            deps.push(("mongodb", "3"));
            deps.push(("futures", "0.3"));
        }
        (BackendFamily::KeyValue, false) => deps.push(("redis", "0.27")),
        (BackendFamily::KeyValue, true) => deps.push(("redis", "{ version = \"0.27\", features = [\"tokio-comp\"] }")),
        (BackendFamily::Files, _) => {
            if ctx.plan.kind == SourceKind::Excel {
                deps.push(("calamine", "0.26"));
            }
        }
    }
    let exports = ctx.plan.tools.iter().any(|t| matches!(t.kind, crate::ir::ToolKind::ExportCsv));
    if exports || ctx.plan.kind == SourceKind::Files {
        deps.push(("csv", "1"));
    }
    let needs_http = ctx.config.webhooks && !matches!(ctx.family(), BackendFamily::HostedRest(_));
    if needs_http {
        let reqwest = if asynchronous {
            "{ version = \"0.12\", features = [\"json\"] }"
        } else {
            "{ version = \"0.12\", features = [\"blocking\", \"json\"] }"
        };
        deps.push(("reqwest", reqwest));
    }
    if ctx.config.caching()
        && ctx.config.cache_backend == toolsmith_core::CacheBackend::Redis
        && ctx.family() != BackendFamily::KeyValue
    {
        deps.push(if asynchronous {
            ("redis", "{ version = \"0.27\", features = [\"tokio-comp\"] }")
        } else {
            ("redis", "0.27")
        });
    }
    if ctx.config.semantic {
        deps.push(("fastembed", "4"));
    }
    deps.sort_by(|a, b| a.0.cmp(b.0));
    deps.dedup_by(|a, b| a.0 == b.0);
    deps
}
