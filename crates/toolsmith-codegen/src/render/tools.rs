//! Column catalogs and one typed function per planned tool.
//!
//! Tool bodies reach helpers through `self::` so a parameter can never
//! shadow them, and their own locals start with `__`, which sanitized
//! parameter names never do.

use proc_macro2::TokenStream;
use quote::quote;
use toolsmith_core::AuthMode;

use super::Ctx;
use crate::ident;
use crate::ir::{Param, ParamRole, ParamType, ToolKind, ToolSpec};
use crate::planner::{Mode, TablePlan};

/// `<TABLE>_COLUMNS` / `<TABLE>_TABLE` constants, plus the whitelist and its
/// validator in consolidated mode.
pub fn catalogs(ctx: &Ctx<'_>) -> TokenStream {
    let quote_char = super::sql::quote_char(ctx);
    let quoted = |name: &str| match quote_char {
        Some(q) => ident::sql_quote(name, q),
        None => name.to_string(),
    };

    let tables = ctx.plan.tables.iter().map(|plan| {
        let columns_const = ident::constant(&plan.slug, "COLUMNS");
        let table_const = ident::constant(&plan.slug, "TABLE");
        let columns = plan.table.columns.iter().map(|c| {
            let name = c.name.as_str();
            let quoted_name = quoted(&c.name);
            let kind = c.column_type.as_str();
            let nullable = c.nullable;
            let primary_key = c.primary_key;
            quote! {
                ColumnDef {
                    name: #name,
                    quoted: #quoted_name,
                    kind: #kind,
                    nullable: #nullable,
                    primary_key: #primary_key,
                }
            }
        });
        let name = plan.table.name.as_str();
        let quoted_table = quoted(&plan.table.name);
        let primary_key = match plan.primary_key() {
            Some(pk) => {
                let pk = pk.name.as_str();
                quote!(Some(#pk))
            }
            None => quote!(None),
        };
        let ops = plan.ops.iter().map(|op| op.as_str());
        quote! {
            const #columns_const: &[ColumnDef] = &[#(#columns),*];

            pub const #table_const: TableDef = TableDef {
                name: #name,
                quoted: #quoted_table,
                columns: #columns_const,
                primary_key: #primary_key,
                ops: &[#(#ops),*],
            };
        }
    });

    let whitelist = if ctx.plan.mode == Mode::Consolidated {
        let names = ctx.plan.tables.iter().map(|t| t.table.name.as_str());
        let consts = ctx
            .plan
            .tables
            .iter()
            .map(|t| ident::constant(&t.slug, "TABLE"));
        quote! {
            /// The only tables the generic tools may touch.
            pub const ALLOWED_TABLES: &[&str] = &[#(#names),*];

            const TABLES: &[TableDef] = &[#(#consts),*];

            /// Resolves a caller-supplied table name against the whitelist.
            fn validate_table(name: &str) -> Result<&'static TableDef, ToolError> {
                if !ALLOWED_TABLES.contains(&name) {
                    return Err(ToolError::PermissionDenied(format!("table {} is not exposed", name)));
                }
                TABLES
                    .iter()
                    .find(|t| t.name == name)
                    .ok_or_else(|| ToolError::PermissionDenied(format!("table {} is not exposed", name)))
            }

            fn require_op(table: &TableDef, op: &str) -> Result<(), ToolError> {
                if table.allows(op) {
                    Ok(())
                } else {
                    Err(ToolError::PermissionDenied(format!("{} is not allowed on {}", op, table.name)))
                }
            }
        }
    } else {
        TokenStream::new()
    };

    quote! {
        #(#tables)*
        #whitelist
    }
}

pub fn tool_fns(ctx: &Ctx<'_>) -> TokenStream {
    let fns = ctx.plan.tools.iter().map(|spec| tool_fn(ctx, spec));
    quote!(#(#fns)*)
}

/// Rust type of a parameter as it appears in the tool signature.
pub(super) fn rust_type(param: &Param) -> TokenStream {
    let base = match param.ty {
        ParamType::Text => quote!(String),
        ParamType::Integer => quote!(i64),
        ParamType::Float => quote!(f64),
        ParamType::Boolean => quote!(bool),
        ParamType::Json => quote!(Value),
        ParamType::TextList => quote!(Vec<String>),
        ParamType::ValueList | ParamType::Records => quote!(Vec<Value>),
    };
    if param.required { base } else { quote!(Option<#base>) }
}

fn tool_fn(ctx: &Ctx<'_>, spec: &ToolSpec) -> TokenStream {
    let asyncness = ctx.asyncness();
    let dot_await = ctx.dot_await();
    let name = ident::plain(&spec.name);
    let doc = format!(" {}", spec.description);
    let tool = spec.name.as_str();

    let (auth_param, api_key) = if ctx.config.auth_mode == AuthMode::ApiKey {
        (quote!(api_key: Option<&str>,), quote!(api_key))
    } else {
        (TokenStream::new(), quote!(None))
    };
    let params = spec.params.iter().map(|p| {
        let id = ident::snake(&p.ident);
        let ty = rust_type(p);
        quote!(#id: #ty)
    });
    let event = match spec.kind.event() {
        Some(event) => quote!(Some(#event)),
        None => quote!(None),
    };
    let cache_key = if ctx.config.caching() && spec.kind.cacheable() {
        let wires = spec.params.iter().map(|p| p.wire.as_str());
        let ids = spec.params.iter().map(|p| ident::snake(&p.ident));
        quote!(Some(self::cache_key(#tool, &json!({ #(#wires: #ids),* }))))
    } else {
        quote!(None)
    };

    let body = Body { ctx, spec }.render();
    let closure = if ctx.is_async() {
        quote!(move || async move { #body })
    } else {
        quote!(move || { #body })
    };

    quote! {
        #[doc = #doc]
        pub #asyncness fn #name(#auth_param #(#params),*) -> ToolResult {
            let __cache_key = #cache_key;
            self::run_tool(#tool, #api_key, __cache_key, #event, #closure)#dot_await
        }
    }
}

struct Body<'a> {
    ctx: &'a Ctx<'a>,
    spec: &'a ToolSpec,
}

impl Body<'_> {
    /// Successful tail expression. Async blocks need the error type spelled out.
    fn ok(&self, value: TokenStream) -> TokenStream {
        if self.ctx.is_async() {
            quote!(Ok::<Value, ToolError>(#value))
        } else {
            quote!(Ok(#value))
        }
    }

    /// Identifier of a control parameter, or `None` when the tool lacks it.
    fn control(&self, wire: &str) -> TokenStream {
        match self.spec.param(wire) {
            Some(p) => {
                let id = ident::snake(&p.ident);
                quote!(#id)
            }
            None => quote!(None),
        }
    }

    fn table_plan(&self) -> Option<&TablePlan> {
        self.spec.table.as_deref().and_then(|slug| self.ctx.plan.table(slug))
    }

    fn table_const(&self) -> TokenStream {
        match &self.spec.table {
            Some(slug) => {
                let id = ident::constant(slug, "TABLE");
                quote!(self::#id)
            }
            None => TokenStream::new(),
        }
    }

    /// `(column name, parameter)` pairs for column-valued parameters.
    fn column_params(&self) -> Vec<(&str, &Param)> {
        self.spec
            .params
            .iter()
            .filter_map(|p| match &p.role {
                ParamRole::Column(column) => Some((column.as_str(), p)),
                _ => None,
            })
            .collect()
    }

    /// Statements collecting column parameters into `__name`.
    fn collect_values(&self, var: &proc_macro2::Ident, params: &[(&str, &Param)]) -> TokenStream {
        let pushes = params.iter().map(|(column, p)| {
            let id = ident::snake(&p.ident);
            if p.required {
                quote!(#var.push((#column, json!(#id)));)
            } else {
                quote! {
                    if let Some(__v) = #id {
                        #var.push((#column, json!(__v)));
                    }
                }
            }
        });
        quote! {
            let mut #var: Vec<(&'static str, Value)> = Vec::new();
            #(#pushes)*
        }
    }

    fn list_query(&self, ranges: TokenStream) -> TokenStream {
        let limit = self.control("limit");
        let offset = self.control("offset");
        let sort_field = self.control("sort_field");
        let sort_direction = self.control("sort_direction");
        let fields = self.control("fields");
        quote! {
            let __query = self::ListQuery {
                limit: #limit,
                offset: #offset,
                sort_field: #sort_field,
                sort_direction: #sort_direction,
                fields: #fields,
                ranges: #ranges,
            };
        }
    }

    fn range_filters(&self) -> TokenStream {
        let filters = self.spec.params.iter().filter_map(|from| {
            let ParamRole::RangeFrom(column) = &from.role else {
                return None;
            };
            let to = self
                .spec
                .params
                .iter()
                .find(|p| p.role == ParamRole::RangeTo(column.clone()))?;
            let from_id = ident::snake(&from.ident);
            let to_id = ident::snake(&to.ident);
            Some(quote! {
                self::RangeFilter {
                    column: #column,
                    from: #from_id,
                    to: #to_id,
                }
            })
        });
        quote!(vec![#(#filters),*])
    }

    fn render(&self) -> TokenStream {
        let dot_await = self.ctx.dot_await();
        let tool = self.spec.name.as_str();
        let table = self.table_const();
        let limit = self.control("limit");
        let offset = self.control("offset");

        match &self.spec.kind {
            ToolKind::List => {
                let query = self.list_query(self.range_filters());
                quote! {
                    #query
                    self::table_list(#tool, &#table, __query)#dot_await
                }
            }
            ToolKind::GetByPk { .. } => {
                let key = self.key_param();
                quote!(self::table_get(#tool, &#table, json!(#key))#dot_await)
            }
            ToolKind::Search => {
                let query = self.control("query");
                quote!(self::table_search(#tool, &#table, #query, #limit)#dot_await)
            }
            ToolKind::Count => quote!(self::table_count(#tool, &#table)#dot_await),
            ToolKind::Schema => self.ok(quote!(self::table_schema(&#table))),
            ToolKind::Aggregate => {
                let group_by = self.control("group_by");
                let agg_function = self.control("agg_function");
                let agg_field = self.control("agg_field");
                quote!(self::table_aggregate(#tool, &#table, #group_by, #agg_function, #agg_field)#dot_await)
            }
            ToolKind::ExportCsv => {
                let done = self.ok(quote! {
                    json!({
                        "table": #table.name,
                        "format": "csv",
                        "rows": __rows.len(),
                        "content": __content,
                    })
                });
                quote! {
                    let __rows = self::table_rows(#tool, &#table, #limit)#dot_await?;
                    let __columns = self::resolve_fields(&#table, None);
                    let __content = self::to_csv(#tool, &__columns, &__rows)?;
                    #done
                }
            }
            ToolKind::ExportJson => {
                let done = self.ok(quote! {
                    json!({
                        "table": #table.name,
                        "format": "json",
                        "rows": __rows.len(),
                        "records": __rows,
                    })
                });
                quote! {
                    let __rows = self::table_rows(#tool, &#table, #limit)#dot_await?;
                    #done
                }
            }
            ToolKind::Insert => {
                let var = quote::format_ident!("__values");
                let collect = self.collect_values(&var, &self.column_params());
                quote! {
                    #collect
                    self::table_insert(#tool, &#table, #var)#dot_await
                }
            }
            ToolKind::BatchInsert => {
                let records = self.control("records");
                quote!(self::table_batch_insert(#tool, &#table, #records)#dot_await)
            }
            ToolKind::Update { pk } => {
                let key = self.key_param();
                let changes: Vec<(&str, &Param)> = self
                    .column_params()
                    .into_iter()
                    .filter(|(column, _)| column != pk)
                    .collect();
                let var = quote::format_ident!("__changes");
                let collect = self.collect_values(&var, &changes);
                quote! {
                    #collect
                    self::table_update(#tool, &#table, json!(#key), #var)#dot_await
                }
            }
            ToolKind::Delete { .. } => {
                let key = self.key_param();
                quote!(self::table_delete(#tool, &#table, json!(#key))#dot_await)
            }
            ToolKind::BatchDelete { .. } => {
                let ids = self.control("ids");
                quote!(self::table_batch_delete(#tool, &#table, #ids)#dot_await)
            }
            ToolKind::Join { fk } => {
                let to = self
                    .ctx
                    .plan
                    .tables
                    .iter()
                    .find(|t| t.table.name == fk.to_table)
                    .map(|t| ident::constant(&t.slug, "TABLE"));
                let from_column = fk.from_column.as_str();
                let to_column = fk.to_column.as_str();
                match to {
                    Some(to) => quote! {
                        self::table_join(#tool, &#table, #from_column, &self::#to, #to_column, #limit, #offset)#dot_await
                    },
                    None => quote! {
                        Err::<Value, ToolError>(ToolError::backend(#tool, "joined table is not generated"))
                    },
                }
            }
            ToolKind::ReadResource { resource } => {
                let uri = resource.uri.as_str();
                let path = uri.strip_prefix("file://").unwrap_or(uri);
                let mime = resource.mime_type.as_str();
                let read = if self.ctx.is_async() {
                    quote!(tokio::fs::read_to_string(#path).await)
                } else {
                    quote!(std::fs::read_to_string(#path))
                };
                let done = self.ok(quote!(json!({"uri": #uri, "mime_type": #mime, "content": __content})));
                quote! {
                    let __content = #read.map_err(|__e| self::ToolError::backend(#tool, __e))?;
                    #done
                }
            }
            ToolKind::SemanticSearch => {
                let query = self.control("query");
                let build = self.index_builder();
                quote! {
                    if !self::has_index(&#table) {
                        self::#build(#tool)#dot_await?;
                    }
                    self::nearest_rows(#tool, &#table, &#query, #limit)#dot_await
                }
            }
            ToolKind::RebuildIndex => {
                let build = self.index_builder();
                let done = self.ok(quote!(json!({"table": #table.name, "indexed": __indexed})));
                quote! {
                    let __indexed = self::#build(#tool)#dot_await?;
                    #done
                }
            }
            ToolKind::ListTables => self.ok(quote! {
                json!({
                    "count": self::TABLES.len(),
                    "tables": self::TABLES
                        .iter()
                        .map(|__t| json!({
                            "table": __t.name,
                            "primary_key": __t.primary_key,
                            "operations": __t.ops,
                        }))
                        .collect::<Vec<Value>>(),
                })
            }),
            ToolKind::DescribeTable => {
                let name = self.control("table");
                let done = self.ok(quote!(self::table_schema(__table)));
                quote! {
                    let __table = self::validate_table(&#name)?;
                    #done
                }
            }
            ToolKind::QueryDatabase => {
                let name = self.control("table");
                let query = self.list_query(quote!(Vec::new()));
                quote! {
                    let __table = self::validate_table(&#name)?;
                    self::require_op(__table, "read")?;
                    #query
                    self::table_list(#tool, __table, __query)#dot_await
                }
            }
            ToolKind::InsertRecord => {
                let name = self.control("table");
                let record = self.control("record");
                quote! {
                    let __table = self::validate_table(&#name)?;
                    self::require_op(__table, "insert")?;
                    let __values = self::record_pairs(&#record)?;
                    self::table_insert(#tool, __table, __values)#dot_await
                }
            }
            ToolKind::UpdateRecord => {
                let name = self.control("table");
                let id = self.control("id");
                let changes = self.control("changes");
                quote! {
                    let __table = self::validate_table(&#name)?;
                    self::require_op(__table, "update")?;
                    let __changes = self::record_pairs(&#changes)?;
                    self::table_update(#tool, __table, #id, __changes)#dot_await
                }
            }
            ToolKind::DeleteRecord => {
                let name = self.control("table");
                let id = self.control("id");
                quote! {
                    let __table = self::validate_table(&#name)?;
                    self::require_op(__table, "delete")?;
                    self::table_delete(#tool, __table, #id)#dot_await
                }
            }
            ToolKind::WebhookRegister => {
                let url = self.control("url");
                let events = self.control("events");
                quote!(self::subscribe_webhook(#url, #events))
            }
            ToolKind::WebhookList => quote!(self::registered_webhooks()),
            ToolKind::WebhookRemove => {
                let url = self.control("url");
                quote!(self::unsubscribe_webhook(#url))
            }
        }
    }

    /// The primary-key parameter of a by-key tool.
    fn key_param(&self) -> TokenStream {
        let pk = self.table_plan().and_then(|t| t.primary_key()).map(|c| c.name.as_str());
        let param = self
            .spec
            .params
            .iter()
            .find(|p| matches!(&p.role, ParamRole::Column(c) if Some(c.as_str()) == pk))
            .or_else(|| self.spec.params.first());
        match param {
            Some(p) => {
                let id = ident::snake(&p.ident);
                quote!(#id)
            }
            None => quote!(Value::Null),
        }
    }

    fn index_builder(&self) -> proc_macro2::Ident {
        quote::format_ident!("build_index_{}", self.spec.table.as_deref().unwrap_or_default())
    }
}
