//! Tool catalog, argument dispatch and the JSON-RPC stdio loop.

use proc_macro2::TokenStream;
use quote::quote;
use toolsmith_core::AuthMode;

use super::Ctx;
use crate::ident;
use crate::ir::{ParamType, ToolKind, ToolSpec};

pub fn server(ctx: &Ctx<'_>) -> TokenStream {
    let catalog = catalog(ctx);
    let dispatch = dispatch(ctx);
    let stdio = stdio(ctx);
    quote! {
        #catalog
        #dispatch
        #stdio
    }
}

fn catalog(ctx: &Ctx<'_>) -> TokenStream {
    let tools = ctx.plan.tools.iter().map(|spec| {
        let name = spec.name.as_str();
        let description = spec.description.as_str();
        let schema = spec.input_schema().to_string();
        let read_only = spec.read_only();
        quote! {
            ToolInfo {
                name: #name,
                description: #description,
                input_schema: #schema,
                read_only: #read_only,
            }
        }
    });
    let resources = ctx.plan.tools.iter().filter_map(|spec| match &spec.kind {
        ToolKind::ReadResource { resource } => {
            let name = resource.name.as_str();
            let uri = resource.uri.as_str();
            let mime = resource.mime_type.as_str();
            let description = resource.description.as_deref().unwrap_or_default();
            let tool = spec.name.as_str();
            Some(quote! {
                ResourceInfo {
                    name: #name,
                    uri: #uri,
                    mime_type: #mime,
                    description: #description,
                    tool: #tool,
                }
            })
        }
        _ => None,
    });

    let handler = if ctx.is_async() {
        quote! {
            /// Boxed future returned by hand-written async handlers.
            pub type ToolFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ToolResult> + Send>>;

            pub type ToolHandler = fn(Value) -> ToolFuture;
        }
    } else {
        quote! {
            pub type ToolHandler = fn(Value) -> ToolResult;
        }
    };

    quote! {
        /// Static description of a generated tool.
        pub struct ToolInfo {
            pub name: &'static str,
            pub description: &'static str,
            /// JSON Schema of the arguments, as JSON text.
            pub input_schema: &'static str,
            pub read_only: bool,
        }

        pub const TOOLS: &[ToolInfo] = &[#(#tools),*];

        pub struct ResourceInfo {
            pub name: &'static str,
            pub uri: &'static str,
            pub mime_type: &'static str,
            pub description: &'static str,
            /// Tool that reads this resource.
            pub tool: &'static str,
        }

        pub const RESOURCES: &[ResourceInfo] = &[#(#resources),*];

        #handler

        /// A hand-written tool served next to the generated ones.
        pub struct CustomTool {
            pub name: &'static str,
            pub description: &'static str,
            pub input_schema: Value,
            pub handler: ToolHandler,
        }

        fn tool_json(name: &str, description: &str, input_schema: Value, read_only: bool) -> Value {
            json!({
                "name": name,
                "description": description,
                "inputSchema": input_schema,
                "annotations": {"readOnlyHint": read_only},
            })
        }

        /// Generated tools in MCP `tools/list` shape.
        pub fn tool_catalog() -> Vec<Value> {
            TOOLS
                .iter()
                .map(|t| {
                    let schema = serde_json::from_str(t.input_schema).unwrap_or_else(|_| json!({"type": "object"}));
                    tool_json(t.name, t.description, schema, t.read_only)
                })
                .collect()
        }

        pub fn resource_catalog() -> Vec<Value> {
            RESOURCES
                .iter()
                .map(|r| {
                    json!({
                        "name": r.name,
                        "uri": r.uri,
                        "mimeType": r.mime_type,
                        "description": r.description,
                    })
                })
                .collect()
        }
    }
}

/// Extraction expression for one argument.
fn extract(ty: ParamType, wire: &str, required: bool) -> TokenStream {
    let getter = match ty {
        ParamType::Text => quote!(arg_string),
        ParamType::Integer => quote!(arg_i64),
        ParamType::Float => quote!(arg_f64),
        ParamType::Boolean => quote!(arg_bool),
        ParamType::Json => quote!(arg_json),
        ParamType::TextList => quote!(arg_strings),
        ParamType::ValueList | ParamType::Records => quote!(arg_list),
    };
    if required {
        quote!(required(#getter(args, #wire)?, #wire)?)
    } else {
        quote!(#getter(args, #wire)?)
    }
}

fn dispatch_arm(ctx: &Ctx<'_>, spec: &ToolSpec) -> TokenStream {
    let dot_await = ctx.dot_await();
    let wire_name = spec.name.as_str();
    let name = ident::plain(&spec.name);
    let api_key = if ctx.config.auth_mode == AuthMode::ApiKey {
        quote!(api_key,)
    } else {
        TokenStream::new()
    };
    let args = spec
        .params
        .iter()
        .map(|p| extract(p.ty, &p.wire, p.required));
    quote! {
        #wire_name => #name(#api_key #(#args),*)#dot_await,
    }
}

fn dispatch(ctx: &Ctx<'_>) -> TokenStream {
    let asyncness = ctx.asyncness();
    let arms = ctx.plan.tools.iter().map(|spec| dispatch_arm(ctx, spec));
    quote! {
        /// Calls a generated tool by name with JSON arguments.
        pub #asyncness fn call_tool(name: &str, args: &Value, api_key: Option<&str>) -> ToolResult {
            match name {
                #(#arms)*
                _ => Err(ToolError::UnknownTool(name.to_string())),
            }
        }
    }
}

fn stdio(ctx: &Ctx<'_>) -> TokenStream {
    let asyncness = ctx.asyncness();
    let dot_await = ctx.dot_await();
    let server_name = format!("toolsmith-{}", ctx.plan.kind.as_str());

    let custom_call = if ctx.is_async() {
        quote!(run_tool(tool.name, api_key, None, None, move || (tool.handler)(arguments)).await)
    } else {
        quote!(run_tool(tool.name, api_key, None, None, move || (tool.handler)(arguments)))
    };

    let serve = if ctx.is_async() {
        quote! {
            /// Serves newline-delimited JSON-RPC on stdin/stdout until EOF.
            pub async fn serve_stdio(custom: Vec<CustomTool>) -> std::io::Result<()> {
                use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

                let custom = checked_custom(custom);
                tracing::info!(
                    source_type = SOURCE_TYPE,
                    tools = TOOLS.len() + custom.len(),
                    "Serving tools over stdio"
                );
                let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
                let mut stdout = tokio::io::stdout();
                while let Some(line) = lines.next_line().await? {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Some(response) = handle_message(&line, &custom).await {
                        stdout.write_all(format!("{}\n", response).as_bytes()).await?;
                        stdout.flush().await?;
                    }
                }
                Ok(())
            }
        }
    } else {
        quote! {
            /// Serves newline-delimited JSON-RPC on stdin/stdout until EOF.
            pub fn serve_stdio(custom: Vec<CustomTool>) -> std::io::Result<()> {
                use std::io::{BufRead, Write};

                let custom = checked_custom(custom);
                tracing::info!(
                    source_type = SOURCE_TYPE,
                    tools = TOOLS.len() + custom.len(),
                    "Serving tools over stdio"
                );
                let stdin = std::io::stdin();
                let mut stdout = std::io::stdout();
                for line in stdin.lock().lines() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Some(response) = handle_message(&line, &custom) {
                        writeln!(stdout, "{}", response)?;
                        stdout.flush()?;
                    }
                }
                Ok(())
            }
        }
    };

    quote! {
        pub const PROTOCOL_VERSION: &str = "2024-11-05";

        /// Drops custom tools whose names clash with generated ones.
        fn checked_custom(custom: Vec<CustomTool>) -> Vec<CustomTool> {
            custom
                .into_iter()
                .filter(|tool| {
                    let clash = TOOLS.iter().any(|t| t.name == tool.name);
                    if clash {
                        tracing::warn!(tool = tool.name, "Custom tool shadows a generated tool; ignored");
                    }
                    !clash
                })
                .collect()
        }

        fn rpc_success(id: Value, result: Value) -> Value {
            json!({"jsonrpc": "2.0", "id": id, "result": result})
        }

        fn rpc_error(id: Value, code: i64, message: String) -> Value {
            json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
        }

        /// MCP tool result wrapping a successful value.
        fn tool_content(value: Value) -> Value {
            let structured = if value.is_object() { value.clone() } else { json!({"result": value}) };
            json!({
                "content": [{"type": "text", "text": value.to_string()}],
                "structuredContent": structured,
                "isError": false,
            })
        }

        #asyncness fn handle_tools_call(params: &Value, custom: &[CustomTool]) -> ToolResult {
            let name = params
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| ToolError::InvalidArgument("missing tool name".to_string()))?;
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
            let api_key = params.pointer("/_meta/api_key").and_then(Value::as_str);
            if let Some(tool) = custom.iter().find(|t| t.name == name) {
                return #custom_call;
            }
            call_tool(name, &arguments, api_key)#dot_await
        }

        #asyncness fn handle_resources_read(params: &Value) -> ToolResult {
            let uri = params
                .get("uri")
                .and_then(Value::as_str)
                .ok_or_else(|| ToolError::InvalidArgument("missing resource uri".to_string()))?;
            let resource = RESOURCES
                .iter()
                .find(|r| r.uri == uri)
                .ok_or_else(|| ToolError::InvalidArgument(format!("unknown resource {}", uri)))?;
            let api_key = params.pointer("/_meta/api_key").and_then(Value::as_str);
            let read = call_tool(resource.tool, &json!({}), api_key)#dot_await?;
            Ok(json!({
                "contents": [{
                    "uri": resource.uri,
                    "mimeType": resource.mime_type,
                    "text": read.get("content").cloned().unwrap_or(Value::Null),
                }]
            }))
        }

        /// Handles one JSON-RPC message. Notifications get no response.
        #asyncness fn handle_message(line: &str, custom: &[CustomTool]) -> Option<Value> {
            let request: Value = match serde_json::from_str(line) {
                Ok(request) => request,
                Err(e) => return Some(rpc_error(Value::Null, -32700, format!("parse error: {}", e))),
            };
            let id = request.get("id").cloned();
            let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
            let params = request.get("params").cloned().unwrap_or(Value::Null);

            let outcome: Result<Value, (i64, String)> = match method {
                "initialize" => Ok(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": {"name": #server_name, "version": env!("CARGO_PKG_VERSION")},
                    "capabilities": {"tools": {"listChanged": false}, "resources": {}},
                })),
                "notifications/initialized" | "initialized" => return None,
                "ping" => Ok(json!({})),
                "tools/list" => {
                    let mut tools = tool_catalog();
                    tools.extend(
                        custom
                            .iter()
                            .map(|t| tool_json(t.name, t.description, t.input_schema.clone(), false)),
                    );
                    Ok(json!({"tools": tools}))
                }
                "tools/call" => handle_tools_call(&params, custom)#dot_await
                    .map(tool_content)
                    .map_err(|e| (e.code(), e.to_string())),
                "resources/list" => Ok(json!({"resources": resource_catalog()})),
                "resources/read" => handle_resources_read(&params)#dot_await.map_err(|e| (e.code(), e.to_string())),
                other => Err((-32601, format!("method not found: {}", other))),
            };

            let id = id?;
            Some(match outcome {
                Ok(result) => rpc_success(id, result),
                Err((code, message)) => {
                    tracing::debug!(method, code, error = %message, "Request failed");
                    rpc_error(id, code, message)
                }
            })
        }

        #serve
    }
}
