use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use super::Ctx;

/// The user-owned entry point. Written once; later generations leave it alone.
pub fn entry_point(ctx: &Ctx<'_>, stem: &str) -> TokenStream {
    let module = format_ident!("autogen_{}", stem);
    let summary = format!(" Tool server for a {} source.", ctx.plan.kind.as_str());
    let ownership = format!(
        " Created once by toolsmith and never overwritten. Generated tools live in `autogen_{}.rs`, which is rewritten on every generation.",
        stem
    );

    let main = if ctx.is_async() {
        quote! {
            #[tokio::main]
            async fn main() -> std::io::Result<()> {
                init_tracing();
                #module::serve_stdio(custom_tools()).await
            }
        }
    } else {
        quote! {
            fn main() -> std::io::Result<()> {
                init_tracing();
                #module::serve_stdio(custom_tools())
            }
        }
    };

    quote! {
        #![doc = #summary]
        #![doc = ""]
        #![doc = #ownership]

        mod #module;

        use #module::CustomTool;

        /// Hand-written tools served next to the generated ones. Names that
        /// clash with generated tools are ignored.
        fn custom_tools() -> Vec<CustomTool> {
            Vec::new()
        }

        /// Logs go to stderr; stdout carries the protocol.
        fn init_tracing() {
            let filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }

        #main
    }
}
