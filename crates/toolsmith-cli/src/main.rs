use clap::{Parser, Subcommand};
use toolsmith_connectors::ConnectorRegistry;

mod commands;
mod options;

use options::{ConfigArgs, OutputArgs, SourceArgs};

#[derive(Parser, Debug)]
#[command(name = "toolsmith", version, about = "Generate tool servers from data sources")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect sources and write a tool server into an output directory.
    ///
    /// The tools module is rewritten on every run; an existing entry point is
    /// left untouched.
    Init {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Inspect sources and print their schema and the tools they would produce.
    Inspect {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        config: ConfigArgs,

        /// Save the inspected schema as a snapshot (`*.schema.json`)
        #[arg(long)]
        snapshot: Option<std::path::PathBuf>,

        /// Print the schema as JSON instead of a summary
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Compare sources against the lock file of a previous generation.
    Diff {
        #[command(flatten)]
        source: SourceArgs,

        /// Directory holding the previous generation
        #[arg(long, short, default_value = ".")]
        output: std::path::PathBuf,
    },

    /// List the URI schemes the built-in connectors accept.
    Connectors,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let registry = ConnectorRegistry::with_builtin();

    match cli.cmd {
        Command::Init {
            source,
            config,
            output,
        } => commands::init::run(&registry, &source, &config, &output).await?,
        Command::Inspect {
            source,
            config,
            snapshot,
            json,
        } => commands::inspect::run(&registry, &source, &config, snapshot.as_deref(), json).await?,
        Command::Diff { source, output } => commands::diff::run(&registry, &source, &output).await?,
        Command::Connectors => {
            for connector in registry.connectors() {
                println!("{:<10} {}", connector.name(), connector.schemes().join(", "));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_init_arguments() {
        let cli = Cli::try_parse_from([
            "toolsmith",
            "init",
            "app.db",
            "--output",
            "server",
            "--ops",
            "read,insert",
            "--async",
        ])
        .unwrap();
        match cli.cmd {
            Command::Init { source, config, output } => {
                assert_eq!(source.sources, vec!["app.db"]);
                assert_eq!(output.output, std::path::PathBuf::from("server"));
                assert!(config.async_mode);
                assert_eq!(config.ops.as_deref(), Some("read,insert"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
