//! pipehook CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "pipehook")]
#[command(about = "Validate and convert pipehook definitions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a pipeline definition
    Validate {
        /// Path to the definition file
        #[arg(default_value = ".pipehook.kdl")]
        path: PathBuf,
        /// Print the definition in canonical form
        #[arg(long)]
        render: bool,
    },
    /// Convert a definition and a webhook payload into a PipelineRun
    Convert {
        /// Path to the definition file
        #[arg(long, default_value = ".pipehook.kdl")]
        definition: PathBuf,
        /// Path to a GitHub webhook payload (JSON)
        #[arg(long)]
        event: PathBuf,
        /// Value of the X-GitHub-Event header
        #[arg(long, default_value = "push")]
        event_type: String,
        /// Delivery id to annotate the run with (generated when omitted)
        #[arg(long)]
        delivery_id: Option<String>,
        /// Claim name to bind the source workspace to
        #[arg(long, default_value = "pipehook-volume-local")]
        volume: String,
        /// Server configuration file (KDL)
        #[arg(long, env = "PIPEHOOK_CONFIG")]
        config: Option<PathBuf>,
        /// Namespace override
        #[arg(long, env = "PIPEHOOK_NAMESPACE")]
        namespace: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path, render } => {
            commands::validate(&path, render)?;
        }
        Commands::Convert {
            definition,
            event,
            event_type,
            delivery_id,
            volume,
            config,
            namespace,
        } => {
            commands::convert(commands::ConvertArgs {
                definition,
                event,
                event_type,
                delivery_id,
                volume,
                config,
                namespace,
            })?;
        }
    }

    Ok(())
}
