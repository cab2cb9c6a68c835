use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sevai_chat::Result;
use sevai_chat::commands::{CommandStatus, ask, ingest, run_chat, search, show_status};
use sevai_chat::config::{get_config_dir, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "sevai-chat")]
#[command(
    about = "Chat with the Tamil Nadu e-Sevai services guide using retrieval-augmented generation"
)]
#[command(version)]
struct Cli {
    /// Directory holding config.toml, defaults to the user config directory
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Starts an interactive chat when omitted
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the document, Ollama and vector store settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Start an interactive chat session
    Chat,
    /// Answer a single question and exit
    Ask {
        /// Question about the document
        question: String,
    },
    /// Show the chunks most similar to a query
    Search {
        /// Text to search for
        query: String,
        /// Number of chunks to return
        #[arg(short, long, default_value_t = 3)]
        k: usize,
    },
    /// Index the document into the vector store
    Ingest {
        /// Delete the collection first and rebuild it
        #[arg(long)]
        recreate: bool,
    },
    /// Show connectivity to Ollama and the vector store
    Status,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = get_config_dir(cli.config_dir.as_deref()).map_err(anyhow::Error::from)?;

    let status = match cli.command.unwrap_or(Commands::Chat) {
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
            CommandStatus::Done
        }
        Commands::Chat => run_chat(&config_dir).await?,
        Commands::Ask { question } => ask(&config_dir, &question).await?,
        Commands::Search { query, k } => {
            search(&config_dir, &query, k).await?;
            CommandStatus::Done
        }
        Commands::Ingest { recreate } => {
            ingest(&config_dir, recreate).await?;
            CommandStatus::Done
        }
        Commands::Status => {
            show_status(&config_dir).await?;
            CommandStatus::Done
        }
    };

    Ok(status.into())
}
