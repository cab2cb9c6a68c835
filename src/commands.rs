use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

use crate::chat::{ChatSession, ChatUi, TerminalUi, TurnState};
use crate::config::{Config, StoreBackend};
use crate::database::{StoreError, VectorStore, open_store};
use crate::embeddings::{Embedder, OllamaClient};
use crate::generation::{CompletionService, OllamaChat};
use crate::indexer::{IndexBuilder, IndexOutcome, SharedIndex};
use crate::retriever::Retriever;

/// How an interactive command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Done,
    /// A failure was already shown to the user and needs no further report
    FailureShown,
}

impl From<CommandStatus> for ExitCode {
    #[inline]
    fn from(status: CommandStatus) -> Self {
        match status {
            CommandStatus::Done => Self::SUCCESS,
            CommandStatus::FailureShown => Self::FAILURE,
        }
    }
}

#[inline]
pub fn load_config(config_dir: &Path) -> Result<Config> {
    Config::load(config_dir)
        .with_context(|| format!("Failed to load configuration from {}", config_dir.display()))
}

/// Wire the configured store and embedding client into an index builder
pub async fn build_index(config: &Config) -> Result<IndexBuilder> {
    let store = open_store(config)
        .await
        .context("Failed to open vector store")?;
    let embedder =
        OllamaClient::new(&config.ollama).context("Failed to initialize Ollama client")?;

    Ok(IndexBuilder::from_config(
        config,
        store,
        Arc::new(embedder) as Arc<dyn Embedder>,
    ))
}

async fn build_session(config: &Config) -> Result<ChatSession> {
    let index = Arc::new(SharedIndex::new(build_index(config).await?));
    let completion = OllamaChat::new(&config.ollama).context("Failed to initialize chat client")?;

    Ok(ChatSession::new(
        index,
        Arc::new(completion) as Arc<dyn CompletionService>,
        config.chat.clone(),
    ))
}

/// Interactive chat until `/exit`, `/quit` or end of input
pub async fn run_chat(config_dir: &Path) -> Result<CommandStatus> {
    let config = load_config(config_dir)?;
    info!("Starting chat session over {}", config.document.path.display());

    let mut session = build_session(&config).await?;
    let mut ui = TerminalUi::new(&config.chat.input_prompt);
    if session.start(&mut ui).await.is_err() {
        return Ok(CommandStatus::FailureShown);
    }
    session.chat(&mut ui).await?;

    Ok(CommandStatus::Done)
}

/// Answer a single question and exit
pub async fn ask(config_dir: &Path, question: &str) -> Result<CommandStatus> {
    let config = load_config(config_dir)?;
    let mut session = build_session(&config).await?;
    let mut ui = TerminalUi::new(&config.chat.input_prompt);

    if session.start(&mut ui).await.is_err() {
        return Ok(CommandStatus::FailureShown);
    }
    let report = session.handle_turn(&mut ui, question).await;

    if report.state == TurnState::RenderedWithError {
        return Ok(CommandStatus::FailureShown);
    }
    Ok(CommandStatus::Done)
}

/// Print the chunks retrieved for `query` with their similarity scores
pub async fn search(config_dir: &Path, query: &str, limit: usize) -> Result<()> {
    let config = load_config(config_dir)?;
    let index = SharedIndex::new(build_index(&config).await?);
    let mut ui = TerminalUi::new(&config.chat.input_prompt);

    index.ensure(&mut |event| ui.index_event(event)).await?;
    let retriever: Retriever = index
        .retriever()
        .context("Index is not ready after initialization")?;

    let results = retriever.search(query, limit).await?;
    if results.is_empty() {
        println!("No results found for: {}", style(query).cyan());
        return Ok(());
    }

    println!();
    println!(
        "🔎 {} results for: {}",
        results.len(),
        style(query).cyan().bold()
    );
    for (rank, result) in results.iter().enumerate() {
        let metadata = &result.chunk.metadata;
        println!();
        println!(
            "{} {} (page {}, chunk {})",
            style(format!("{}.", rank + 1)).bold(),
            style(format!("score {:.3}", result.score)).green(),
            metadata.page,
            metadata.chunk_index
        );
        println!("{}", result.chunk.preview(config.chat.preview_chars));
    }

    Ok(())
}

/// Build the collection if missing, or rebuild it from scratch with `recreate`
pub async fn ingest(config_dir: &Path, recreate: bool) -> Result<()> {
    let config = load_config(config_dir)?;
    let builder = build_index(&config).await?;
    let mut ui = TerminalUi::new(&config.chat.input_prompt);

    let report = if recreate {
        warn!(
            "Recreating collection '{}' from {}",
            config.store.collection,
            config.document.path.display()
        );
        builder.recreate(&mut |event| ui.index_event(event)).await?
    } else {
        builder.ensure(&mut |event| ui.index_event(event)).await?
    };

    match report.outcome {
        IndexOutcome::Created { chunks } => {
            println!("✅ Indexed {} chunks into '{}'", chunks, report.collection);
        }
        IndexOutcome::Existing => {
            println!(
                "Collection '{}' already exists. Use --recreate to rebuild it.",
                report.collection
            );
        }
        IndexOutcome::CreatedConcurrently => {
            println!(
                "Collection '{}' was created by another process.",
                report.collection
            );
        }
    }

    Ok(())
}

/// Connectivity report for Ollama and the vector store
pub async fn show_status(config_dir: &Path) -> Result<()> {
    let config = load_config(config_dir)?;

    println!("📊 Sevai Chat Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("📄 Document:");
    let path = config.document_path();
    if path.exists() {
        println!("   ✅ {}", path.display());
    } else {
        println!("   ❌ {} (not found)", path.display());
    }

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => {
            let chat_model = config.ollama.chat_model.clone();
            let checks = tokio::task::spawn_blocking(move || {
                (client.health_check(), client.validate_model(&chat_model))
            })
            .await
            .context("Ollama status check failed to complete")?;

            match checks {
                (Ok(()), Ok(())) => {
                    println!(
                        "   ✅ Ollama: Connected ({}:{})",
                        config.ollama.host, config.ollama.port
                    );
                    println!(
                        "   📋 Embedding Model: {}",
                        config.ollama.embedding_model
                    );
                    println!("   💬 Chat Model: {}", config.ollama.chat_model);
                }
                (Err(e), _) | (_, Err(e)) => {
                    println!("   ⚠️  Ollama: Unhealthy - {:#}", e);
                }
            }
        }
        Err(e) => {
            println!("   ❌ Ollama: Failed to initialize - {}", e);
        }
    }

    println!("🔍 Vector Store Status:");
    let location = match config.store.backend {
        StoreBackend::Qdrant => config.store.url.clone(),
        StoreBackend::Lancedb => config.vector_database_path().display().to_string(),
    };
    match open_store(&config).await {
        Ok(store) => report_collection(store.as_ref(), &config, &location).await,
        Err(e) => {
            println!(
                "   ❌ {}: Failed to connect to {} - {}",
                config.store.backend, location, e
            );
        }
    }

    Ok(())
}

async fn report_collection(store: &dyn VectorStore, config: &Config, location: &str) {
    match store.collection_info().await {
        Ok(info) => {
            println!(
                "   ✅ {}: Connected ({})",
                config.store.backend, location
            );
            println!(
                "   📦 Collection '{}': {} chunks, {} dimensions",
                info.name,
                info.points
                    .map_or_else(|| "unknown".to_string(), |p| p.to_string()),
                info.dimension
                    .map_or_else(|| "unknown".to_string(), |d| d.to_string())
            );
            if info
                .dimension
                .is_some_and(|d| d != config.embedding_dimension())
            {
                println!(
                    "   ⚠️  Configured embedding dimension is {}",
                    config.embedding_dimension()
                );
            }
        }
        Err(StoreError::NotFound(name)) => {
            println!(
                "   ✅ {}: Connected ({})",
                config.store.backend, location
            );
            println!(
                "   📭 Collection '{}' does not exist yet. Run `sevai-chat ingest`.",
                name
            );
        }
        Err(e) => {
            println!("   ❌ {}: {}", config.store.backend, e);
        }
    }
}
