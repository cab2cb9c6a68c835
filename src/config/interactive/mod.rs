
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::path::{Path, PathBuf};

use super::{Config, ConfigError, OllamaConfig, StoreBackend, StoreConfig};

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Sevai Chat Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir)?;

    eprintln!("{}", style("Source Document").bold().yellow());
    let document: String = Input::new()
        .with_prompt("PDF document path")
        .default(config.document.path.display().to_string())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Document path cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;
    config.document.path = PathBuf::from(document.trim());

    eprintln!();
    eprintln!("{}", style("Ollama Configuration").bold().yellow());
    eprintln!("Configure your local Ollama instance for embeddings and answers.");
    eprintln!();

    configure_ollama(&mut config.ollama)?;

    eprintln!();
    eprintln!("{}", style("Vector Store Configuration").bold().yellow());
    configure_store(&mut config.store)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but make sure Ollama is running before chatting.");
    }

    if config.store.backend == StoreBackend::Qdrant {
        if test_qdrant_connection(&config.store) {
            eprintln!("{}", style("✓ Qdrant connection successful!").green());
        } else {
            eprintln!(
                "{}",
                style("⚠ Warning: Could not connect to Qdrant").yellow()
            );
        }
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Document:").bold().yellow());
    eprintln!("  Path: {}", style(config.document.path.display()).cyan());

    eprintln!();
    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    eprintln!("  Host: {}", style(&config.ollama.host).cyan());
    eprintln!("  Port: {}", style(config.ollama.port).cyan());
    eprintln!(
        "  Embedding Model: {}",
        style(&config.ollama.embedding_model).cyan()
    );
    eprintln!("  Chat Model: {}", style(&config.ollama.chat_model).cyan());
    eprintln!(
        "  Embedding Dimension: {}",
        style(config.ollama.embedding_dimension).cyan()
    );
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Vector Store:").bold().yellow());
    eprintln!("  Backend: {}", style(config.store.backend).cyan());
    eprintln!("  Collection: {}", style(&config.store.collection).cyan());
    match config.store.backend {
        StoreBackend::Qdrant => {
            eprintln!("  URL: {}", style(&config.store.url).cyan());
            let key_state = if config.store.api_key.is_some() {
                "set"
            } else {
                "not set"
            };
            eprintln!("  API Key: {}", style(key_state).cyan());
        }
        StoreBackend::Lancedb => {
            eprintln!(
                "  Path: {}",
                style(config.vector_database_path().display()).cyan()
            );
        }
    }

    eprintln!();
    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!(
        "  Chunk Size / Overlap: {} / {}",
        style(config.chunking.chunk_size).cyan(),
        style(config.chunking.chunk_overlap).cyan()
    );
    eprintln!("  Top K: {}", style(config.chat.top_k).cyan());

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Result<Config> {
    let exists = config_dir.join(super::settings::CONFIG_FILE_NAME).exists();
    let config = Config::load(config_dir).or_else(|e| {
        eprintln!(
            "{}",
            style(format!("Existing configuration is invalid ({e}). Using defaults.")).yellow()
        );
        Ok::<_, anyhow::Error>(Config {
            base_dir: config_dir.to_path_buf(),
            ..Config::default()
        })
    })?;

    if exists {
        eprintln!("{}", style("Found existing configuration.").green());
    } else {
        eprintln!(
            "{}",
            style("No existing configuration found. Using defaults.").yellow()
        );
    }
    Ok(config)
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            temp_config.validate()?;
            Ok(())
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let embedding_model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.embedding_model.clone())
        .validate_with(non_empty_model)
        .interact_text()?;

    let chat_model: String = Input::new()
        .with_prompt("Chat model")
        .default(ollama.chat_model.clone())
        .validate_with(non_empty_model)
        .interact_text()?;

    let embedding_dimension: u32 = Input::new()
        .with_prompt("Embedding dimension")
        .default(ollama.embedding_dimension)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (64..=4096).contains(input) {
                Ok(())
            } else {
                Err("Dimension must be between 64 and 4096")
            }
        })
        .interact_text()?;

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding generation")
        .default(ollama.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_embedding_model(embedding_model)?;
    ollama.set_chat_model(chat_model)?;
    ollama.set_embedding_dimension(embedding_dimension)?;
    ollama.set_batch_size(batch_size)?;

    Ok(())
}

fn non_empty_model(input: &String) -> Result<(), &'static str> {
    if input.trim().is_empty() {
        Err("Model name cannot be empty")
    } else {
        Ok(())
    }
}

fn configure_store(store: &mut StoreConfig) -> Result<()> {
    let backends = &[StoreBackend::Qdrant, StoreBackend::Lancedb];
    let labels = &["qdrant (remote)", "lancedb (local directory)"];
    let default_index = backends
        .iter()
        .position(|&b| b == store.backend)
        .unwrap_or(0);

    let backend_index = Select::new()
        .with_prompt("Vector store backend")
        .default(default_index)
        .items(labels)
        .interact()?;
    store.backend = backends[backend_index];

    if store.backend == StoreBackend::Qdrant {
        store.url = Input::new()
            .with_prompt("Qdrant URL")
            .default(store.url.clone())
            .validate_with(|input: &String| -> Result<(), ConfigError> {
                url::Url::parse(input).map_err(|_| ConfigError::InvalidUrl(input.clone()))?;
                Ok(())
            })
            .interact_text()?;

        let api_key: String = Input::new()
            .with_prompt("Qdrant API key (leave empty for none)")
            .default(store.api_key.clone().unwrap_or_default())
            .allow_empty(true)
            .interact_text()?;
        store.api_key = Some(api_key.trim().to_string()).filter(|key| !key.is_empty());
    }

    store.collection = Input::new()
        .with_prompt("Collection name")
        .default(store.collection.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if !input.is_empty()
                && input
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                Ok(())
            } else {
                Err("Use letters, digits, '-' and '_' only")
            }
        })
        .interact_text()?;

    Ok(())
}

fn quick_agent() -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into()
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    match quick_agent().get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) => (400..500).contains(&code),
        Err(_) => false,
    }
}

fn test_qdrant_connection(store: &StoreConfig) -> bool {
    let url = format!("{}/collections", store.url.trim_end_matches('/'));
    let mut request = quick_agent().get(&url);
    if let Some(key) = &store.api_key {
        request = request.header("api-key", key);
    }
    request.call().is_ok()
}
