use thiserror::Error;

use crate::database::StoreError;

pub type Result<T> = std::result::Result<T, SevaiError>;

#[derive(Error, Debug)]
pub enum SevaiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Document error: {0}")]
    Document(String),

    #[error("Vector store error: {0}")]
    Store(#[from] StoreError),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod chat;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod generation;
pub mod indexer;
pub mod loader;
pub mod retriever;

#[cfg(test)]
mod testing;
