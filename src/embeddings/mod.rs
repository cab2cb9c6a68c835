// Embeddings module
// Ollama embedding client and document chunking

pub mod chunking;
pub mod ollama;

use anyhow::Result;
use async_trait::async_trait;

pub use chunking::{ChunkMetadata, ChunkingConfig, DocumentChunk, chunk_document, split_text};
pub use ollama::{DEFAULT_EMBEDDING_DIMENSION, OllamaClient};

/// Turns text into fixed-length vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every vector this embedder produces
    fn dimension(&self) -> usize;

    /// Embed document texts, one vector per input in input order
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}
