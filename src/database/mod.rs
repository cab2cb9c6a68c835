// Database module
// Vector collection backends: remote Qdrant and local LanceDB

pub mod lancedb;
pub mod qdrant;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{Config, StoreBackend};
use crate::embeddings::chunking::DocumentChunk;

pub use self::lancedb::LanceStore;
pub use self::qdrant::QdrantStore;

/// Failure kinds a vector store can report.
///
/// `NotFound` and `AlreadyExists` are expected outcomes of the
/// create-if-absent flow; everything else is a real failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Collection '{0}' does not exist")]
    NotFound(String),

    #[error("Collection '{0}' already exists")]
    AlreadyExists(String),

    #[error("Vector store rejected the credentials (HTTP {0})")]
    Unauthorized(u16),

    #[error("Collection '{collection}' stores {actual}-dimensional vectors but {expected} were expected")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("Could not reach the vector store: {0}")]
    Transport(String),

    #[error("Vector store error: {0}")]
    Backend(String),
}

/// Metadata about an existing collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    /// Vector size, when the backend reports it
    pub dimension: Option<usize>,
    pub points: Option<u64>,
}

/// A chunk paired with its embedding, ready for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub chunk: DocumentChunk,
}

impl EmbeddedChunk {
    #[inline]
    pub fn new(chunk: DocumentChunk, vector: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            vector,
            chunk,
        }
    }
}

/// A search hit; higher `score` means more similar
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// A named collection of (chunk, vector) pairs searchable by cosine similarity
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn collection_name(&self) -> &str;

    /// Fetch collection metadata, `StoreError::NotFound` when absent
    async fn collection_info(&self) -> Result<CollectionInfo, StoreError>;

    /// Create the collection with cosine distance.
    ///
    /// Never replaces an existing collection: reports
    /// `StoreError::AlreadyExists` instead.
    async fn create_collection(&self, dimension: usize) -> Result<(), StoreError>;

    /// Delete the collection, `StoreError::NotFound` when absent
    async fn delete_collection(&self) -> Result<(), StoreError>;

    async fn upsert(&self, points: Vec<EmbeddedChunk>) -> Result<(), StoreError>;

    /// Up to `limit` nearest chunks, most similar first
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>, StoreError>;
}

/// Open the backend selected in the configuration
#[inline]
pub async fn open_store(config: &Config) -> Result<Arc<dyn VectorStore>, StoreError> {
    match config.store.backend {
        StoreBackend::Qdrant => Ok(Arc::new(QdrantStore::new(
            &config.store,
            config.ollama.timeout_seconds,
        )?)),
        StoreBackend::Lancedb => Ok(Arc::new(
            LanceStore::open(&config.vector_database_path(), &config.store.collection).await?,
        )),
    }
}
