// Retriever
// Top-k similarity search over the document collection


use std::sync::Arc;

use tracing::debug;

use crate::SevaiError;
use crate::database::{ScoredChunk, VectorStore};
use crate::embeddings::Embedder;

pub const DEFAULT_TOP_K: usize = 3;

#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    #[inline]
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Up to `k` chunks most similar to `query`, best match first
    pub async fn search(&self, query: &str, k: usize) -> crate::Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = self
            .embedder
            .embed_query(query)
            .await
            .map_err(|e| SevaiError::Embedding(format!("{e:#}")))?;

        let mut results = self.store.search(&vector, k).await?;
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(k);

        debug!(
            "Retrieved {} chunks from '{}' for query of {} chars",
            results.len(),
            self.store.collection_name(),
            query.chars().count()
        );
        Ok(results)
    }
}
