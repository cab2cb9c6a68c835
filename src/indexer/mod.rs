// Indexer module
// Ensures the document collection exists, ingesting the PDF the first time


use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::SevaiError;
use crate::config::Config;
use crate::database::{EmbeddedChunk, StoreError, VectorStore};
use crate::embeddings::Embedder;
use crate::embeddings::chunking::{ChunkingConfig, chunk_document};
use crate::loader::load_pdf;
use crate::retriever::Retriever;

/// Progress reported while connecting to or populating the collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEvent {
    Connecting { name: String },
    DocumentLoaded { pages: usize },
    Split { chunks: usize },
    CreatingCollection { name: String, dimension: usize },
    BatchEmbedded { done: usize, total: usize },
    Populated { chunks: usize },
    ConnectedExisting { name: String, points: Option<u64> },
    CreatedConcurrently { name: String },
}

/// How the collection was bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The collection was already there; nothing was ingested
    Existing,
    /// The collection was created and filled with this many chunks
    Created { chunks: usize },
    /// Another process created the collection between our check and create
    CreatedConcurrently,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub collection: String,
    pub outcome: IndexOutcome,
}

pub type ProgressFn<'a> = dyn FnMut(&IndexEvent) + Send + 'a;

/// Builds or connects the collection for a single source document
pub struct IndexBuilder {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    document_path: PathBuf,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl IndexBuilder {
    #[inline]
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        document_path: PathBuf,
    ) -> Self {
        Self {
            store,
            embedder,
            document_path,
            chunking: ChunkingConfig::default(),
            batch_size: 16,
        }
    }

    /// Builder wired from the document, chunking and batch settings of `config`
    #[inline]
    pub fn from_config(
        config: &Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self::new(store, embedder, config.document_path())
            .with_chunking(config.chunking.clone())
            .with_batch_size(config.ollama.batch_size as usize)
    }

    #[inline]
    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    #[inline]
    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Connect to the collection, creating and populating it when it does not exist.
    ///
    /// Only `StoreError::NotFound` leads to creation. Any other metadata
    /// failure is returned unchanged.
    pub async fn ensure(&self, progress: &mut ProgressFn<'_>) -> crate::Result<IndexReport> {
        let collection = self.store.collection_name().to_string();
        let dimension = self.embedder.dimension();
        progress(&IndexEvent::Connecting {
            name: collection.clone(),
        });

        match self.store.collection_info().await {
            Ok(info) => {
                if let Some(actual) = info.dimension.filter(|&actual| actual != dimension) {
                    return Err(StoreError::DimensionMismatch {
                        collection,
                        expected: dimension,
                        actual,
                    }
                    .into());
                }

                info!("Connected to existing collection '{}'", collection);
                progress(&IndexEvent::ConnectedExisting {
                    name: collection.clone(),
                    points: info.points,
                });
                Ok(IndexReport {
                    collection,
                    outcome: IndexOutcome::Existing,
                })
            }
            Err(StoreError::NotFound(_)) => {
                info!(
                    "Collection '{}' not found, indexing {}",
                    collection,
                    self.document_path.display()
                );
                self.create_and_populate(collection, dimension, progress)
                    .await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the collection (if any) and build it again from the document
    pub async fn recreate(&self, progress: &mut ProgressFn<'_>) -> crate::Result<IndexReport> {
        match self.store.delete_collection().await {
            Ok(()) => info!("Deleted collection '{}'", self.store.collection_name()),
            Err(StoreError::NotFound(_)) => {
                debug!("Collection '{}' did not exist", self.store.collection_name());
            }
            Err(e) => return Err(e.into()),
        }

        self.ensure(progress).await
    }

    async fn create_and_populate(
        &self,
        collection: String,
        dimension: usize,
        progress: &mut ProgressFn<'_>,
    ) -> crate::Result<IndexReport> {
        let document = load_pdf(&self.document_path)?;
        progress(&IndexEvent::DocumentLoaded {
            pages: document.pages.len(),
        });

        let chunks = chunk_document(&document, &self.chunking);
        progress(&IndexEvent::Split {
            chunks: chunks.len(),
        });
        if chunks.is_empty() {
            warn!("'{}' contains no extractable text", document.source);
        }

        progress(&IndexEvent::CreatingCollection {
            name: collection.clone(),
            dimension,
        });
        match self.store.create_collection(dimension).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(_)) => {
                warn!(
                    "Collection '{}' was created by another process, binding without ingesting",
                    collection
                );
                progress(&IndexEvent::CreatedConcurrently {
                    name: collection.clone(),
                });
                return Ok(IndexReport {
                    collection,
                    outcome: IndexOutcome::CreatedConcurrently,
                });
            }
            Err(e) => return Err(e.into()),
        }

        let total = chunks.len();
        let mut done = 0;
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self
                .embedder
                .embed_documents(&texts)
                .await
                .map_err(|e| SevaiError::Embedding(format!("{e:#}")))?;

            if vectors.len() != batch.len() {
                return Err(SevaiError::Embedding(format!(
                    "Expected {} embeddings, received {}",
                    batch.len(),
                    vectors.len()
                )));
            }

            let points = batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, vector)| EmbeddedChunk::new(chunk, vector))
                .collect();
            self.store.upsert(points).await?;

            done += batch.len();
            debug!("Indexed {}/{} chunks", done, total);
            progress(&IndexEvent::BatchEmbedded { done, total });
        }

        info!("Populated collection '{}' with {} chunks", collection, total);
        progress(&IndexEvent::Populated { chunks: total });

        Ok(IndexReport {
            collection,
            outcome: IndexOutcome::Created { chunks: total },
        })
    }
}

/// Process-wide index handle; the collection is ensured at most once
pub struct SharedIndex {
    builder: IndexBuilder,
    ready: OnceCell<IndexReport>,
}

impl SharedIndex {
    #[inline]
    pub fn new(builder: IndexBuilder) -> Self {
        Self {
            builder,
            ready: OnceCell::new(),
        }
    }

    /// Ensure the collection once; later calls return the first report.
    ///
    /// A failed attempt is not memoized, so the next call tries again.
    pub async fn ensure(&self, progress: &mut ProgressFn<'_>) -> crate::Result<&IndexReport> {
        self.ready
            .get_or_try_init(|| self.builder.ensure(progress))
            .await
    }

    #[inline]
    pub fn report(&self) -> Option<&IndexReport> {
        self.ready.get()
    }

    /// Retriever over the collection; `None` until `ensure` has succeeded
    #[inline]
    pub fn retriever(&self) -> Option<Retriever> {
        self.ready.get().map(|_| {
            Retriever::new(
                Arc::clone(self.builder.store()),
                Arc::clone(self.builder.embedder()),
            )
        })
    }
}
