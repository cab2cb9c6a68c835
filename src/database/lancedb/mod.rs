// LanceDB vector database module
// Local, embedded alternative to Qdrant: one table per collection


use std::path::Path;
use std::sync::Arc;

use ::lancedb::query::{ExecutableQuery, QueryBase};
use ::lancedb::{Connection, DistanceType};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use tracing::{debug, info};

use super::{CollectionInfo, EmbeddedChunk, ScoredChunk, StoreError, VectorStore};
use crate::embeddings::chunking::{ChunkMetadata, DocumentChunk};

/// Vector store backed by a LanceDB directory
pub struct LanceStore {
    connection: Connection,
    table_name: String,
}

impl LanceStore {
    /// Connect to (and create if needed) the database directory at `path`
    #[inline]
    pub async fn open(path: &Path, collection: &str) -> Result<Self, StoreError> {
        debug!("Opening LanceDB at path: {:?}", path);

        std::fs::create_dir_all(path).map_err(|e| {
            StoreError::Backend(format!("Failed to create vector database directory: {e}"))
        })?;

        let uri = format!("file://{}", path.display());
        let connection = ::lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect to LanceDB: {e}")))?;

        Ok(Self {
            connection,
            table_name: collection.to_string(),
        })
    }

    async fn table_exists(&self) -> Result<bool, StoreError> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to list tables: {e}")))?;
        Ok(table_names.contains(&self.table_name))
    }

    async fn open_table(&self) -> Result<::lancedb::Table, StoreError> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| self.map_error("Failed to open table", e))
    }

    fn map_error(&self, context: &str, error: ::lancedb::Error) -> StoreError {
        match error {
            ::lancedb::Error::TableNotFound { .. } => StoreError::NotFound(self.table_name.clone()),
            ::lancedb::Error::TableAlreadyExists { .. } => {
                StoreError::AlreadyExists(self.table_name.clone())
            }
            other => StoreError::Backend(format!("{context}: {other}")),
        }
    }

    async fn table_dimension(&self, table: &::lancedb::Table) -> Result<Option<usize>, StoreError> {
        let schema = table
            .schema()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to get table schema: {e}")))?;

        Ok(schema
            .field_with_name("vector")
            .ok()
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => Some(*size as usize),
                _ => None,
            }))
    }
}

/// Schema for a collection of `vector_dim`-dimensional chunks
fn create_schema(vector_dim: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                vector_dim as i32,
            ),
            false,
        ),
        Field::new("page_content", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("page", DataType::UInt32, false),
        Field::new("chunk_index", DataType::UInt32, false),
        Field::new("start_char", DataType::UInt32, false),
        Field::new("end_char", DataType::UInt32, false),
        Field::new("created_at", DataType::Utf8, false),
    ]))
}

fn create_record_batch(
    points: &[EmbeddedChunk],
    vector_dim: usize,
) -> Result<RecordBatch, StoreError> {
    let len = points.len();
    let created_at = chrono::Utc::now().to_rfc3339();

    let mut ids = Vec::with_capacity(len);
    let mut flat_values = Vec::with_capacity(len * vector_dim);
    let mut contents = Vec::with_capacity(len);
    let mut sources = Vec::with_capacity(len);
    let mut pages = Vec::with_capacity(len);
    let mut chunk_indices = Vec::with_capacity(len);
    let mut starts = Vec::with_capacity(len);
    let mut ends = Vec::with_capacity(len);

    for point in points {
        if point.vector.len() != vector_dim {
            return Err(StoreError::Backend(format!(
                "Vector has {} dimensions, table expects {}",
                point.vector.len(),
                vector_dim
            )));
        }
        let metadata = &point.chunk.metadata;
        ids.push(point.id.to_string());
        flat_values.extend_from_slice(&point.vector);
        contents.push(point.chunk.content.as_str());
        sources.push(metadata.source.as_str());
        pages.push(metadata.page);
        chunk_indices.push(metadata.chunk_index);
        starts.push(metadata.start_char);
        ends.push(metadata.end_char);
    }

    let values_array = Float32Array::from(flat_values);
    let field = Arc::new(Field::new("item", DataType::Float32, false));
    let vector_array =
        FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(values_array), None)
            .map_err(|e| StoreError::Backend(format!("Failed to create vector array: {e}")))?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(vector_array),
        Arc::new(StringArray::from(contents)),
        Arc::new(StringArray::from(sources)),
        Arc::new(UInt32Array::from(pages)),
        Arc::new(UInt32Array::from(chunk_indices)),
        Arc::new(UInt32Array::from(starts)),
        Arc::new(UInt32Array::from(ends)),
        Arc::new(StringArray::from(vec![created_at.as_str(); len])),
    ];

    RecordBatch::try_new(create_schema(vector_dim), arrays)
        .map_err(|e| StoreError::Backend(format!("Failed to create record batch: {e}")))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, StoreError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| StoreError::Backend(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| StoreError::Backend(format!("Invalid {name} column type")))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array, StoreError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| StoreError::Backend(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| StoreError::Backend(format!("Invalid {name} column type")))
}

/// Parse one batch of search results; cosine distance becomes `1 - distance`
fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<ScoredChunk>, StoreError> {
    let contents = string_column(batch, "page_content")?;
    let sources = string_column(batch, "source")?;
    let pages = u32_column(batch, "page")?;
    let chunk_indices = u32_column(batch, "chunk_index")?;
    let starts = u32_column(batch, "start_char")?;
    let ends = u32_column(batch, "end_char")?;
    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    let mut results = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let distance = distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });
        results.push(ScoredChunk {
            chunk: DocumentChunk {
                content: contents.value(row).to_string(),
                metadata: ChunkMetadata {
                    source: sources.value(row).to_string(),
                    page: pages.value(row),
                    chunk_index: chunk_indices.value(row),
                    start_char: starts.value(row),
                    end_char: ends.value(row),
                },
            },
            score: 1.0 - distance,
        });
    }

    Ok(results)
}

#[async_trait]
impl VectorStore for LanceStore {
    fn collection_name(&self) -> &str {
        &self.table_name
    }

    async fn collection_info(&self) -> Result<CollectionInfo, StoreError> {
        if !self.table_exists().await? {
            return Err(StoreError::NotFound(self.table_name.clone()));
        }

        let table = self.open_table().await?;
        let dimension = self.table_dimension(&table).await?;
        let points = table
            .count_rows(None)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to count rows: {e}")))?;

        Ok(CollectionInfo {
            name: self.table_name.clone(),
            dimension,
            points: Some(points as u64),
        })
    }

    async fn create_collection(&self, dimension: usize) -> Result<(), StoreError> {
        if self.table_exists().await? {
            return Err(StoreError::AlreadyExists(self.table_name.clone()));
        }

        self.connection
            .create_empty_table(&self.table_name, create_schema(dimension))
            .execute()
            .await
            .map_err(|e| self.map_error("Failed to create table", e))?;

        info!(
            "Created LanceDB table '{}' with {} dimensions",
            self.table_name, dimension
        );
        Ok(())
    }

    async fn delete_collection(&self) -> Result<(), StoreError> {
        if !self.table_exists().await? {
            return Err(StoreError::NotFound(self.table_name.clone()));
        }

        self.connection
            .drop_table(&self.table_name)
            .await
            .map_err(|e| self.map_error("Failed to drop table", e))?;

        info!("Dropped LanceDB table '{}'", self.table_name);
        Ok(())
    }

    async fn upsert(&self, points: Vec<EmbeddedChunk>) -> Result<(), StoreError> {
        if points.is_empty() {
            debug!("No points to store");
            return Ok(());
        }

        let table = self.open_table().await?;
        let vector_dim = self
            .table_dimension(&table)
            .await?
            .ok_or_else(|| StoreError::Backend("Table has no vector column".to_string()))?;

        let record_batch = create_record_batch(&points, vector_dim)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to insert points: {e}")))?;

        debug!("Stored {} points in '{}'", points.len(), self.table_name);
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        debug!("Searching '{}' with limit: {}", self.table_name, limit);

        let table = self.open_table().await?;
        let mut stream = table
            .vector_search(vector)
            .map_err(|e| StoreError::Backend(format!("Failed to create vector search: {e}")))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to execute search: {e}")))?;

        let mut results = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to read result stream: {e}")))?
        {
            results.extend(parse_search_batch(&batch)?);
        }

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(limit);
        Ok(results)
    }
}
