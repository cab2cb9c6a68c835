// Qdrant REST backend
// One collection per store, cosine distance, `api-key` header authentication


use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{CollectionInfo, EmbeddedChunk, ScoredChunk, StoreError, VectorStore};
use crate::config::StoreConfig;
use crate::embeddings::chunking::{ChunkMetadata, DocumentChunk};

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

#[derive(Debug, Clone)]
pub struct QdrantStore {
    base_url: String,
    api_key: Option<String>,
    collection: String,
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff_unit: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Put,
    Post,
    Delete,
}

#[derive(Debug)]
struct Reply {
    status: u16,
    body: String,
    /// 1-based attempt that produced this reply
    attempt: u32,
}

impl Reply {
    fn is_conflict(&self) -> bool {
        self.status == 409 || (self.status == 400 && self.body.contains("already exists"))
    }
}

#[derive(Debug, Serialize)]
struct CreateCollectionRequest {
    vectors: VectorParams,
}

#[derive(Debug, Serialize)]
struct VectorParams {
    size: usize,
    distance: &'static str,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    points: Vec<PointStruct<'a>>,
}

#[derive(Debug, Serialize)]
struct PointStruct<'a> {
    id: String,
    vector: &'a [f32],
    payload: PayloadRef<'a>,
}

/// Payload layout shared with collections written by LangChain's Qdrant wrapper
#[derive(Debug, Serialize)]
struct PayloadRef<'a> {
    page_content: &'a str,
    metadata: &'a ChunkMetadata,
}

#[derive(Debug, Deserialize)]
struct StoredPayload {
    page_content: String,
    #[serde(default)]
    metadata: ChunkMetadata,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f32,
    payload: Option<StoredPayload>,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    result: InfoResult,
}

#[derive(Debug, Deserialize)]
struct InfoResult {
    points_count: Option<u64>,
    config: Option<InfoConfig>,
}

#[derive(Debug, Deserialize)]
struct InfoConfig {
    params: InfoParams,
}

#[derive(Debug, Deserialize)]
struct InfoParams {
    vectors: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct BoolResponse {
    result: bool,
}

impl QdrantStore {
    #[inline]
    pub fn new(config: &StoreConfig, timeout_seconds: u64) -> Result<Self, StoreError> {
        url::Url::parse(&config.url).map_err(|e| {
            StoreError::Backend(format!("Invalid Qdrant URL '{}': {}", config.url, e))
        })?;

        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            collection: config.collection.clone(),
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff_unit: Duration::from_millis(500),
        })
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    fn collection_path(&self) -> String {
        format!("/collections/{}", self.collection)
    }

    fn with_key<B>(&self, request: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&str>,
    ) -> Result<Reply, ureq::Error> {
        let payload = body.unwrap_or("{}");
        let mut response = match method {
            Method::Get => self.with_key(self.agent.get(url)).call()?,
            Method::Delete => self.with_key(self.agent.delete(url)).call()?,
            Method::Put => self
                .with_key(self.agent.put(url))
                .header("Content-Type", "application/json")
                .send(payload)?,
            Method::Post => self
                .with_key(self.agent.post(url))
                .header("Content-Type", "application/json")
                .send(payload)?,
        };

        let status = response.status().as_u16();
        let body = response.body_mut().read_to_string()?;
        Ok(Reply {
            status,
            body,
            attempt: 1,
        })
    }

    /// Send a request, retrying connection failures and 5xx responses
    fn request_blocking(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> Result<Reply, StoreError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_error = StoreError::Transport(format!("No attempt made for {url}"));

        for attempt in 1..=self.retry_attempts {
            debug!(
                "Qdrant {:?} {} attempt {}/{}",
                method, url, attempt, self.retry_attempts
            );

            match self.send_once(method, &url, body) {
                Ok(reply) if reply.status >= 500 => {
                    warn!(
                        "Qdrant server error (status {}), attempt {}/{}",
                        reply.status, attempt, self.retry_attempts
                    );
                    last_error =
                        StoreError::Backend(format!("HTTP {}: {}", reply.status, reply.body));
                }
                Ok(reply) => return Ok(Reply { attempt, ..reply }),
                Err(
                    error @ (ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Timeout(_)
                    | ureq::Error::Io(_)),
                ) => {
                    warn!(
                        "Transport error talking to Qdrant: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                    last_error = StoreError::Transport(error.to_string());
                }
                Err(error) => return Err(StoreError::Transport(error.to_string())),
            }

            if attempt < self.retry_attempts {
                let delay = self.backoff_unit * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                std::thread::sleep(delay);
            }
        }

        Err(last_error)
    }

    async fn send(
        &self,
        method: Method,
        path: String,
        body: Option<String>,
    ) -> Result<Reply, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.request_blocking(method, &path, body.as_deref()))
            .await
            .map_err(|e| StoreError::Backend(format!("Qdrant request task failed: {e}")))?
    }

    async fn request(
        &self,
        method: Method,
        path: String,
        body: Option<String>,
    ) -> Result<Reply, StoreError> {
        let reply = self.send(method, path, body).await?;
        self.check_status(reply)
    }

    fn check_status(&self, reply: Reply) -> Result<Reply, StoreError> {
        match reply.status {
            200..=299 => Ok(reply),
            401 | 403 => Err(StoreError::Unauthorized(reply.status)),
            404 => Err(StoreError::NotFound(self.collection.clone())),
            _ if reply.is_conflict() => {
                Err(StoreError::AlreadyExists(self.collection.clone()))
            }
            status => Err(StoreError::Backend(format!("HTTP {}: {}", status, reply.body))),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value)
        .map_err(|e| StoreError::Backend(format!("Failed to serialize Qdrant request: {e}")))
}

fn from_json<'a, T: Deserialize<'a>>(body: &'a str) -> Result<T, StoreError> {
    serde_json::from_str(body)
        .map_err(|e| StoreError::Backend(format!("Failed to parse Qdrant response: {e}")))
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn collection_name(&self) -> &str {
        &self.collection
    }

    async fn collection_info(&self) -> Result<CollectionInfo, StoreError> {
        let reply = self.request(Method::Get, self.collection_path(), None).await?;
        let info: InfoResponse = from_json(&reply.body)?;

        let dimension = info
            .result
            .config
            .as_ref()
            .and_then(|config| config.params.vectors.get("size"))
            .and_then(serde_json::Value::as_u64)
            .map(|size| size as usize);

        Ok(CollectionInfo {
            name: self.collection.clone(),
            dimension,
            points: info.result.points_count,
        })
    }

    async fn create_collection(&self, dimension: usize) -> Result<(), StoreError> {
        let body = to_json(&CreateCollectionRequest {
            vectors: VectorParams {
                size: dimension,
                distance: "Cosine",
            },
        })?;

        let reply = self
            .send(Method::Put, self.collection_path(), Some(body))
            .await?;

        // A conflict after a failed attempt means that attempt reached the server
        if reply.attempt > 1 && reply.is_conflict() {
            info!(
                "Qdrant collection '{}' was created by an earlier attempt",
                self.collection
            );
            return Ok(());
        }
        self.check_status(reply)?;

        info!(
            "Created Qdrant collection '{}' ({} dimensions, cosine)",
            self.collection, dimension
        );
        Ok(())
    }

    async fn delete_collection(&self) -> Result<(), StoreError> {
        let reply = self
            .request(Method::Delete, self.collection_path(), None)
            .await?;
        let deleted: BoolResponse = from_json(&reply.body)?;
        if !deleted.result {
            return Err(StoreError::NotFound(self.collection.clone()));
        }

        info!("Deleted Qdrant collection '{}'", self.collection);
        Ok(())
    }

    async fn upsert(&self, points: Vec<EmbeddedChunk>) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }

        let request = UpsertRequest {
            points: points
                .iter()
                .map(|point| PointStruct {
                    id: point.id.to_string(),
                    vector: &point.vector,
                    payload: PayloadRef {
                        page_content: &point.chunk.content,
                        metadata: &point.chunk.metadata,
                    },
                })
                .collect(),
        };
        let body = to_json(&request)?;

        self.request(
            Method::Put,
            format!("{}/points?wait=true", self.collection_path()),
            Some(body),
        )
        .await?;

        debug!("Upserted {} points into '{}'", points.len(), self.collection);
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        let body = to_json(&SearchRequest {
            vector,
            limit,
            with_payload: true,
        })?;

        let reply = self
            .request(
                Method::Post,
                format!("{}/points/search", self.collection_path()),
                Some(body),
            )
            .await?;
        let response: SearchResponse = from_json(&reply.body)?;

        let mut results = Vec::with_capacity(response.result.len());
        for point in response.result {
            let Some(payload) = point.payload else {
                warn!("Skipping search hit without payload");
                continue;
            };
            results.push(ScoredChunk {
                chunk: DocumentChunk {
                    content: payload.page_content,
                    metadata: payload.metadata,
                },
                score: point.score,
            });
        }

        results.truncate(limit);
        debug!("Qdrant search returned {} results", results.len());
        Ok(results)
    }
}
