// In-memory stand-ins for the external services, shared by unit tests

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};

use crate::chat::ChatUi;
use crate::database::{CollectionInfo, EmbeddedChunk, ScoredChunk, StoreError, VectorStore};
use crate::embeddings::Embedder;
use crate::generation::{CompletionService, TokenStream};
use crate::indexer::IndexEvent;

/// Write a PDF with one page per entry of `page_texts`
pub fn write_pdf(path: &Path, page_texts: &[&str]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in page_texts {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("content should encode"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => page_texts.len() as i64,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("should save test pdf");
}

/// Deterministic bag-of-characters embedding
pub fn embed_text(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0; dimension];
    vector[0] = 1.0;
    for c in text.to_lowercase().chars().filter(|c| c.is_alphanumeric()) {
        vector[c as usize % dimension] += 1.0;
    }
    vector
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

pub struct FakeEmbedder {
    pub dimension: usize,
    pub output_dimension: usize,
    pub fail: bool,
    pub document_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            output_dimension: dimension,
            fail: false,
            document_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(dimension: usize) -> Self {
        Self {
            fail: true,
            ..Self::new(dimension)
        }
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_documents(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.document_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("embedding service unavailable");
        }
        Ok(texts
            .iter()
            .map(|t| embed_text(t, self.output_dimension))
            .collect())
    }

    async fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("embedding service unavailable");
        }
        Ok(embed_text(text, self.output_dimension))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoFailure {
    Unreachable,
    Unauthorized,
}

#[derive(Debug, Default)]
struct Collection {
    dimension: usize,
    points: Vec<EmbeddedChunk>,
}

/// Vector store kept in memory, searched by brute-force cosine similarity
pub struct MemoryStore {
    name: String,
    collection: Mutex<Option<Collection>>,
    pub info_failure: Option<InfoFailure>,
    /// Report `AlreadyExists` on create, as if another process won the race
    pub lose_create_race: bool,
    pub create_calls: AtomicUsize,
    pub upsert_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            collection: Mutex::new(None),
            info_failure: None,
            lose_create_race: false,
            create_calls: AtomicUsize::new(0),
            upsert_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_points(name: &str, dimension: usize, points: Vec<EmbeddedChunk>) -> Self {
        let store = Self::new(name);
        *store.collection.lock().expect("lock") = Some(Collection { dimension, points });
        store
    }

    pub fn point_count(&self) -> usize {
        self.collection
            .lock()
            .expect("lock")
            .as_ref()
            .map_or(0, |c| c.points.len())
    }

    pub fn contents(&self) -> Vec<String> {
        self.collection
            .lock()
            .expect("lock")
            .as_ref()
            .map(|c| c.points.iter().map(|p| p.chunk.content.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn collection_name(&self) -> &str {
        &self.name
    }

    async fn collection_info(&self) -> Result<CollectionInfo, StoreError> {
        match self.info_failure {
            Some(InfoFailure::Unreachable) => {
                return Err(StoreError::Transport("connection refused".to_string()));
            }
            Some(InfoFailure::Unauthorized) => return Err(StoreError::Unauthorized(401)),
            None => {}
        }

        let guard = self.collection.lock().expect("lock");
        let collection = guard
            .as_ref()
            .ok_or_else(|| StoreError::NotFound(self.name.clone()))?;
        Ok(CollectionInfo {
            name: self.name.clone(),
            dimension: Some(collection.dimension),
            points: Some(collection.points.len() as u64),
        })
    }

    async fn create_collection(&self, dimension: usize) -> Result<(), StoreError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.collection.lock().expect("lock");
        if self.lose_create_race || guard.is_some() {
            return Err(StoreError::AlreadyExists(self.name.clone()));
        }
        *guard = Some(Collection {
            dimension,
            points: Vec::new(),
        });
        Ok(())
    }

    async fn delete_collection(&self) -> Result<(), StoreError> {
        self.collection
            .lock()
            .expect("lock")
            .take()
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(self.name.clone()))
    }

    async fn upsert(&self, points: Vec<EmbeddedChunk>) -> Result<(), StoreError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.collection.lock().expect("lock");
        let collection = guard
            .as_mut()
            .ok_or_else(|| StoreError::NotFound(self.name.clone()))?;
        collection.points.extend(points);
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        let guard = self.collection.lock().expect("lock");
        let collection = guard
            .as_ref()
            .ok_or_else(|| StoreError::NotFound(self.name.clone()))?;

        let mut hits: Vec<ScoredChunk> = collection
            .points
            .iter()
            .map(|p| ScoredChunk {
                chunk: p.chunk.clone(),
                score: cosine(vector, &p.vector),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Completion service replaying a fixed script of fragments
pub struct ScriptedCompletion {
    script: Vec<Result<String, String>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn answering(fragments: &[&str]) -> Self {
        Self {
            script: fragments.iter().map(|f| Ok((*f).to_string())).collect(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Emit `fragments`, then fail with `error`
    pub fn failing_after(fragments: &[&str], error: &str) -> Self {
        let mut completion = Self::answering(fragments);
        completion.script.push(Err(error.to_string()));
        completion
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("lock").clone()
    }
}

impl CompletionService for ScriptedCompletion {
    fn model(&self) -> &str {
        "scripted"
    }

    fn stream(&self, prompt: &str) -> anyhow::Result<TokenStream> {
        self.prompts.lock().expect("lock").push(prompt.to_string());
        let items: Vec<anyhow::Result<String>> = self
            .script
            .iter()
            .map(|item| item.clone().map_err(anyhow::Error::msg))
            .collect();
        Ok(Box::new(items.into_iter()))
    }
}

/// Everything the session asked the surface to show, in order
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Title,
    Index(IndexEvent),
    Fatal(String),
    History(usize),
    User(String),
    Activity(String),
    Context(Vec<String>),
    NoContext,
    Partial(String),
    Answer(String),
    Error { error: String, hint: String },
}

#[derive(Default)]
pub struct RecordingUi {
    pub questions: VecDeque<String>,
    pub events: Vec<UiEvent>,
}

impl RecordingUi {
    pub fn with_questions(questions: &[&str]) -> Self {
        Self {
            questions: questions.iter().map(|q| (*q).to_string()).collect(),
            events: Vec::new(),
        }
    }

    pub fn answers(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                UiEvent::Answer(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl ChatUi for RecordingUi {
    fn title(&mut self, _title: &str, _subtitle: &str) {
        self.events.push(UiEvent::Title);
    }

    fn index_event(&mut self, event: &IndexEvent) {
        self.events.push(UiEvent::Index(event.clone()));
    }

    fn fatal(&mut self, message: &str) {
        self.events.push(UiEvent::Fatal(message.to_string()));
    }

    fn render_history(&mut self, history: &[crate::chat::Turn]) {
        self.events.push(UiEvent::History(history.len()));
    }

    fn user_message(&mut self, text: &str) {
        self.events.push(UiEvent::User(text.to_string()));
    }

    fn begin_activity(&mut self, message: &str) {
        self.events.push(UiEvent::Activity(message.to_string()));
    }

    fn end_activity(&mut self) {}

    fn retrieved_context(&mut self, previews: &[&str]) {
        self.events.push(UiEvent::Context(
            previews.iter().map(|p| (*p).to_string()).collect(),
        ));
    }

    fn no_context(&mut self) {
        self.events.push(UiEvent::NoContext);
    }

    fn partial_answer(&mut self, text: &str) {
        self.events.push(UiEvent::Partial(text.to_string()));
    }

    fn final_answer(&mut self, text: &str) {
        self.events.push(UiEvent::Answer(text.to_string()));
    }

    fn turn_error(&mut self, error: &str, hint: &str) {
        self.events.push(UiEvent::Error {
            error: error.to_string(),
            hint: hint.to_string(),
        });
    }

    fn read_question(&mut self) -> anyhow::Result<Option<String>> {
        Ok(self.questions.pop_front())
    }
}
