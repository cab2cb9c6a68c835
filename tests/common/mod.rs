#![allow(
    dead_code,
    reason = "each integration test binary uses a different subset of these helpers"
)]

// Shared fixtures for the integration tests: a PDF writer, mocked Ollama
// endpoints and a chat surface that records what it was asked to show

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use serde_json::{Value, json};
use sevai_chat::chat::{ChatUi, Turn};
use sevai_chat::config::{Config, DocumentConfig, OllamaConfig, StoreBackend, StoreConfig};
use sevai_chat::indexer::IndexEvent;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const EMBEDDING_DIMENSION: usize = 4;
pub const CHAT_MODEL: &str = "test-chat";

pub const SERVICE_PAGES: [&str; 3] = [
    "Birth certificate registration is available at every e-Sevai centre.",
    "Income certificate applications need an Aadhaar card and a ration card.",
    "Patta transfer requests are processed by the revenue department.",
];

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

/// Keyword embedding: one axis per service plus a constant bias axis
pub fn keyword_vector(text: &str) -> Vec<f32> {
    let text = text.to_lowercase();
    let axis = |word: &str| if text.contains(word) { 1.0 } else { 0.0 };
    vec![axis("birth"), axis("income"), axis("patta"), 0.1]
}

fn embed_response(request: &Request) -> ResponseTemplate {
    let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
    let embeddings: Vec<Vec<f32>> = body["input"]
        .as_array()
        .map(|inputs| {
            inputs
                .iter()
                .map(|input| keyword_vector(input.as_str().unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default();

    ResponseTemplate::new(200).set_body_json(json!({
        "model": "test-embed",
        "embeddings": embeddings,
    }))
}

/// Serve `/api/embed` with [`keyword_vector`] embeddings
pub async fn mount_embeddings(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(embed_response)
        .mount(server)
        .await;
}

/// NDJSON body streaming `fragments` and a final `done` line
pub fn chat_stream_body(fragments: &[&str]) -> String {
    let mut body = String::new();
    for fragment in fragments {
        let line = json!({
            "model": CHAT_MODEL,
            "message": {"role": "assistant", "content": fragment},
            "done": false
        });
        body.push_str(&line.to_string());
        body.push('\n');
    }
    let done = json!({
        "model": CHAT_MODEL,
        "message": {"role": "assistant", "content": ""},
        "done": true,
        "done_reason": "stop"
    });
    body.push_str(&done.to_string());
    body.push('\n');
    body
}

pub async fn mount_chat(server: &MockServer, fragments: &[&str]) {
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/x-ndjson")
                .set_body_string(chat_stream_body(fragments)),
        )
        .mount(server)
        .await;
}

pub fn ollama_config(server: &MockServer) -> OllamaConfig {
    let url = Url::parse(&server.uri()).expect("mock server uri is a url");
    OllamaConfig {
        host: url.host_str().expect("mock server has a host").to_string(),
        port: url.port().expect("mock server has a port"),
        embedding_model: "test-embed".to_string(),
        chat_model: CHAT_MODEL.to_string(),
        batch_size: 2,
        embedding_dimension: EMBEDDING_DIMENSION as u32,
        timeout_seconds: 5,
        retry_attempts: 1,
        ..OllamaConfig::default()
    }
}

/// Configuration for a LanceDB store inside `base_dir`
pub fn lancedb_config(base_dir: &Path, document: PathBuf, ollama: OllamaConfig) -> Config {
    Config {
        document: DocumentConfig { path: document },
        ollama,
        store: StoreConfig {
            backend: StoreBackend::Lancedb,
            path: Some(base_dir.join("vectors")),
            ..StoreConfig::default()
        },
        base_dir: base_dir.to_path_buf(),
        ..Config::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shown {
    Index(IndexEvent),
    Fatal(String),
    Context(Vec<String>),
    NoContext,
    Answer(String),
    Error(String),
}

/// Chat surface fed from a fixed list of questions
#[derive(Default)]
pub struct ScriptedUi {
    pub questions: VecDeque<String>,
    pub shown: Vec<Shown>,
    pub partials: usize,
}

impl ScriptedUi {
    pub fn with_questions(questions: &[&str]) -> Self {
        Self {
            questions: questions.iter().map(|q| (*q).to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn answers(&self) -> Vec<&str> {
        self.shown
            .iter()
            .filter_map(|s| match s {
                Shown::Answer(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn index_events(&self) -> Vec<&IndexEvent> {
        self.shown
            .iter()
            .filter_map(|s| match s {
                Shown::Index(event) => Some(event),
                _ => None,
            })
            .collect()
    }
}

impl ChatUi for ScriptedUi {
    fn title(&mut self, _title: &str, _subtitle: &str) {}

    fn index_event(&mut self, event: &IndexEvent) {
        self.shown.push(Shown::Index(event.clone()));
    }

    fn fatal(&mut self, message: &str) {
        self.shown.push(Shown::Fatal(message.to_string()));
    }

    fn render_history(&mut self, _history: &[Turn]) {}

    fn user_message(&mut self, _text: &str) {}

    fn begin_activity(&mut self, _message: &str) {}

    fn end_activity(&mut self) {}

    fn retrieved_context(&mut self, previews: &[&str]) {
        self.shown.push(Shown::Context(
            previews.iter().map(|p| (*p).to_string()).collect(),
        ));
    }

    fn no_context(&mut self) {
        self.shown.push(Shown::NoContext);
    }

    fn partial_answer(&mut self, _text: &str) {
        self.partials += 1;
    }

    fn final_answer(&mut self, text: &str) {
        self.shown.push(Shown::Answer(text.to_string()));
    }

    fn turn_error(&mut self, error: &str, _hint: &str) {
        self.shown.push(Shown::Error(error.to_string()));
    }

    fn read_question(&mut self) -> anyhow::Result<Option<String>> {
        Ok(self.questions.pop_front())
    }
}
