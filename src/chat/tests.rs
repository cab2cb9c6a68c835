use std::path::PathBuf;

use tempfile::TempDir;

use super::*;
use crate::database::{EmbeddedChunk, VectorStore};
use crate::embeddings::Embedder;
use crate::embeddings::chunking::{ChunkMetadata, DocumentChunk};
use crate::indexer::IndexBuilder;
use crate::testing::{
    FakeEmbedder, InfoFailure, MemoryStore, RecordingUi, ScriptedCompletion, UiEvent, embed_text,
};

const DIMENSION: usize = 32;

fn point(content: &str) -> EmbeddedChunk {
    EmbeddedChunk::new(
        DocumentChunk {
            content: content.to_string(),
            metadata: ChunkMetadata {
                source: "tnesevai_services.pdf".to_string(),
                page: 1,
                ..ChunkMetadata::default()
            },
        },
        embed_text(content, DIMENSION),
    )
}

fn long_chunk() -> String {
    format!(
        "How to apply for a ration card: {}",
        "Submit the form with Aadhaar and address proof. ".repeat(15)
    )
}

fn services_store() -> MemoryStore {
    MemoryStore::with_points(
        "tnesevai",
        DIMENSION,
        vec![
            point(&long_chunk()),
            point("Community certificate documents"),
            point("Birth certificate registration"),
        ],
    )
}

fn index_over(store: MemoryStore) -> Arc<SharedIndex> {
    Arc::new(SharedIndex::new(IndexBuilder::new(
        Arc::new(store) as Arc<dyn VectorStore>,
        Arc::new(FakeEmbedder::new(DIMENSION)) as Arc<dyn Embedder>,
        PathBuf::from("unused.pdf"),
    )))
}

fn session(store: MemoryStore, completion: &Arc<ScriptedCompletion>) -> ChatSession {
    ChatSession::new(
        index_over(store),
        Arc::clone(completion) as Arc<dyn CompletionService>,
        ChatConfig::default(),
    )
}

#[tokio::test]
async fn answers_with_retrieved_context() {
    let completion = Arc::new(ScriptedCompletion::answering(&["Apply ", "at e-Sevai."]));
    let mut session = session(services_store(), &completion);
    let mut ui = RecordingUi::default();

    session.start(&mut ui).await.expect("start should succeed");
    let report = session
        .handle_turn(&mut ui, "How do I apply for a ration card?")
        .await;

    assert_eq!(report.state, TurnState::Rendered);
    assert_eq!(report.answer.as_deref(), Some("Apply at e-Sevai."));
    assert_eq!(report.retrieved, 3);
    assert_eq!(session.state(), TurnState::Rendered);

    let previews = ui
        .events
        .iter()
        .find_map(|e| match e {
            UiEvent::Context(previews) => Some(previews.clone()),
            _ => None,
        })
        .expect("debug panel should be shown");
    assert_eq!(previews.len(), 3);
    assert!(previews.iter().all(|p| p.chars().count() <= 500));
    assert!(previews.iter().any(|p| p.chars().count() == 500));

    let prompts = completion.prompts();
    assert_eq!(prompts.len(), 1);
    let (_, context) = prompts[0]
        .split_once("\n\nContext: ")
        .expect("prompt has a context section");
    let sections: Vec<&str> = context.split("\n\n").collect();
    assert_eq!(sections.len(), 3);
    let long = long_chunk();
    assert!(sections.contains(&long.as_str()));
    assert!(sections.contains(&"Community certificate documents"));
    assert!(sections.contains(&"Birth certificate registration"));
    assert!(prompts[0].starts_with(
        "Based on the following context about Tamil Nadu government services, \
         answer the question: How do I apply for a ration card?"
    ));

    assert!(ui.events.contains(&UiEvent::Partial("Apply ".to_string())));
    assert!(ui.events.contains(&UiEvent::Partial("Apply at e-Sevai.".to_string())));
    assert_eq!(ui.answers(), vec!["Apply at e-Sevai."]);
    assert_eq!(
        session.history(),
        &[
            Turn::user("How do I apply for a ration card?"),
            Turn::assistant("Apply at e-Sevai."),
        ]
    );
}

#[tokio::test]
async fn mid_stream_failure_records_placeholder() {
    let completion = Arc::new(ScriptedCompletion::failing_after(
        &["Partial answer"],
        "connection reset",
    ));
    let mut session = session(services_store(), &completion);
    let mut ui = RecordingUi::default();

    session.start(&mut ui).await.expect("start should succeed");
    let report = session.handle_turn(&mut ui, "ration card").await;

    assert_eq!(report.state, TurnState::RenderedWithError);
    assert_eq!(report.answer.as_deref(), Some(GENERATION_ERROR));
    assert_eq!(ui.answers(), vec![GENERATION_ERROR]);
    assert_eq!(
        session.history().last(),
        Some(&Turn::assistant("An error occurred during generation."))
    );

    let (error, hint) = ui
        .events
        .iter()
        .find_map(|e| match e {
            UiEvent::Error { error, hint } => Some((error.clone(), hint.clone())),
            _ => None,
        })
        .expect("error should be shown");
    assert!(error.contains("connection reset"));
    assert_eq!(
        hint,
        "Make sure Ollama is running and the 'scripted' model is available."
    );
}

#[tokio::test]
async fn empty_retrieval_warns_without_answer() {
    let completion = Arc::new(ScriptedCompletion::answering(&["unused"]));
    let mut session = session(
        MemoryStore::with_points("tnesevai", DIMENSION, Vec::new()),
        &completion,
    );
    let mut ui = RecordingUi::default();

    session.start(&mut ui).await.expect("start should succeed");
    let report = session.handle_turn(&mut ui, "ration card").await;

    assert_eq!(report.state, TurnState::Rendered);
    assert_eq!(report.answer, None);
    assert!(ui.events.contains(&UiEvent::NoContext));
    assert!(completion.prompts().is_empty());
    assert_eq!(session.history(), &[Turn::user("ration card")]);
}

#[tokio::test]
async fn unreachable_store_is_fatal() {
    let completion = Arc::new(ScriptedCompletion::answering(&["unused"]));
    let mut store = MemoryStore::new("tnesevai");
    store.info_failure = Some(InfoFailure::Unreachable);
    let mut session = session(store, &completion);
    let mut ui = RecordingUi::with_questions(&["ration card"]);

    let result = session.run(&mut ui).await;

    assert!(result.is_err());
    let fatal = ui
        .events
        .iter()
        .find_map(|e| match e {
            UiEvent::Fatal(message) => Some(message.clone()),
            _ => None,
        })
        .expect("fatal error should be shown");
    assert!(fatal.starts_with("An error occurred during initialization: "));
    // The chat input was never reached
    assert_eq!(ui.questions.len(), 1);
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn run_replays_history_and_handles_commands() {
    let completion = Arc::new(ScriptedCompletion::answering(&["Answer."]));
    let mut session = session(services_store(), &completion);
    let mut ui = RecordingUi::with_questions(&[
        "ration card",
        "   ",
        "/history",
        "income certificate",
        "/exit",
        "never asked",
    ]);

    session.run(&mut ui).await.expect("session should end cleanly");

    let histories: Vec<usize> = ui
        .events
        .iter()
        .filter_map(|e| match e {
            UiEvent::History(len) => Some(*len),
            _ => None,
        })
        .collect();
    assert_eq!(histories, vec![0, 2, 2]);
    assert_eq!(session.history().len(), 4);
    assert_eq!(ui.questions, vec!["never asked".to_string()]);
    assert_eq!(completion.prompts().len(), 2);
    assert_eq!(session.state(), TurnState::Idle);
}

#[tokio::test]
async fn end_of_input_ends_session() {
    let completion = Arc::new(ScriptedCompletion::answering(&["Answer."]));
    let mut session = session(services_store(), &completion);
    let mut ui = RecordingUi::with_questions(&["ration card"]);

    session.run(&mut ui).await.expect("session should end cleanly");
    assert_eq!(session.history().len(), 2);
    assert_eq!(session.state(), TurnState::Idle);
    assert_eq!(ui.events.first(), Some(&UiEvent::Title));
}

#[tokio::test]
async fn turn_before_start_fails_gracefully() {
    let completion = Arc::new(ScriptedCompletion::answering(&["unused"]));
    let mut session = session(services_store(), &completion);
    let mut ui = RecordingUi::default();

    let report = session.handle_turn(&mut ui, "ration card").await;

    assert_eq!(report.state, TurnState::RenderedWithError);
    assert_eq!(session.history().len(), 2);
}

#[tokio::test]
async fn debug_panel_can_be_disabled() {
    let completion = Arc::new(ScriptedCompletion::answering(&["Answer."]));
    let mut session = ChatSession::new(
        index_over(services_store()),
        Arc::clone(&completion) as Arc<dyn CompletionService>,
        ChatConfig {
            show_debug: false,
            top_k: 1,
            ..ChatConfig::default()
        },
    );
    let mut ui = RecordingUi::default();

    session.start(&mut ui).await.expect("start should succeed");
    let report = session.handle_turn(&mut ui, "birth certificate").await;

    assert_eq!(report.retrieved, 1);
    assert!(!ui.events.iter().any(|e| matches!(e, UiEvent::Context(_))));
}

#[tokio::test]
async fn index_progress_reaches_the_surface() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("tnesevai_services.pdf");
    crate::testing::write_pdf(&path, &["Ration card services."]);

    let index = Arc::new(SharedIndex::new(IndexBuilder::new(
        Arc::new(MemoryStore::new("tnesevai")) as Arc<dyn VectorStore>,
        Arc::new(FakeEmbedder::new(DIMENSION)) as Arc<dyn Embedder>,
        path,
    )));
    let completion: Arc<dyn CompletionService> = Arc::new(ScriptedCompletion::answering(&["ok"]));
    let mut session = ChatSession::new(index, completion, ChatConfig::default());
    let mut ui = RecordingUi::default();

    session.start(&mut ui).await.expect("start should succeed");

    assert!(
        ui.events
            .contains(&UiEvent::Index(IndexEvent::Populated { chunks: 1 }))
    );
}
