// Conversation shell
// Session history, the per-turn retrieve/generate flow and the surface it renders to

pub mod terminal;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::generation::{CompletionService, GENERATION_ERROR, build_prompt, generation_hint};
use crate::indexer::{IndexEvent, SharedIndex};

pub use terminal::TerminalUi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the conversation history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    #[inline]
    pub fn user(text: &str) -> Self {
        Self {
            role: Role::User,
            text: text.to_string(),
        }
    }

    #[inline]
    pub fn assistant(text: &str) -> Self {
        Self {
            role: Role::Assistant,
            text: text.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingRetrieval,
    AwaitingGeneration,
    Rendered,
    RenderedWithError,
}

/// What happened during one call to [`ChatSession::handle_turn`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub state: TurnState,
    /// Recorded assistant text; `None` when retrieval found nothing
    pub answer: Option<String>,
    pub retrieved: usize,
}

/// The surface a chat session renders to and reads questions from
pub trait ChatUi: Send {
    fn title(&mut self, title: &str, subtitle: &str);
    fn index_event(&mut self, event: &IndexEvent);
    fn fatal(&mut self, message: &str);
    fn render_history(&mut self, history: &[Turn]);
    fn user_message(&mut self, text: &str);
    fn begin_activity(&mut self, message: &str);
    /// Stop the current activity indicator; a no-op when none is running
    fn end_activity(&mut self);
    fn retrieved_context(&mut self, previews: &[&str]);
    fn no_context(&mut self);
    /// Answer so far, rendered with a typing cursor
    fn partial_answer(&mut self, text: &str);
    /// Replace any partial answer with the final text
    fn final_answer(&mut self, text: &str);
    fn turn_error(&mut self, error: &str, hint: &str);
    /// Next line of input; `None` at end of input
    fn read_question(&mut self) -> anyhow::Result<Option<String>>;
}

/// One conversation: history plus a handle to the process-wide index
pub struct ChatSession {
    index: Arc<SharedIndex>,
    completion: Arc<dyn CompletionService>,
    settings: ChatConfig,
    history: Vec<Turn>,
    state: TurnState,
}

impl ChatSession {
    #[inline]
    pub fn new(
        index: Arc<SharedIndex>,
        completion: Arc<dyn CompletionService>,
        settings: ChatConfig,
    ) -> Self {
        Self {
            index,
            completion,
            settings,
            history: Vec::new(),
            state: TurnState::Idle,
        }
    }

    #[inline]
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    #[inline]
    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Show the title and make sure the collection is ready.
    ///
    /// Failure is fatal for the session: it is reported through
    /// [`ChatUi::fatal`] and returned.
    pub async fn start(&mut self, ui: &mut dyn ChatUi) -> crate::Result<()> {
        ui.title(&self.settings.title, &self.settings.subtitle);

        let result = self
            .index
            .ensure(&mut |event| ui.index_event(event))
            .await;

        match result {
            Ok(report) => {
                debug!("Index ready: {:?}", report);
                Ok(())
            }
            Err(e) => {
                ui.fatal(&format!("An error occurred during initialization: {e}"));
                Err(e)
            }
        }
    }

    /// [`Self::start`] followed by [`Self::chat`]
    pub async fn run(&mut self, ui: &mut dyn ChatUi) -> crate::Result<()> {
        self.start(ui).await?;
        self.chat(ui).await
    }

    /// Read questions until `/exit`, `/quit` or end of input
    pub async fn chat(&mut self, ui: &mut dyn ChatUi) -> crate::Result<()> {
        while let Some(input) = ui.read_question()? {
            self.state = TurnState::Idle;
            let question = input.trim();
            match question {
                "" => continue,
                "/exit" | "/quit" => break,
                "/history" => {
                    ui.render_history(&self.history);
                    continue;
                }
                _ => {}
            }

            ui.render_history(&self.history);
            self.handle_turn(ui, question).await;
        }

        self.state = TurnState::Idle;
        info!("Chat session ended after {} turns", self.history.len());
        Ok(())
    }

    /// Answer one question. Errors are rendered and recorded, never returned.
    pub async fn handle_turn(&mut self, ui: &mut dyn ChatUi, question: &str) -> TurnReport {
        self.state = TurnState::AwaitingRetrieval;
        ui.user_message(question);
        self.history.push(Turn::user(question));

        let Some(retriever) = self.index.retriever() else {
            return self.fail_turn(ui, "the document index is not initialized", 0);
        };

        ui.begin_activity("🔍 Searching for relevant information...");
        let result = retriever.search(question, self.settings.top_k).await;
        ui.end_activity();

        let chunks = match result {
            Ok(chunks) => chunks,
            Err(e) => return self.fail_turn(ui, &e.to_string(), 0),
        };

        if chunks.is_empty() {
            warn!("No chunks retrieved for question");
            ui.no_context();
            self.state = TurnState::Rendered;
            return TurnReport {
                state: self.state,
                answer: None,
                retrieved: 0,
            };
        }

        if self.settings.show_debug {
            let previews: Vec<&str> = chunks
                .iter()
                .map(|c| c.chunk.preview(self.settings.preview_chars))
                .collect();
            ui.retrieved_context(&previews);
        }

        self.state = TurnState::AwaitingGeneration;
        let prompt = build_prompt(&self.settings.subject, question, &chunks);

        ui.begin_activity("🤖 Generating answer...");
        match self.generate(ui, prompt).await {
            Ok(answer) => {
                ui.final_answer(&answer);
                self.history.push(Turn::assistant(&answer));
                self.state = TurnState::Rendered;
                TurnReport {
                    state: self.state,
                    answer: Some(answer),
                    retrieved: chunks.len(),
                }
            }
            Err(e) => self.fail_turn(ui, &format!("{e:#}"), chunks.len()),
        }
    }

    /// Stream the completion on a blocking thread, rendering fragments as they arrive
    async fn generate(&self, ui: &mut dyn ChatUi, prompt: String) -> anyhow::Result<String> {
        let completion = Arc::clone(&self.completion);
        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();

        let worker = tokio::task::spawn_blocking(move || {
            let tokens = match completion.stream(&prompt) {
                Ok(tokens) => tokens,
                Err(e) => {
                    let _ = sender.send(Err(e));
                    return;
                }
            };
            for item in tokens {
                let failed = item.is_err();
                if sender.send(item).is_err() || failed {
                    break;
                }
            }
        });

        let mut answer = String::new();
        let mut outcome = Ok(());
        let mut started = false;
        while let Some(item) = receiver.recv().await {
            if !started {
                ui.end_activity();
                started = true;
            }
            match item {
                Ok(fragment) => {
                    answer.push_str(&fragment);
                    ui.partial_answer(&answer);
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        ui.end_activity();
        drop(receiver);

        worker.await.context("Generation task failed")?;
        outcome.map(|()| answer)
    }

    fn fail_turn(&mut self, ui: &mut dyn ChatUi, error: &str, retrieved: usize) -> TurnReport {
        warn!("Turn failed: {}", error);
        ui.end_activity();
        ui.final_answer(GENERATION_ERROR);
        ui.turn_error(
            &format!("❌ An error occurred: {error}"),
            &generation_hint(self.completion.model()),
        );

        self.history.push(Turn::assistant(GENERATION_ERROR));
        self.state = TurnState::RenderedWithError;
        TurnReport {
            state: self.state,
            answer: Some(GENERATION_ERROR.to_string()),
            retrieved,
        }
    }
}
