// Answer generation
// Builds the retrieval prompt and streams completions from Ollama


use std::io::BufRead;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::OllamaConfig;
use crate::database::ScoredChunk;

/// Shown and recorded in place of an answer whose generation failed
pub const GENERATION_ERROR: &str = "An error occurred during generation.";

/// Lazy, finite stream of answer fragments; an `Err` item ends the stream
pub type TokenStream = Box<dyn Iterator<Item = Result<String>> + Send>;

/// A language model that turns a prompt into a stream of text fragments
pub trait CompletionService: Send + Sync {
    fn model(&self) -> &str;

    /// Submit `prompt` as a single user message. Blocks until the response starts.
    fn stream(&self, prompt: &str) -> Result<TokenStream>;
}

/// Prompt combining the question with the retrieved chunks
#[inline]
pub fn build_prompt(subject: &str, query: &str, chunks: &[ScoredChunk]) -> String {
    let context = chunks
        .iter()
        .map(|c| c.chunk.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Based on the following context about {subject}, answer the question: {query}\n\nContext: {context}"
    )
}

#[inline]
pub fn generation_hint(model: &str) -> String {
    format!("Make sure Ollama is running and the '{model}' model is available.")
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessageRef<'a>; 1],
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessageRef<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Streaming client for Ollama's `/api/chat`
#[derive(Debug, Clone)]
pub struct OllamaChat {
    base_url: Url,
    model: String,
    agent: ureq::Agent,
}

impl OllamaChat {
    /// Only connecting is bounded by `timeout_seconds`; a slow answer is never cut off
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            base_url,
            model: config.chat_model.clone(),
            agent,
        })
    }
}

impl CompletionService for OllamaChat {
    fn model(&self) -> &str {
        &self.model
    }

    fn stream(&self, prompt: &str) -> Result<TokenStream> {
        let url = self
            .base_url
            .join("/api/chat")
            .context("Failed to build chat URL")?;

        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessageRef {
                role: "user",
                content: prompt,
            }],
            stream: true,
        };
        let body = serde_json::to_string(&request).context("Failed to serialize chat request")?;

        debug!(
            "Requesting completion from {} with model {} ({} prompt chars)",
            url,
            self.model,
            prompt.chars().count()
        );

        let mut response = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(&body)
            .context("Failed to reach Ollama chat endpoint")?;

        let status = response.status().as_u16();
        if status != 200 {
            let text = response.body_mut().read_to_string().unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|e| e.error)
                .unwrap_or(text);
            warn!("Ollama chat request failed with status {}: {}", status, message);
            anyhow::bail!("Ollama returned HTTP {status}: {message}");
        }

        let reader = std::io::BufReader::new(response.into_body().into_reader());
        Ok(Box::new(NdjsonTokens::new(reader)))
    }
}

/// Iterator over the `message.content` fragments of an NDJSON chat stream
pub(crate) struct NdjsonTokens<R> {
    reader: R,
    finished: bool,
}

impl<R: BufRead> NdjsonTokens<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
        }
    }

    fn fail(&mut self, error: anyhow::Error) -> Option<Result<String>> {
        self.finished = true;
        Some(Err(error))
    }
}

impl<R: BufRead> Iterator for NdjsonTokens<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    return self.fail(anyhow::anyhow!(
                        "Completion stream ended before it was done"
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    return self.fail(
                        anyhow::Error::new(e).context("Failed to read completion stream"),
                    );
                }
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let chunk: ChatChunk = match serde_json::from_str(trimmed) {
                Ok(chunk) => chunk,
                Err(e) => {
                    return self.fail(
                        anyhow::Error::new(e).context("Malformed line in completion stream"),
                    );
                }
            };

            if let Some(error) = chunk.error {
                return self.fail(anyhow::anyhow!("Ollama reported an error: {error}"));
            }

            let content = chunk.message.map(|m| m.content).unwrap_or_default();
            if chunk.done {
                self.finished = true;
                return (!content.is_empty()).then_some(Ok(content));
            }
            if !content.is_empty() {
                return Some(Ok(content));
            }
        }
    }
}
