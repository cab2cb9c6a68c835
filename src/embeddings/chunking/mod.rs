
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::loader::LoadedDocument;

/// Where a chunk came from inside the source document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkMetadata {
    /// Path of the originating file
    pub source: String,
    /// 1-based page number
    pub page: u32,
    /// Position of the chunk within its page
    pub chunk_index: u32,
    /// Character range of the chunk within the trimmed page text
    pub start_char: u32,
    pub end_char: u32,
}

/// A bounded, immutable window of the source document ready for embedding
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl DocumentChunk {
    #[inline]
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }

    /// The first `max_chars` characters of the chunk
    #[inline]
    pub fn preview(&self, max_chars: usize) -> &str {
        match self.content.char_indices().nth(max_chars) {
            Some((byte_index, _)) => self.content.get(..byte_index).unwrap_or_default(),
            None => &self.content,
        }
    }
}

/// Configuration for recursive character splitting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Minimum number of characters shared by consecutive chunks
    pub chunk_overlap: usize,
    /// Preferred break points, highest priority first
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 200,
            separators: vec![
                "\n\n".to_string(),
                "\n".to_string(),
                ". ".to_string(),
                " ".to_string(),
            ],
        }
    }
}

/// Half-open character range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

/// Split every page of a document into overlapping chunks
#[inline]
pub fn chunk_document(document: &LoadedDocument, config: &ChunkingConfig) -> Vec<DocumentChunk> {
    let mut chunks = Vec::new();

    for page in &document.pages {
        let text = page.text.trim();
        let chars: Vec<char> = text.chars().collect();

        for (index, span) in split_spans(&chars, config).into_iter().enumerate() {
            let content: String = chars[span.start..span.end].iter().collect();
            if content.trim().is_empty() {
                continue;
            }
            chunks.push(DocumentChunk {
                content,
                metadata: ChunkMetadata {
                    source: document.source.clone(),
                    page: page.number,
                    chunk_index: index as u32,
                    start_char: span.start as u32,
                    end_char: span.end as u32,
                },
            });
        }
    }

    debug!(
        "Chunked '{}' ({} pages) into {} chunks",
        document.source,
        document.pages.len(),
        chunks.len()
    );

    chunks
}

/// Split free text into overlapping chunks
#[inline]
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = text.trim().chars().collect();
    split_spans(&chars, config)
        .into_iter()
        .map(|span| chars[span.start..span.end].iter().collect())
        .collect()
}

/// Compute chunk windows over `chars`.
///
/// Every span is at most `chunk_size` long and each span starts at least
/// `chunk_overlap` characters before the previous one ends.
fn split_spans(chars: &[char], config: &ChunkingConfig) -> Vec<Span> {
    let total = chars.len();
    let size = config.chunk_size.max(1);
    let overlap = config.chunk_overlap.min(size - 1);
    let separators: Vec<Vec<char>> = config
        .separators
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| s.chars().collect())
        .collect();

    let mut spans = Vec::new();
    if total == 0 {
        return spans;
    }

    let mut start = 0;
    let mut previous_end = 0;

    loop {
        if total - start <= size {
            spans.push(Span { start, end: total });
            break;
        }

        let hard_end = start + size;
        let min_end = (start + (size / 2).max(overlap + 1))
            .max(previous_end + 1)
            .min(hard_end);
        let end = find_break(chars, &separators, min_end, hard_end).unwrap_or(hard_end);

        spans.push(Span { start, end });

        let latest_start = end - overlap;
        start = (start + 1..=latest_start)
            .rev()
            .find(|&i| is_word_start(chars, i))
            .unwrap_or(latest_start);
        previous_end = end;
    }

    spans
}

/// Latest break point in `[min_end, max_end]` for the highest-priority separator present
fn find_break(
    chars: &[char],
    separators: &[Vec<char>],
    min_end: usize,
    max_end: usize,
) -> Option<usize> {
    for separator in separators {
        let kept = separator
            .iter()
            .rposition(|c| !c.is_whitespace())
            .map_or(0, |i| i + 1);

        let lowest = min_end.saturating_sub(kept);
        let highest = max_end.saturating_sub(kept);

        for position in (lowest..=highest).rev() {
            let matches = chars
                .get(position..position + separator.len())
                .is_some_and(|window| window == separator.as_slice());
            if !matches {
                continue;
            }

            let mut end = position + kept;
            while end > min_end && chars[end - 1].is_whitespace() {
                end -= 1;
            }
            return Some(end);
        }
    }

    None
}

fn is_word_start(chars: &[char], index: usize) -> bool {
    index > 0 && !chars[index].is_whitespace() && chars[index - 1].is_whitespace()
}
