// Document loading
// Reads the source PDF page by page


use std::path::Path;

use tracing::{debug, info, warn};

use crate::{Result, SevaiError};

/// One page of extracted text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDocument {
    /// Path the document was loaded from
    pub source: String,
    pub pages: Vec<Page>,
}

impl LoadedDocument {
    #[inline]
    pub fn total_chars(&self) -> usize {
        self.pages.iter().map(|p| p.text.chars().count()).sum()
    }
}

/// Load a PDF and extract the text of every page.
///
/// A missing or unreadable file is an error; a page whose text cannot be
/// extracted is kept as an empty page so page numbers stay aligned.
#[inline]
pub fn load_pdf(path: &Path) -> Result<LoadedDocument> {
    info!("Loading PDF document from {}", path.display());

    if !path.exists() {
        return Err(SevaiError::Document(format!(
            "Document not found: {}",
            path.display()
        )));
    }

    let document = lopdf::Document::load(path).map_err(|e| {
        SevaiError::Document(format!("Failed to parse PDF {}: {}", path.display(), e))
    })?;

    let mut pages = Vec::new();
    for page_number in document.get_pages().into_keys() {
        let text = match document.extract_text(&[page_number]) {
            Ok(text) => text,
            Err(e) => {
                warn!("Could not extract text from page {}: {}", page_number, e);
                String::new()
            }
        };
        debug!("Page {} has {} characters", page_number, text.len());
        pages.push(Page {
            number: page_number,
            text,
        });
    }

    let loaded = LoadedDocument {
        source: path.display().to_string(),
        pages,
    };

    info!(
        "Loaded {} pages ({} characters) from {}",
        loaded.pages.len(),
        loaded.total_chars(),
        loaded.source
    );

    Ok(loaded)
}
