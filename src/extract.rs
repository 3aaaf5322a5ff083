//! Text extraction from raw document bytes.
//!
//! Each [`Extractor`] turns one family of content types into plain text for
//! chunking. The registry dispatches on content type; a type no extractor
//! claims fails the document's `extract` step rather than being silently
//! skipped.

use anyhow::{bail, Context, Result};

/// Converts raw bytes of a supported content type into plain text.
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, content_type: &str) -> bool;

    fn extract(&self, bytes: &[u8], content_type: &str) -> Result<String>;
}

/// Passthrough extractor for `text/plain`.
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn name(&self) -> &'static str {
        "plain_text"
    }

    fn supports(&self, content_type: &str) -> bool {
        content_type == "text/plain"
    }

    fn extract(&self, bytes: &[u8], _content_type: &str) -> Result<String> {
        String::from_utf8(bytes.to_vec()).context("Document is not valid UTF-8")
    }
}

/// Extractor for `text/markdown`. Markdown is kept verbatim so heading
/// structure survives into chunk section labels.
pub struct MarkdownExtractor;

impl Extractor for MarkdownExtractor {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn supports(&self, content_type: &str) -> bool {
        content_type == "text/markdown"
    }

    fn extract(&self, bytes: &[u8], _content_type: &str) -> Result<String> {
        String::from_utf8(bytes.to_vec()).context("Document is not valid UTF-8")
    }
}

/// Ordered set of extractors; first match wins.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn with_defaults() -> Self {
        Self {
            extractors: vec![Box::new(MarkdownExtractor), Box::new(PlainTextExtractor)],
        }
    }

    pub fn extract(&self, bytes: &[u8], content_type: &str) -> Result<String> {
        for extractor in &self.extractors {
            if extractor.supports(content_type) {
                return extractor.extract(bytes, content_type);
            }
        }
        bail!("No extractor registered for content type: {}", content_type);
    }
}
