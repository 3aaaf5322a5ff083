//! Core data models shared by the ingestion and query paths.
//!
//! These types represent the documents, chunks, and retrieval results that
//! flow through the pipeline. A query session (query text, retrieval results,
//! assembled prompt, answer) is ephemeral — nothing about it is persisted.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a document in the registry.
///
/// Transitions: `pending -> processing -> {indexed, failed}`. A `failed`
/// document is retryable — re-submitting it moves it back to `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Pending,
    Processing,
    Indexed,
    Failed,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Pending => "pending",
            IngestStatus::Processing => "processing",
            IngestStatus::Indexed => "indexed",
            IngestStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(IngestStatus::Pending),
            "processing" => Some(IngestStatus::Processing),
            "indexed" => Some(IngestStatus::Indexed),
            "failed" => Some(IngestStatus::Failed),
            _ => None,
        }
    }
}

/// A document tracked by the SQLite registry.
///
/// `source_key` is the identity within the document source (e.g. a relative
/// file path or an object key) and is unique. `last_indexed_hash` holds the
/// content hash of the most recently indexed version; an incoming document
/// with the same hash short-circuits re-ingestion.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: String,
    pub source_key: String,
    pub content_type: String,
    pub status: IngestStatus,
    pub last_indexed_hash: Option<String>,
    pub chunk_count: i64,
    pub failed_step: Option<String>,
    pub error: Option<String>,
    pub updated_at: i64,
}

/// A bounded span of a document's text — the unit of embedding and retrieval.
///
/// `start`/`end` are byte offsets into the extracted source text, so the
/// chunk text is exactly `text[start..end]` of the original. `chunk_index`
/// is zero-based and contiguous within a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub chunk_index: i64,
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// Nearest preceding Markdown heading, when the source has one.
    pub section: Option<String>,
}

/// A retrieved fragment with its similarity score and provenance.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub document_id: String,
    pub source_key: String,
    pub chunk_index: i64,
    pub score: f32,
    pub text: String,
    pub section: Option<String>,
}

/// A cited source attached to an answer. Only fragments that were actually
/// included in the generation prompt appear here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub document_id: String,
    pub source_key: String,
    pub chunk_index: i64,
    pub score: f32,
}

impl SourceRef {
    pub fn from_chunk(chunk: &ScoredChunk) -> Self {
        Self {
            document_id: chunk.document_id.clone(),
            source_key: chunk.source_key.clone(),
            chunk_index: chunk.chunk_index,
            score: chunk.score,
        }
    }
}

/// Outcome classification of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    /// The answer is grounded in retrieved fragments.
    Ok,
    /// No fragment scored above the threshold; a fixed refusal was returned.
    NoContext,
    /// No fragment scored above the threshold; the answer was generated
    /// without retrieved context and is explicitly marked as such.
    Ungrounded,
}

/// The externally observable result of a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub status: QueryStatus,
}
