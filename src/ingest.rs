//! Document ingestion pipeline.
//!
//! Each document moves through a fixed sequence of steps:
//!
//! | Step     | Work                                               |
//! |----------|----------------------------------------------------|
//! | fetch    | pull raw bytes from the document source            |
//! | extract  | convert bytes to plain text                        |
//! | chunk    | split text into bounded, overlapping fragments     |
//! | embed    | batch-embed every fragment                         |
//! | upsert   | atomically write all points and prune stale ones   |
//!
//! Two invariants shape the control flow. First, embedding completes for
//! *every* chunk before the store is touched, so a mid-batch model failure
//! leaves the previously indexed version fully queryable. Second, at most
//! one ingestion runs per document at a time: an in-flight set guards each
//! source key, and a concurrent submission for the same key returns
//! [`IngestOutcome::Busy`] instead of racing.
//!
//! A content hash of the extracted text short-circuits re-ingestion of
//! unchanged documents before any model call is made.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::embedding::Embedder;
use crate::extract::ExtractorRegistry;
use crate::models::{Chunk, DocumentRecord, IngestStatus};
use crate::source::DocumentSource;
use crate::store::{VectorPoint, VectorStore};

// ============================================================================
// Steps and outcomes
// ============================================================================

/// Pipeline step names, recorded in the registry on failure so `status`
/// output can say where a document got stuck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStep {
    Fetch,
    Extract,
    Chunk,
    Embed,
    Upsert,
}

impl IngestStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStep::Fetch => "fetch",
            IngestStep::Extract => "extract",
            IngestStep::Chunk => "chunk",
            IngestStep::Embed => "embed",
            IngestStep::Upsert => "upsert",
        }
    }
}

/// Result of one ingestion attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// The document was (re)indexed with this many chunks.
    Indexed { chunks: usize },
    /// Content hash matched the last indexed version; nothing to do.
    Unchanged,
    /// Another ingestion of the same document is already running.
    Busy,
    /// A step failed; the registry records the step and error.
    Failed { step: IngestStep, error: String },
}

// ============================================================================
// In-flight guard
// ============================================================================

/// RAII guard over the per-document in-flight set. Releasing on drop covers
/// every exit path, including task cancellation.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<String>>>, key: &str) -> Option<Self> {
        let mut in_flight = set.lock().ok()?;
        if !in_flight.insert(key.to_string()) {
            return None;
        }
        Some(Self {
            set: Arc::clone(set),
            key: key.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.set.lock() {
            in_flight.remove(&self.key);
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct IngestPipeline {
    pool: SqlitePool,
    source: Arc<dyn DocumentSource>,
    extractors: Arc<ExtractorRegistry>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    collection: String,
    chunking: ChunkingConfig,
    batch_size: usize,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl IngestPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        source: Arc<dyn DocumentSource>,
        extractors: Arc<ExtractorRegistry>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        collection: String,
        chunking: ChunkingConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            pool,
            source,
            extractors,
            embedder,
            store,
            collection,
            chunking,
            batch_size: batch_size.max(1),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn source(&self) -> &Arc<dyn DocumentSource> {
        &self.source
    }

    /// Run the full pipeline for one source key.
    ///
    /// Infrastructure failures (registry unreachable) surface as `Err`;
    /// per-document step failures are recorded in the registry and returned
    /// as [`IngestOutcome::Failed`].
    pub async fn ingest(&self, source_key: &str) -> Result<IngestOutcome> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, source_key) else {
            return Ok(IngestOutcome::Busy);
        };

        let record = load_or_create_document(&self.pool, source_key).await?;
        set_status(&self.pool, &record.id, IngestStatus::Processing).await?;

        match self.process(&record).await {
            Ok(ProcessResult::Unchanged) => {
                set_status(&self.pool, &record.id, IngestStatus::Indexed).await?;
                tracing::debug!(source_key, "content unchanged, skipping re-index");
                Ok(IngestOutcome::Unchanged)
            }
            Ok(ProcessResult::Indexed {
                hash,
                content_type,
                chunks,
            }) => {
                mark_indexed(&self.pool, &record.id, &hash, &content_type, chunks as i64).await?;
                tracing::info!(source_key, chunks, "document indexed");
                Ok(IngestOutcome::Indexed { chunks })
            }
            Err((step, err)) => {
                let error = format!("{err:#}");
                mark_failed(&self.pool, &record.id, step.as_str(), &error).await?;
                tracing::warn!(source_key, step = step.as_str(), error = %error, "ingestion failed");
                Ok(IngestOutcome::Failed { step, error })
            }
        }
    }

    async fn process(
        &self,
        record: &DocumentRecord,
    ) -> std::result::Result<ProcessResult, (IngestStep, anyhow::Error)> {
        let raw = self
            .source
            .fetch(&record.source_key)
            .await
            .map_err(|e| (IngestStep::Fetch, e))?;

        let text = self
            .extractors
            .extract(&raw.bytes, &raw.content_type)
            .map_err(|e| (IngestStep::Extract, e))?;

        let hash = content_hash(&text);
        if record.last_indexed_hash.as_deref() == Some(hash.as_str()) {
            return Ok(ProcessResult::Unchanged);
        }

        let chunks = chunk_text(&text, self.chunking.max_chars, self.chunking.overlap_chars);

        // Every chunk must embed successfully before the store is touched.
        let vectors = self
            .embed_all(&chunks)
            .await
            .map_err(|e| (IngestStep::Embed, e))?;

        let points: Vec<VectorPoint> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorPoint {
                document_id: record.id.clone(),
                source_key: record.source_key.clone(),
                chunk_index: chunk.chunk_index,
                vector,
                text: chunk.text.clone(),
                section: chunk.section.clone(),
            })
            .collect();

        // One atomic store operation replaces the document: the upsert and
        // the removal of any stale tail from a longer previous version
        // commit together.
        self.store
            .replace_document(&self.collection, &record.id, points)
            .await
            .map_err(|e| (IngestStep::Upsert, e))?;

        Ok(ProcessResult::Indexed {
            hash,
            content_type: raw.content_type,
            chunks: chunks.len(),
        })
    }

    async fn embed_all(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let batch_vectors = self
                .embedder
                .embed_batch(&texts)
                .await
                .context("Failed to embed chunk batch")?;
            vectors.extend(batch_vectors);
        }
        Ok(vectors)
    }

    /// Whether an ingestion of this document is currently running.
    pub fn is_ingesting(&self, source_key: &str) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(source_key))
            .unwrap_or(false)
    }
}

enum ProcessResult {
    Unchanged,
    Indexed {
        hash: String,
        content_type: String,
        chunks: usize,
    },
}

fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ============================================================================
// Worker queue
// ============================================================================

/// Whether a submission was queued or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitResult {
    Accepted,
    QueueFull,
}

/// Bounded submission queue feeding the ingestion workers.
#[derive(Clone)]
pub struct IngestQueue {
    tx: flume::Sender<String>,
}

impl IngestQueue {
    pub fn submit(&self, source_key: &str) -> SubmitResult {
        match self.tx.try_send(source_key.to_string()) {
            Ok(()) => SubmitResult::Accepted,
            Err(_) => SubmitResult::QueueFull,
        }
    }
}

/// Start `workers` tasks draining a bounded queue of source keys.
pub fn spawn_workers(
    pipeline: Arc<IngestPipeline>,
    workers: usize,
    queue_depth: usize,
) -> IngestQueue {
    let (tx, rx) = flume::bounded::<String>(queue_depth);

    for worker_id in 0..workers.max(1) {
        let rx = rx.clone();
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            while let Ok(source_key) = rx.recv_async().await {
                match pipeline.ingest(&source_key).await {
                    Ok(outcome) => {
                        tracing::debug!(worker_id, %source_key, ?outcome, "ingestion finished")
                    }
                    Err(err) => {
                        tracing::error!(worker_id, %source_key, error = %err, "ingestion errored")
                    }
                }
            }
        });
    }

    IngestQueue { tx }
}

// ============================================================================
// Registry queries
// ============================================================================

async fn load_or_create_document(pool: &SqlitePool, source_key: &str) -> Result<DocumentRecord> {
    if let Some(record) = get_document(pool, source_key).await? {
        return Ok(record);
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO documents (id, source_key, content_type, status, updated_at)
         VALUES (?, ?, 'text/plain', ?, ?)",
    )
    .bind(&id)
    .bind(source_key)
    .bind(IngestStatus::Pending.as_str())
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create document record")?;

    get_document(pool, source_key)
        .await?
        .ok_or_else(|| anyhow::anyhow!("document vanished after insert: {}", source_key))
}

pub async fn get_document(pool: &SqlitePool, source_key: &str) -> Result<Option<DocumentRecord>> {
    let row = sqlx::query("SELECT * FROM documents WHERE source_key = ?")
        .bind(source_key)
        .fetch_optional(pool)
        .await
        .context("Failed to load document record")?;
    row.map(|r| row_to_record(&r)).transpose()
}

/// All registered documents, ordered by source key.
pub async fn list_documents(pool: &SqlitePool) -> Result<Vec<DocumentRecord>> {
    let rows = sqlx::query("SELECT * FROM documents ORDER BY source_key")
        .fetch_all(pool)
        .await
        .context("Failed to list documents")?;
    rows.iter().map(row_to_record).collect()
}

async fn set_status(pool: &SqlitePool, id: &str, status: IngestStatus) -> Result<()> {
    sqlx::query("UPDATE documents SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update document status")?;
    Ok(())
}

async fn mark_indexed(
    pool: &SqlitePool,
    id: &str,
    hash: &str,
    content_type: &str,
    chunk_count: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE documents
         SET status = ?, last_indexed_hash = ?, content_type = ?, chunk_count = ?,
             failed_step = NULL, error = NULL, updated_at = ?
         WHERE id = ?",
    )
    .bind(IngestStatus::Indexed.as_str())
    .bind(hash)
    .bind(content_type)
    .bind(chunk_count)
    .bind(chrono::Utc::now().timestamp())
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to mark document indexed")?;
    Ok(())
}

async fn mark_failed(pool: &SqlitePool, id: &str, step: &str, error: &str) -> Result<()> {
    sqlx::query(
        "UPDATE documents
         SET status = ?, failed_step = ?, error = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(IngestStatus::Failed.as_str())
    .bind(step)
    .bind(error)
    .bind(chrono::Utc::now().timestamp())
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to mark document failed")?;
    Ok(())
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<DocumentRecord> {
    let status_str: String = row.get("status");
    let status = IngestStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("corrupt status in document row: {}", status_str))?;
    Ok(DocumentRecord {
        id: row.get("id"),
        source_key: row.get("source_key"),
        content_type: row.get("content_type"),
        status,
        last_indexed_hash: row.get("last_indexed_hash"),
        chunk_count: row.get("chunk_count"),
        failed_step: row.get("failed_step"),
        error: row.get("error"),
        updated_at: row.get("updated_at"),
    })
}

// ============================================================================
// Tests
// ============================================================================
