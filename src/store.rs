//! Vector store client abstraction.
//!
//! The vector index is an external system of record reached only through
//! the narrow [`VectorStore`] trait — no component holds an ambient handle
//! to a concrete backend. Two backends ship with the crate:
//!
//! - [`MemoryStore`](crate::store_memory::MemoryStore) — brute-force
//!   in-process search, used by tests and the `memory` backend setting.
//! - [`SqliteStore`](crate::store_sqlite::SqliteStore) — vectors stored as
//!   little-endian f32 BLOBs in the registry database, with transactional
//!   batch upserts.
//!
//! A collection fixes its embedding model, dimensionality, and similarity
//! metric at creation. [`VectorStore::ensure_collection`] validates those
//! against the active embedding configuration and fails at setup time —
//! a metric/model mismatch is a configuration error, never a query-time one.

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::error::InvalidRequest;

/// Similarity metric, fixed per collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Cosine,
    Dot,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Dot => "dot",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cosine" => Some(Metric::Cosine),
            "dot" => Some(Metric::Dot),
            _ => None,
        }
    }

    /// Score a candidate vector against a query vector.
    pub fn score(&self, query: &[f32], candidate: &[f32]) -> f32 {
        match self {
            Metric::Cosine => cosine_similarity(query, candidate),
            Metric::Dot => dot_product(query, candidate),
        }
    }
}

/// Fixed shape of a vector collection: which model produced its vectors,
/// their dimensionality, and the metric they are compared with.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSchema {
    pub name: String,
    pub model: String,
    pub dims: usize,
    pub metric: Metric,
}

/// A stored embedding record: one chunk's vector keyed by
/// `(document_id, chunk_index)`, carrying the fragment text and provenance
/// needed to build retrieval results without a second lookup.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub document_id: String,
    pub source_key: String,
    pub chunk_index: i64,
    pub vector: Vec<f32>,
    pub text: String,
    pub section: Option<String>,
}

/// Metadata restriction applied *before* ranking, so `top_k` always counts
/// matching results rather than truncating a pre-filter set.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub document_id: Option<String>,
    pub source_key: Option<String>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.document_id.is_none() && self.source_key.is_none()
    }

    pub fn matches(&self, document_id: &str, source_key: &str) -> bool {
        if let Some(ref want) = self.document_id {
            if want != document_id {
                return false;
            }
        }
        if let Some(ref want) = self.source_key {
            if want != source_key {
                return false;
            }
        }
        true
    }
}

/// A ranked search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document_id: String,
    pub source_key: String,
    pub chunk_index: i64,
    pub score: f32,
    pub text: String,
    pub section: Option<String>,
}

/// Narrow client interface over the external vector index.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if absent; validate its schema if present.
    /// A model/dims/metric mismatch with an existing collection is an error.
    async fn ensure_collection(&self, schema: &CollectionSchema) -> Result<()>;

    /// Insert or replace a batch of points, atomically: either every point
    /// lands or none do. Vectors must match the collection's dimensionality.
    async fn upsert_batch(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()>;

    /// Replace one document's points in a single atomic step: upsert the
    /// batch and remove stale indices at or past the batch length. Points
    /// must carry contiguous chunk indices starting at zero, the shape the
    /// chunker produces. An empty batch removes every point of the document.
    async fn replace_document(
        &self,
        collection: &str,
        document_id: &str,
        points: Vec<VectorPoint>,
    ) -> Result<()>;

    /// Delete specific chunk indices of one document.
    async fn delete(&self, collection: &str, document_id: &str, chunk_indices: &[i64])
        -> Result<()>;

    /// Chunk indices currently stored for a document.
    async fn chunk_indices(&self, collection: &str, document_id: &str) -> Result<Vec<i64>>;

    /// Top-`top_k` points by similarity to `query`, filter applied before
    /// ranking, scores non-increasing. `top_k` must be positive.
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>>;
}

/// Create the store backend named by the configuration. The SQLite backend
/// shares the registry's connection pool.
pub fn create_store(
    config: &crate::config::Config,
    pool: &sqlx::SqlitePool,
) -> Result<std::sync::Arc<dyn VectorStore>> {
    match config.store.backend.as_str() {
        "sqlite" => Ok(std::sync::Arc::new(crate::store_sqlite::SqliteStore::new(
            pool.clone(),
        ))),
        "memory" => Ok(std::sync::Arc::new(crate::store_memory::MemoryStore::new())),
        other => bail!("Unknown store backend: {}", other),
    }
}

/// Collection schema implied by the active embedding configuration.
/// Fails when embedding is disabled or under-specified; `ensure_collection`
/// then validates it against what the store already holds.
pub fn collection_schema(config: &crate::config::Config) -> Result<CollectionSchema> {
    let model = config
        .embedding
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.model is required to open a collection"))?;
    let dims = config
        .embedding
        .dims
        .ok_or_else(|| anyhow::anyhow!("embedding.dims is required to open a collection"))?;
    let metric = Metric::parse(&config.embedding.metric)
        .ok_or_else(|| anyhow::anyhow!("Unknown embedding.metric: {}", config.embedding.metric))?;

    Ok(CollectionSchema {
        name: config.store.collection.clone(),
        model,
        dims,
        metric,
    })
}

/// Validate a `top_k` argument; shared by both backends.
pub(crate) fn validate_top_k(top_k: usize) -> Result<()> {
    if top_k == 0 {
        return Err(InvalidRequest::new("top_k must be a positive integer").into());
    }
    Ok(())
}

/// Cosine similarity in `[-1, 1]`; 0.0 for mismatched or empty vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
