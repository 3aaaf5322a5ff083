//! In-process vector store backend.
//!
//! Keeps collections in a `RwLock`-guarded map and scores every point on
//! each search. Brute force is fine at this scale; the backend exists for
//! tests and for the `memory` store setting, where the index lives only as
//! long as the process.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::store::{
    validate_top_k, CollectionSchema, SearchFilter, SearchHit, VectorPoint, VectorStore,
};

struct Collection {
    schema: CollectionSchema,
    // Keyed by (document_id, chunk_index).
    points: HashMap<(String, i64), VectorPoint>,
}

/// Volatile [`VectorStore`] backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of points currently stored in a collection. Test helper.
    pub fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|c| c.get(collection).map(|col| col.points.len()).unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, schema: &CollectionSchema) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;

        match collections.get(&schema.name) {
            Some(existing) => {
                if existing.schema != *schema {
                    bail!(
                        "collection '{}' exists with model={} dims={} metric={}, but config specifies model={} dims={} metric={}",
                        schema.name,
                        existing.schema.model,
                        existing.schema.dims,
                        existing.schema.metric.as_str(),
                        schema.model,
                        schema.dims,
                        schema.metric.as_str(),
                    );
                }
            }
            None => {
                collections.insert(
                    schema.name.clone(),
                    Collection {
                        schema: schema.clone(),
                        points: HashMap::new(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn upsert_batch(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let mut collections = self
            .collections
            .write()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        let col = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow::anyhow!("unknown collection: {}", collection))?;

        // Validate the whole batch before touching the map so a bad point
        // cannot leave a partial write behind.
        for point in &points {
            if point.vector.len() != col.schema.dims {
                bail!(
                    "vector for {}#{} has {} dims, collection '{}' expects {}",
                    point.document_id,
                    point.chunk_index,
                    point.vector.len(),
                    collection,
                    col.schema.dims,
                );
            }
        }

        for point in points {
            col.points
                .insert((point.document_id.clone(), point.chunk_index), point);
        }
        Ok(())
    }

    async fn replace_document(
        &self,
        collection: &str,
        document_id: &str,
        points: Vec<VectorPoint>,
    ) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        let col = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow::anyhow!("unknown collection: {}", collection))?;

        for point in &points {
            if point.vector.len() != col.schema.dims {
                bail!(
                    "vector for {}#{} has {} dims, collection '{}' expects {}",
                    point.document_id,
                    point.chunk_index,
                    point.vector.len(),
                    collection,
                    col.schema.dims,
                );
            }
        }

        // Upsert and stale-tail removal happen under one write lock.
        let new_count = points.len() as i64;
        for point in points {
            col.points
                .insert((point.document_id.clone(), point.chunk_index), point);
        }
        col.points
            .retain(|(doc, index), _| doc != document_id || *index < new_count);
        Ok(())
    }

    async fn delete(
        &self,
        collection: &str,
        document_id: &str,
        chunk_indices: &[i64],
    ) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        let col = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow::anyhow!("unknown collection: {}", collection))?;

        for index in chunk_indices {
            col.points.remove(&(document_id.to_string(), *index));
        }
        Ok(())
    }

    async fn chunk_indices(&self, collection: &str, document_id: &str) -> Result<Vec<i64>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        let col = collections
            .get(collection)
            .ok_or_else(|| anyhow::anyhow!("unknown collection: {}", collection))?;

        let mut indices: Vec<i64> = col
            .points
            .keys()
            .filter(|(doc, _)| doc == document_id)
            .map(|(_, index)| *index)
            .collect();
        indices.sort_unstable();
        Ok(indices)
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        validate_top_k(top_k)?;

        let collections = self
            .collections
            .read()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        let col = collections
            .get(collection)
            .ok_or_else(|| anyhow::anyhow!("unknown collection: {}", collection))?;

        if query.len() != col.schema.dims {
            bail!(
                "query vector has {} dims, collection '{}' expects {}",
                query.len(),
                collection,
                col.schema.dims,
            );
        }

        let mut hits: Vec<SearchHit> = col
            .points
            .values()
            .filter(|p| filter.matches(&p.document_id, &p.source_key))
            .map(|p| SearchHit {
                document_id: p.document_id.clone(),
                source_key: p.source_key.clone(),
                chunk_index: p.chunk_index,
                score: col.schema.metric.score(query, &p.vector),
                text: p.text.clone(),
                section: p.section.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }
}
