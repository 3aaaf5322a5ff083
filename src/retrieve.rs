//! Semantic retrieval over the vector store.
//!
//! Embeds the query with the same model the collection was indexed with,
//! searches with the caller's filter, then applies the relevance floor and
//! deduplicates. Results below `min_score` are dropped entirely — an empty
//! result is a normal outcome the answer layer must handle, not an error.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::InvalidRequest;
use crate::models::ScoredChunk;
use crate::store::{SearchFilter, VectorStore};

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    collection: String,
    min_score: f32,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        collection: String,
        min_score: f32,
    ) -> Self {
        Self {
            embedder,
            store,
            collection,
            min_score,
        }
    }

    /// Top fragments for a query, best first.
    ///
    /// A blank query returns no results without calling the embedding
    /// service. `top_k` must be positive.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 {
            return Err(InvalidRequest::new("top_k must be a positive integer").into());
        }
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed query")?;
        let hits = self
            .store
            .search(&self.collection, &vector, top_k, filter)
            .await?;

        let mut seen: HashSet<(String, i64)> = HashSet::new();
        let mut results: Vec<ScoredChunk> = Vec::with_capacity(hits.len());
        for hit in hits {
            if hit.score < self.min_score {
                continue;
            }
            if !seen.insert((hit.document_id.clone(), hit.chunk_index)) {
                continue;
            }
            results.push(ScoredChunk {
                document_id: hit.document_id,
                source_key: hit.source_key,
                chunk_index: hit.chunk_index,
                score: hit.score,
                text: hit.text,
                section: hit.section,
            });
        }

        // Backends return ranked hits; keep the contract explicit anyway.
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::store::{CollectionSchema, Metric, VectorPoint};
    use crate::store_memory::MemoryStore;
    use async_trait::async_trait;

    const DIMS: usize = 4;

    struct HashEmbedder;

    impl HashEmbedder {
        fn vector_for(text: &str) -> Vec<f32> {
            let mut v = vec![0.0f32; DIMS];
            for (i, b) in text.bytes().enumerate() {
                v[i % DIMS] += b as f32 / 255.0;
            }
            v
        }
    }

    #[async_trait]
    impl Embedder for HashEmbedder {
        fn model_id(&self) -> &str {
            "hash-test"
        }

        fn dims(&self) -> usize {
            DIMS
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
            Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
        }
    }

    async fn store_with(points: Vec<(&str, i64, &str)>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .ensure_collection(&CollectionSchema {
                name: "main".to_string(),
                model: "hash-test".to_string(),
                dims: DIMS,
                metric: Metric::Cosine,
            })
            .await
            .unwrap();
        let points: Vec<VectorPoint> = points
            .into_iter()
            .map(|(doc, index, text)| VectorPoint {
                document_id: doc.to_string(),
                source_key: format!("{doc}.md"),
                chunk_index: index,
                vector: HashEmbedder::vector_for(text),
                text: text.to_string(),
                section: None,
            })
            .collect();
        store.upsert_batch("main", points).await.unwrap();
        store
    }

    fn retriever(store: Arc<MemoryStore>, min_score: f32) -> Retriever {
        Retriever::new(Arc::new(HashEmbedder), store, "main".to_string(), min_score)
    }

    #[tokio::test]
    async fn test_results_sorted_best_first() {
        let store = store_with(vec![
            ("d1", 0, "rust borrow checker rules"),
            ("d2", 0, "gardening in early spring"),
        ])
        .await;
        let retriever = retriever(store, 0.0);

        let results = retriever
            .retrieve("rust borrow checker", 5, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document_id, "d1");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_min_score_floor_applied() {
        let store = store_with(vec![("d1", 0, "anything at all")]).await;
        let retriever = retriever(store, 1.1); // above the cosine maximum

        let results = retriever
            .retrieve("anything at all", 5, &SearchFilter::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_blank_query_returns_empty() {
        let store = store_with(vec![("d1", 0, "content")]).await;
        let retriever = retriever(store, 0.0);

        let results = retriever
            .retrieve("   \n", 5, &SearchFilter::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_zero_top_k_rejected_with_typed_error() {
        let store = store_with(vec![]).await;
        let retriever = retriever(store, 0.0);
        let err = retriever
            .retrieve("query", 0, &SearchFilter::default())
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<InvalidRequest>().is_some());
    }

    #[tokio::test]
    async fn test_filter_restricts_results() {
        let store = store_with(vec![
            ("d1", 0, "shared topic text"),
            ("d2", 0, "shared topic text"),
        ])
        .await;
        let retriever = retriever(store, 0.0);

        let filter = SearchFilter {
            document_id: Some("d2".to_string()),
            source_key: None,
        };
        let results = retriever
            .retrieve("shared topic", 5, &filter)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, "d2");
    }
}
