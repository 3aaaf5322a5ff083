//! Query orchestration: retrieve, assemble, generate, cite.
//!
//! The orchestrator owns the read path end to end. Its one policy decision
//! is what to do when retrieval comes back empty: `refuse` returns a fixed
//! answer without ever calling the generator, `ungrounded` generates from
//! the bare question and labels the result. Either way the caller can tell
//! from [`QueryStatus`](crate::models::QueryStatus) whether the answer is
//! backed by indexed content.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::error::InvalidRequest;
use crate::generate::{GenerateOptions, Generator};
use crate::models::{QueryResponse, QueryStatus, SourceRef};
use crate::prompt::{assemble, assemble_ungrounded};
use crate::retrieve::Retriever;
use crate::store::SearchFilter;

/// Fixed refusal returned under the `refuse` policy.
pub const NO_CONTEXT_ANSWER: &str =
    "I don't have any indexed content relevant to that question.";

/// Behavior when no fragment clears the relevance floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoContextPolicy {
    Refuse,
    Ungrounded,
}

impl NoContextPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "refuse" => Some(NoContextPolicy::Refuse),
            "ungrounded" => Some(NoContextPolicy::Ungrounded),
            _ => None,
        }
    }
}

pub struct QueryOrchestrator {
    retriever: Retriever,
    generator: Arc<dyn Generator>,
    policy: NoContextPolicy,
    context_budget_chars: usize,
    options: GenerateOptions,
}

impl QueryOrchestrator {
    pub fn new(
        retriever: Retriever,
        generator: Arc<dyn Generator>,
        policy: NoContextPolicy,
        context_budget_chars: usize,
        options: GenerateOptions,
    ) -> Self {
        Self {
            retriever,
            generator,
            policy,
            context_budget_chars,
            options,
        }
    }

    /// Answer a question against the indexed corpus.
    pub async fn answer(
        &self,
        query: &str,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<QueryResponse> {
        if query.trim().is_empty() {
            return Err(InvalidRequest::new("query must not be empty").into());
        }

        let fragments = self.retriever.retrieve(query, top_k, filter).await?;

        if fragments.is_empty() {
            return match self.policy {
                NoContextPolicy::Refuse => Ok(QueryResponse {
                    answer: NO_CONTEXT_ANSWER.to_string(),
                    sources: Vec::new(),
                    status: QueryStatus::NoContext,
                }),
                NoContextPolicy::Ungrounded => {
                    let answer = self
                        .generator
                        .generate(&assemble_ungrounded(query), &self.options)
                        .await
                        .context("Generation failed")?;
                    Ok(QueryResponse {
                        answer,
                        sources: Vec::new(),
                        status: QueryStatus::Ungrounded,
                    })
                }
            };
        }

        let prompt = assemble(query, &fragments, self.context_budget_chars);
        let answer = self
            .generator
            .generate(&prompt.text, &self.options)
            .await
            .context("Generation failed")?;

        // Cite only what was actually in the prompt.
        let sources = prompt.included.iter().map(SourceRef::from_chunk).collect();
        Ok(QueryResponse {
            answer,
            sources,
            status: QueryStatus::Ok,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedder;
    use crate::error::ModelError;
    use crate::store::{CollectionSchema, Metric, VectorPoint, VectorStore};
    use crate::store_memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

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

    /// Returns a fixed answer and counts invocations, so refusal tests can
    /// prove the generator was never consulted.
    struct CannedGenerator {
        calls: AtomicUsize,
    }

    impl CannedGenerator {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Generator for CannedGenerator {
        fn model_id(&self) -> &str {
            "canned"
        }

        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerateOptions,
        ) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("Canned answer.".to_string())
        }
    }

    async fn orchestrator_with(
        points: Vec<(&str, i64, &str)>,
        min_score: f32,
        policy: NoContextPolicy,
    ) -> (QueryOrchestrator, Arc<CannedGenerator>) {
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

        let retriever = Retriever::new(
            Arc::new(HashEmbedder),
            store,
            "main".to_string(),
            min_score,
        );
        let generator = Arc::new(CannedGenerator::new());
        let orchestrator = QueryOrchestrator::new(
            retriever,
            generator.clone(),
            policy,
            1000,
            GenerateOptions::default(),
        );
        (orchestrator, generator)
    }

    #[tokio::test]
    async fn test_grounded_answer_cites_sources() {
        let (orchestrator, generator) = orchestrator_with(
            vec![("d1", 0, "The capital of France is Paris.")],
            0.0,
            NoContextPolicy::Refuse,
        )
        .await;

        let response = orchestrator
            .answer("capital of France", 5, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(response.status, QueryStatus::Ok);
        assert_eq!(response.answer, "Canned answer.");
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].source_key, "d1.md");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refuse_policy_skips_generator() {
        let (orchestrator, generator) =
            orchestrator_with(vec![], 0.0, NoContextPolicy::Refuse).await;

        let response = orchestrator
            .answer("anything", 5, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(response.status, QueryStatus::NoContext);
        assert_eq!(response.answer, NO_CONTEXT_ANSWER);
        assert!(response.sources.is_empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ungrounded_policy_generates_without_context() {
        let (orchestrator, generator) =
            orchestrator_with(vec![], 0.0, NoContextPolicy::Ungrounded).await;

        let response = orchestrator
            .answer("anything", 5, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(response.status, QueryStatus::Ungrounded);
        assert_eq!(response.answer, "Canned answer.");
        assert!(response.sources.is_empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_query_rejected_with_typed_error() {
        let (orchestrator, _) = orchestrator_with(vec![], 0.0, NoContextPolicy::Refuse).await;
        let err = orchestrator
            .answer("  ", 5, &SearchFilter::default())
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<InvalidRequest>().is_some());
    }

    #[tokio::test]
    async fn test_sources_limited_to_prompt_budget() {
        // Second fragment exceeds the tiny budget and must not be cited.
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
        let big = "x".repeat(200);
        store
            .upsert_batch(
                "main",
                vec![
                    VectorPoint {
                        document_id: "d1".to_string(),
                        source_key: "d1.md".to_string(),
                        chunk_index: 0,
                        vector: HashEmbedder::vector_for("relevant text"),
                        text: "relevant text".to_string(),
                        section: None,
                    },
                    VectorPoint {
                        document_id: "d2".to_string(),
                        source_key: "d2.md".to_string(),
                        chunk_index: 0,
                        vector: HashEmbedder::vector_for("relevant text too"),
                        text: big.clone(),
                        section: None,
                    },
                ],
            )
            .await
            .unwrap();

        let retriever =
            Retriever::new(Arc::new(HashEmbedder), store, "main".to_string(), 0.0);
        let orchestrator = QueryOrchestrator::new(
            retriever,
            Arc::new(CannedGenerator::new()),
            NoContextPolicy::Refuse,
            50,
            GenerateOptions::default(),
        );

        let response = orchestrator
            .answer("relevant text", 5, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].document_id, "d1");
    }
}
