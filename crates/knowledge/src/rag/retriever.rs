//! Query-time passage retrieval.
//!
//! Embeds the question once, over-fetches candidates from the session's
//! index, drops weak matches, optionally reranks, and keeps the top `k`.

use crate::embeddings::Embedder;
use crate::index::VectorIndex;
use crate::rag::rerank::Reranker;
use crate::types::{ScoredPassage, SessionId};
use std::sync::Arc;
use std::time::Duration;
use synapse_core::{AppError, AppResult};

/// Delay before the single retry of a failed index search.
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Finds the passages of one session most relevant to a question.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<Embedder>,
    index: Arc<dyn VectorIndex>,
    reranker: Arc<dyn Reranker>,
    overfetch: usize,
    min_relevance: Option<f32>,
}

impl Retriever {
    pub fn new(
        embedder: Arc<Embedder>,
        index: Arc<dyn VectorIndex>,
        reranker: Arc<dyn Reranker>,
        overfetch: usize,
        min_relevance: Option<f32>,
    ) -> Self {
        Self {
            embedder,
            index,
            reranker,
            overfetch: overfetch.max(1),
            min_relevance,
        }
    }

    /// Return at most `k` passages of `session`, best first.
    ///
    /// An empty session, or a blank question, yields an empty list.
    #[tracing::instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn retrieve(
        &self,
        session: SessionId,
        query: &str,
        k: usize,
        rerank: bool,
    ) -> AppResult<Vec<ScoredPassage>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await?;
        let fetch = k.saturating_mul(self.overfetch);
        let candidates = self.search_with_retry(session, &vector, fetch).await?;
        let fetched = candidates.len();

        let mut candidates: Vec<ScoredPassage> = match self.min_relevance {
            Some(floor) => candidates.into_iter().filter(|c| c.score >= floor).collect(),
            None => candidates,
        };

        if rerank && candidates.len() > 1 {
            candidates = self.reranker.rerank(query, candidates);
        }
        candidates.truncate(k);

        tracing::debug!(
            fetched,
            kept = candidates.len(),
            reranker = if rerank { self.reranker.name() } else { "none" },
            "Retrieved passages"
        );

        Ok(candidates)
    }

    async fn search_with_retry(
        &self,
        session: SessionId,
        vector: &[f32],
        k: usize,
    ) -> AppResult<Vec<ScoredPassage>> {
        match self.index.search(session, vector, k).await {
            Err(AppError::Retrieval(reason)) => {
                tracing::warn!(%reason, "Index search failed, retrying once");
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.index.search(session, vector, k).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::content_hash;
    use crate::embeddings::providers::HashingProvider;
    use crate::index::MemoryVectorIndex;
    use crate::rag::rerank::{LexicalReranker, NoopReranker};
    use crate::types::{DocumentId, Passage, PassageId, Position};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn embedder() -> Arc<Embedder> {
        Arc::new(Embedder::new(
            Arc::new(HashingProvider::new("hashing-v1", 128)),
            Duration::from_secs(5),
            16,
        ))
    }

    fn passage(session: SessionId, text: &str, page: u32) -> Passage {
        Passage {
            id: PassageId::new(),
            session_id: session,
            document_id: DocumentId::new(),
            document_name: "handbook.txt".to_string(),
            text: text.to_string(),
            position: Position {
                page,
                byte_start: 0,
                byte_end: text.len(),
            },
            ordinal: page - 1,
            ingested_at: Utc::now(),
            content_hash: content_hash(text),
        }
    }

    async fn seeded(texts: &[&str]) -> (Arc<Embedder>, Arc<MemoryVectorIndex>, SessionId) {
        let embedder = embedder();
        let index = Arc::new(MemoryVectorIndex::new(128, 1000));
        let session = SessionId::new();
        for (i, text) in texts.iter().enumerate() {
            let vector = embedder.embed(text).await.unwrap();
            index
                .insert(session, &passage(session, text, i as u32 + 1), &vector)
                .await
                .unwrap();
        }
        (embedder, index, session)
    }

    #[tokio::test]
    async fn test_empty_session_returns_nothing() {
        let (embedder, index, _) = seeded(&["something"]).await;
        let retriever = Retriever::new(embedder, index, Arc::new(NoopReranker), 3, None);

        let results = retriever
            .retrieve(SessionId::new(), "What is this about?", 3, true)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_returns_at_most_k_best_first() {
        let (embedder, index, session) = seeded(&[
            "Vacation policy: employees receive twenty vacation days.",
            "Parking is available behind the building.",
            "Expense reports are due monthly.",
            "Vacation requests need manager approval.",
        ])
        .await;
        let retriever = Retriever::new(embedder, index, Arc::new(LexicalReranker::default()), 3, None);

        let results = retriever
            .retrieve(session, "How many vacation days do employees get?", 2, true)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].passage.text.contains("Vacation"));
    }

    #[tokio::test]
    async fn test_min_relevance_filters_candidates() {
        let (embedder, index, session) =
            seeded(&["Quantum chromodynamics lecture notes", "Banana bread recipe"]).await;
        let retriever = Retriever::new(embedder, index, Arc::new(NoopReranker), 3, Some(0.99));

        let results = retriever
            .retrieve(session, "banana bread", 3, false)
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.score >= 0.99));
        assert!(!results.iter().any(|r| r.passage.text.contains("Quantum")));
    }

    #[tokio::test]
    async fn test_retrieval_is_deterministic() {
        let (embedder, index, session) = seeded(&[
            "Rust ownership moves values.",
            "Borrowing lets code use values without owning them.",
            "Lifetimes describe how long references live.",
        ])
        .await;
        let retriever = Retriever::new(embedder, index, Arc::new(LexicalReranker::default()), 3, None);

        let ids = |r: Vec<ScoredPassage>| r.into_iter().map(|p| p.passage.id).collect::<Vec<_>>();
        let first = ids(retriever.retrieve(session, "how does borrowing work", 3, true).await.unwrap());
        let second = ids(retriever.retrieve(session, "how does borrowing work", 3, true).await.unwrap());
        assert_eq!(first, second);
    }

    /// Embeds every text to the same unit vector.
    #[derive(Debug)]
    struct FixedProvider;

    #[async_trait]
    impl crate::embeddings::EmbeddingProvider for FixedProvider {
        fn provider_name(&self) -> &str {
            "fixed"
        }

        fn model_name(&self) -> &str {
            "fixed"
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_negative_similarity_candidates_are_kept() {
        let embedder = Arc::new(Embedder::new(Arc::new(FixedProvider), Duration::from_secs(5), 8));
        let index = Arc::new(MemoryVectorIndex::new(2, 1000));
        let session = SessionId::new();
        index
            .insert(session, &passage(session, "opposite", 1), &[-1.0, 0.1])
            .await
            .unwrap();
        index
            .insert(session, &passage(session, "mostly orthogonal", 2), &[-0.5, -1.0])
            .await
            .unwrap();

        let retriever = Retriever::new(embedder, index, Arc::new(NoopReranker), 3, None);
        let results = retriever.retrieve(session, "anything", 2, false).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.score < 0.0));
        assert_eq!(results[0].passage.text, "mostly orthogonal");
    }

    struct FlakyIndex {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VectorIndex for FlakyIndex {
        fn backend_name(&self) -> &'static str {
            "flaky"
        }

        async fn insert(&self, _: SessionId, _: &Passage, _: &[f32]) -> AppResult<bool> {
            Ok(true)
        }

        async fn search(&self, _: SessionId, _: &[f32], _: usize) -> AppResult<Vec<ScoredPassage>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AppError::Retrieval("connection reset".to_string()))
            } else {
                Ok(Vec::new())
            }
        }

        async fn delete_session(&self, _: SessionId) -> AppResult<usize> {
            Ok(0)
        }

        async fn count(&self, _: SessionId) -> AppResult<usize> {
            Ok(0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_index_failure_is_retried_once() {
        let index = Arc::new(FlakyIndex {
            calls: AtomicUsize::new(0),
        });
        let retriever = Retriever::new(embedder(), index.clone(), Arc::new(NoopReranker), 3, None);

        let results = retriever.retrieve(SessionId::new(), "anything", 3, true).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(index.calls.load(Ordering::SeqCst), 2);
    }
}
