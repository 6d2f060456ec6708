//! In-process vector index.
//!
//! Sessions live in separate shards. The shard map lock is held only long
//! enough to find or create a shard, so writers to different sessions never
//! wait on each other. Each shard has its own lock; a vector is written
//! whole under it, never torn.

use super::hnsw::AnnGraph;
use super::{by_score_then, check_dimensions, check_session, dot, normalize, VectorIndex};
use crate::types::{Passage, Position, ScoredPassage, SessionId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use synapse_core::{AppError, AppResult};

type Fingerprint = (String, String, Position);

struct Entry {
    passage: Passage,
    /// Unit length
    vector: Vec<f32>,
}

#[derive(Default)]
struct Shard {
    /// Index in this vector is the ingestion sequence number
    entries: Vec<Entry>,
    fingerprints: HashSet<Fingerprint>,
    ann: Option<AnnGraph>,
}

impl Shard {
    fn insert(&mut self, passage: &Passage, vector: &[f32], ann_threshold: usize) -> bool {
        if !self.fingerprints.insert(passage.fingerprint()) {
            return false;
        }

        let seq = self.entries.len();
        let vector = normalize(vector);
        if let Some(ann) = self.ann.as_mut() {
            ann.insert(seq, &vector);
        }
        self.entries.push(Entry {
            passage: passage.clone(),
            vector,
        });

        if self.ann.is_none() && self.entries.len() >= ann_threshold {
            tracing::debug!(
                session = %passage.session_id,
                entries = self.entries.len(),
                "Building HNSW graph for session"
            );
            self.ann = Some(AnnGraph::build(
                self.entries.len() * 2,
                self.entries
                    .iter()
                    .enumerate()
                    .map(|(i, e)| (i, e.vector.as_slice())),
            ));
        }
        true
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<ScoredPassage> {
        let query = normalize(query);

        let is_zero = query.iter().all(|v| *v == 0.0);

        let mut scored: Vec<(f32, usize)> = match &self.ann {
            Some(ann) if !is_zero => {
                let wanted = (k * 4).max(32).min(self.entries.len());
                ann.candidates(&query, wanted)
                    .into_iter()
                    .filter_map(|seq| self.entries.get(seq).map(|e| (dot(&query, &e.vector), seq)))
                    .collect()
            }
            _ => self
                .entries
                .iter()
                .enumerate()
                .map(|(seq, e)| (dot(&query, &e.vector), seq))
                .collect(),
        };

        scored.sort_by(|a, b| by_score_then(*a, *b));
        scored.dedup_by_key(|(_, seq)| *seq);
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(score, seq)| ScoredPassage::new(self.entries[seq].passage.clone(), score))
            .collect()
    }
}

/// Vector index held entirely in memory.
pub struct MemoryVectorIndex {
    shards: RwLock<HashMap<SessionId, Arc<RwLock<Shard>>>>,
    dimensions: usize,
    ann_threshold: usize,
}

impl MemoryVectorIndex {
    /// `ann_threshold` is the shard size at which search switches from
    /// exact scans to the HNSW graph.
    pub fn new(dimensions: usize, ann_threshold: usize) -> Self {
        Self {
            shards: RwLock::new(HashMap::new()),
            dimensions,
            ann_threshold: ann_threshold.max(1),
        }
    }

    fn shard(&self, session: SessionId) -> AppResult<Option<Arc<RwLock<Shard>>>> {
        let shards = self.shards.read().map_err(poisoned)?;
        Ok(shards.get(&session).cloned())
    }

    fn shard_or_create(&self, session: SessionId) -> AppResult<Arc<RwLock<Shard>>> {
        if let Some(shard) = self.shard(session)? {
            return Ok(shard);
        }
        let mut shards = self.shards.write().map_err(poisoned)?;
        Ok(shards.entry(session).or_default().clone())
    }
}

fn poisoned<T>(_: T) -> AppError {
    AppError::Retrieval("memory index lock poisoned".to_string())
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn insert(
        &self,
        session: SessionId,
        passage: &Passage,
        vector: &[f32],
    ) -> AppResult<bool> {
        check_session(session, passage)?;
        check_dimensions(self.dimensions, vector)?;

        let shard = self.shard_or_create(session)?;
        let mut shard = shard.write().map_err(poisoned)?;
        Ok(shard.insert(passage, vector, self.ann_threshold))
    }

    async fn insert_batch(
        &self,
        session: SessionId,
        entries: &[(Passage, Vec<f32>)],
    ) -> AppResult<usize> {
        for (passage, vector) in entries {
            check_session(session, passage)?;
            check_dimensions(self.dimensions, vector)?;
        }

        let shard = self.shard_or_create(session)?;
        let mut shard = shard.write().map_err(poisoned)?;
        let mut added = 0;
        for (passage, vector) in entries {
            if shard.insert(passage, vector, self.ann_threshold) {
                added += 1;
            }
        }
        Ok(added)
    }

    async fn search(
        &self,
        session: SessionId,
        query: &[f32],
        k: usize,
    ) -> AppResult<Vec<ScoredPassage>> {
        check_dimensions(self.dimensions, query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let Some(shard) = self.shard(session)? else {
            return Ok(Vec::new());
        };
        let shard = shard.read().map_err(poisoned)?;
        Ok(shard.search(query, k))
    }

    async fn delete_session(&self, session: SessionId) -> AppResult<usize> {
        let removed = self.shards.write().map_err(poisoned)?.remove(&session);
        let count = match removed {
            Some(shard) => shard.read().map_err(poisoned)?.entries.len(),
            None => 0,
        };
        tracing::debug!(session = %session, removed = count, "Deleted session from memory index");
        Ok(count)
    }

    async fn count(&self, session: SessionId) -> AppResult<usize> {
        match self.shard(session)? {
            Some(shard) => Ok(shard.read().map_err(poisoned)?.entries.len()),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::content_hash;
    use crate::types::{DocumentId, PassageId};
    use chrono::Utc;

    fn passage(session: SessionId, text: &str, page: u32) -> Passage {
        Passage {
            id: PassageId::new(),
            session_id: session,
            document_id: DocumentId::new(),
            document_name: "doc.txt".to_string(),
            text: text.to_string(),
            position: Position {
                page,
                byte_start: 0,
                byte_end: text.len(),
            },
            ordinal: 0,
            ingested_at: Utc::now(),
            content_hash: content_hash(text),
        }
    }

    #[tokio::test]
    async fn test_search_ranks_by_cosine() {
        let index = MemoryVectorIndex::new(2, 1000);
        let session = SessionId::new();
        index
            .insert(session, &passage(session, "east", 1), &[1.0, 0.0])
            .await
            .unwrap();
        index
            .insert(session, &passage(session, "north", 2), &[0.0, 1.0])
            .await
            .unwrap();
        index
            .insert(session, &passage(session, "north-east", 3), &[1.0, 1.0])
            .await
            .unwrap();

        let results = index.search(session, &[0.9, 0.1], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].passage.text, "east");
        assert_eq!(results[1].passage.text, "north-east");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_ties_keep_ingestion_order() {
        let index = MemoryVectorIndex::new(2, 1000);
        let session = SessionId::new();
        for (i, text) in ["first", "second", "third"].iter().enumerate() {
            index
                .insert(session, &passage(session, text, i as u32 + 1), &[1.0, 0.0])
                .await
                .unwrap();
        }

        let results = index.search(session, &[1.0, 0.0], 3).await.unwrap();
        let texts: Vec<&str> = results.iter().map(|r| r.passage.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let index = MemoryVectorIndex::new(2, 1000);
        let a = SessionId::new();
        let b = SessionId::new();
        index.insert(a, &passage(a, "shared words", 1), &[1.0, 0.0]).await.unwrap();
        index.insert(b, &passage(b, "shared words", 1), &[1.0, 0.0]).await.unwrap();

        for session in [a, b] {
            let results = index.search(session, &[1.0, 0.0], 10).await.unwrap();
            assert_eq!(results.len(), 1);
            assert!(results.iter().all(|r| r.passage.session_id == session));
        }
    }

    #[tokio::test]
    async fn test_rejects_passage_from_other_session() {
        let index = MemoryVectorIndex::new(2, 1000);
        let a = SessionId::new();
        let b = SessionId::new();

        let err = index
            .insert(a, &passage(b, "intruder", 1), &[1.0, 0.0])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Retrieval(_)));
        assert_eq!(index.count(a).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_passages_are_ignored() {
        let index = MemoryVectorIndex::new(2, 1000);
        let session = SessionId::new();
        let p = passage(session, "same", 1);
        let mut again = p.clone();
        again.id = PassageId::new();

        assert!(index.insert(session, &p, &[1.0, 0.0]).await.unwrap());
        assert!(!index.insert(session, &again, &[1.0, 0.0]).await.unwrap());
        assert_eq!(index.count(session).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_session() {
        let index = MemoryVectorIndex::new(2, 1000);
        let a = SessionId::new();
        let b = SessionId::new();
        index.insert(a, &passage(a, "one", 1), &[1.0, 0.0]).await.unwrap();
        index.insert(a, &passage(a, "two", 2), &[0.0, 1.0]).await.unwrap();
        index.insert(b, &passage(b, "three", 1), &[1.0, 0.0]).await.unwrap();

        assert_eq!(index.delete_session(a).await.unwrap(), 2);
        assert!(index.search(a, &[1.0, 0.0], 5).await.unwrap().is_empty());
        assert_eq!(index.count(b).await.unwrap(), 1);
        assert_eq!(index.delete_session(a).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let index = MemoryVectorIndex::new(3, 1000);
        let session = SessionId::new();
        assert!(index
            .insert(session, &passage(session, "x", 1), &[1.0, 0.0])
            .await
            .is_err());
        assert!(index.search(session, &[1.0], 1).await.is_err());
    }

    #[tokio::test]
    async fn test_ann_path_agrees_with_exact_top_hit() {
        let exact = MemoryVectorIndex::new(3, usize::MAX);
        let ann = MemoryVectorIndex::new(3, 50);
        let session = SessionId::new();

        for i in 0..300u32 {
            let angle = i as f32 * 0.021;
            let vector = [angle.cos(), angle.sin(), 0.05];
            let p = passage(session, &format!("entry {}", i), i + 1);
            exact.insert(session, &p, &vector).await.unwrap();
            ann.insert(session, &p, &vector).await.unwrap();
        }

        let query = [(3.0f32).cos(), (3.0f32).sin(), 0.05];
        let want = exact.search(session, &query, 1).await.unwrap();
        let got = ann.search(session, &query, 1).await.unwrap();
        assert_eq!(want[0].passage.text, got[0].passage.text);
    }
}
