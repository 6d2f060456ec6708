//! Per-session vector storage.
//!
//! Every operation is scoped by [`SessionId`]. A search never returns a
//! passage inserted under a different session; backends filter by session
//! and re-check every row before returning it.

mod hnsw;
pub mod lance;
pub mod memory;

pub use lance::LanceDbIndex;
pub use memory::MemoryVectorIndex;

use crate::config::{IndexBackend, PipelineConfig};
use crate::types::{Passage, ScoredPassage, SessionId};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;
use synapse_core::{AppError, AppResult};

/// Storage of `(passage, vector)` entries keyed by session.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Add one entry. Returns `false` when an identical passage (same
    /// content, document and position) is already stored for the session.
    async fn insert(&self, session: SessionId, passage: &Passage, vector: &[f32])
        -> AppResult<bool>;

    /// Add many entries; returns how many were new.
    async fn insert_batch(
        &self,
        session: SessionId,
        entries: &[(Passage, Vec<f32>)],
    ) -> AppResult<usize> {
        let mut added = 0;
        for (passage, vector) in entries {
            if self.insert(session, passage, vector).await? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Up to `k` entries of `session`, best first. Equal scores keep
    /// ingestion order.
    async fn search(
        &self,
        session: SessionId,
        query: &[f32],
        k: usize,
    ) -> AppResult<Vec<ScoredPassage>>;

    /// Remove every entry of `session`; returns how many were removed.
    async fn delete_session(&self, session: SessionId) -> AppResult<usize>;

    async fn count(&self, session: SessionId) -> AppResult<usize>;
}

/// Open the backend selected in the pipeline config.
pub async fn open_index(
    config: &PipelineConfig,
    workspace: &Path,
) -> AppResult<Arc<dyn VectorIndex>> {
    let dimensions = config.embedding.dimensions;
    match config.index_backend {
        IndexBackend::Memory => Ok(Arc::new(MemoryVectorIndex::new(
            dimensions,
            config.ann_threshold,
        ))),
        IndexBackend::Lancedb => {
            let path = crate::config::index_dir(workspace);
            Ok(Arc::new(LanceDbIndex::open(&path, "passages", dimensions).await?))
        }
    }
}

pub(crate) fn check_session(session: SessionId, passage: &Passage) -> AppResult<()> {
    if passage.session_id != session {
        return Err(AppError::Retrieval(format!(
            "passage {} belongs to session {}, not {}",
            passage.id, passage.session_id, session
        )));
    }
    Ok(())
}

pub(crate) fn check_dimensions(expected: usize, vector: &[f32]) -> AppResult<()> {
    if vector.len() != expected {
        return Err(AppError::Retrieval(format!(
            "vector dimension mismatch: expected {}, got {}",
            expected,
            vector.len()
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(AppError::Retrieval("vector contains NaN or infinity".to_string()));
    }
    Ok(())
}

/// Scale to unit length; the zero vector stays zero.
pub(crate) fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|x| x / norm).collect()
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

/// Score descending, then the given ingestion key ascending.
pub(crate) fn by_score_then<K: Ord>(a: (f32, K), b: (f32, K)) -> Ordering {
    b.0.partial_cmp(&a.0)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.1.cmp(&b.1))
}
