//! Embedding engine.
//!
//! [`Embedder`] wraps one provider chosen at start-up and adds what every
//! caller needs: a bounded timeout per call, batching, and a dimension check
//! on everything the backend returns.

pub mod provider;
pub mod providers;

pub use provider::{create_provider, EmbeddingProvider};

use crate::config::EmbeddingConfig;
use std::sync::Arc;
use std::time::Duration;
use synapse_core::{AppError, AppResult};

/// Read-only embedding handle shared by ingestion and retrieval.
#[derive(Debug, Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
    batch_size: usize,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, timeout: Duration, batch_size: usize) -> Self {
        Self {
            provider,
            timeout,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> AppResult<Self> {
        let provider = create_provider(config)?;
        tracing::debug!(
            provider = provider.provider_name(),
            model = provider.model_name(),
            dimensions = provider.dimensions(),
            "Created embedding provider"
        );
        Ok(Self::new(
            provider,
            Duration::from_secs(config.timeout_secs),
            config.batch_size,
        ))
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed a single text (typically a query).
    pub async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::Embedding("No embedding returned".to_string()))
    }

    /// Embed many texts in provider-sized batches.
    ///
    /// Fails as a whole if any batch fails, times out, or returns vectors of
    /// the wrong count or dimension.
    pub async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let expected = self.provider.dimensions();
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let vectors = tokio::time::timeout(self.timeout, self.provider.embed_batch(batch))
                .await
                .map_err(|_| {
                    AppError::Embedding(format!(
                        "{} timed out after {}s",
                        self.provider.provider_name(),
                        self.timeout.as_secs()
                    ))
                })??;

            if vectors.len() != batch.len() {
                return Err(AppError::Embedding(format!(
                    "Backend returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
                return Err(AppError::Embedding(format!(
                    "Dimension mismatch: got {}, expected {}",
                    bad.len(),
                    expected
                )));
            }

            out.extend(vectors);
        }

        tracing::debug!(
            "Generated {} embeddings of dimension {}",
            out.len(),
            expected
        );
        Ok(out)
    }
}
