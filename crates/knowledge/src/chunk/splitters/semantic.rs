//! Boundary-aware splitting backed by `text-splitter`.

use super::{trimmed, PageSplitter};
use synapse_core::{AppError, AppResult};
use text_splitter::{Characters, ChunkConfig, TextSplitter};

/// Prefers paragraph, sentence and word boundaries, in that order.
///
/// A run longer than the chunk size with no boundary at all is cut at
/// grapheme level, so every piece stays within `size` characters.
pub struct SemanticSplitter {
    inner: TextSplitter<Characters>,
}

impl SemanticSplitter {
    pub fn new(size: usize, overlap: usize) -> AppResult<Self> {
        let config = ChunkConfig::new(size)
            .with_overlap(overlap)
            .map_err(|e| AppError::Config(format!("invalid chunk config: {}", e)))?;

        Ok(Self {
            inner: TextSplitter::new(config),
        })
    }
}

impl PageSplitter for SemanticSplitter {
    fn split<'a>(&self, text: &'a str) -> Vec<(usize, &'a str)> {
        let pieces: Vec<(usize, &str)> = self
            .inner
            .chunk_indices(text)
            .filter_map(|(offset, raw)| trimmed(offset, raw))
            .collect();

        tracing::trace!(
            "Semantic splitter created {} chunks from {} bytes",
            pieces.len(),
            text.len()
        );
        pieces
    }
}
