//! Passage chunking.
//!
//! Page text is cut into overlapping passages sized for both the embedder
//! and the answer prompt. Two strategies are available:
//! - **semantic**: paragraph, then sentence, then word boundaries, falling
//!   back to grapheme windows inside a run with no boundary
//! - **window**: fixed-size grapheme windows, nudged to whitespace
//!
//! Chunking is pure computation and never suspends.

pub mod splitters;

use crate::config::{ChunkStrategy, PipelineConfig};
use crate::types::{DocumentId, ExtractedDocument, PassageDraft, Position};
use sha2::{Digest, Sha256};
use splitters::{PageSplitter, SemanticSplitter, WindowSplitter};
use synapse_core::{AppError, AppResult};

/// Origin of the text being chunked.
#[derive(Debug, Clone, Copy)]
pub struct ChunkSource<'a> {
    pub document_id: DocumentId,
    pub document_name: &'a str,
    /// 1-based page number
    pub page: u32,
}

/// Splits page text into passage drafts.
pub struct Chunker {
    splitter: Box<dyn PageSplitter>,
    size: usize,
    overlap: usize,
}

impl Chunker {
    /// Create a chunker. `overlap` must be smaller than `size`.
    pub fn new(size: usize, overlap: usize, strategy: ChunkStrategy) -> AppResult<Self> {
        if size == 0 || overlap >= size {
            return Err(AppError::Config(format!(
                "invalid chunking: size {} overlap {} (need 0 <= overlap < size)",
                size, overlap
            )));
        }

        let splitter: Box<dyn PageSplitter> = match strategy {
            ChunkStrategy::Semantic => Box::new(SemanticSplitter::new(size, overlap)?),
            ChunkStrategy::Window => Box::new(WindowSplitter::new(size, overlap)),
        };

        Ok(Self {
            splitter,
            size,
            overlap,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> AppResult<Self> {
        Self::new(config.chunk_size, config.chunk_overlap, config.chunk_strategy)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Chunk one page of text. Ordinals start at 0.
    ///
    /// Empty or whitespace-only text yields no drafts.
    pub fn chunk(&self, text: &str, source: ChunkSource<'_>) -> Vec<PassageDraft> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        self.splitter
            .split(text)
            .into_iter()
            .enumerate()
            .map(|(ordinal, (byte_start, piece))| PassageDraft {
                document_id: source.document_id,
                document_name: source.document_name.to_string(),
                text: piece.to_string(),
                position: Position {
                    page: source.page,
                    byte_start,
                    byte_end: byte_start + piece.len(),
                },
                ordinal: ordinal as u32,
            })
            .collect()
    }

    /// Chunk every page of a document; ordinals run across pages.
    pub fn chunk_document(
        &self,
        document: &ExtractedDocument,
        document_id: DocumentId,
    ) -> Vec<PassageDraft> {
        let mut drafts = Vec::new();

        for page in &document.pages {
            let source = ChunkSource {
                document_id,
                document_name: &document.filename,
                page: page.number,
            };
            for mut draft in self.chunk(&page.text, source) {
                draft.ordinal = drafts.len() as u32;
                drafts.push(draft);
            }
        }

        tracing::debug!(
            document = %document.filename,
            pages = document.pages.len(),
            chunks = drafts.len(),
            "Chunked document"
        );

        drafts
    }
}

/// SHA-256 of passage text, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
