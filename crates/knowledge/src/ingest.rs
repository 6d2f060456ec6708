//! Ingestion path: extracted text to indexed passages.
//!
//! A document is chunked, every chunk embedded, and only then are passages
//! written to the index, so a failed embedding leaves nothing behind.

use crate::chunk::{content_hash, Chunker};
use crate::embeddings::Embedder;
use crate::index::VectorIndex;
use crate::loader;
use crate::session::SessionManager;
use crate::types::{Document, DocumentId, ExtractedDocument, Passage, PassageId, SessionId};
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use synapse_core::{AppError, AppResult};

/// Result of ingesting one document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestedDocument {
    pub document: Document,
    /// Passages the chunker produced
    pub passages: usize,
    /// Passages that were new to the index
    pub added: usize,
}

/// A document that could not be ingested.
#[derive(Debug)]
pub struct FailedDocument {
    pub name: String,
    pub error: AppError,
}

/// Per-document outcomes of a batch.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub ingested: Vec<IngestedDocument>,
    pub failed: Vec<FailedDocument>,
    pub duration_secs: f64,
}

impl IngestReport {
    pub fn passages_added(&self) -> usize {
        self.ingested.iter().map(|d| d.added).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, name: String, outcome: AppResult<IngestedDocument>) {
        match outcome {
            Ok(doc) => self.ingested.push(doc),
            Err(error) => {
                tracing::warn!(document = %name, error = %error, "Document not ingested");
                self.failed.push(FailedDocument { name, error });
            }
        }
    }
}

/// Session-scoped ingestion.
#[derive(Clone)]
pub struct Ingestor {
    chunker: Arc<Chunker>,
    embedder: Arc<Embedder>,
    index: Arc<dyn VectorIndex>,
    sessions: SessionManager,
}

/// Errors that end a whole batch instead of a single document.
fn aborts_batch(error: &AppError) -> bool {
    matches!(
        error,
        AppError::SessionNotFound(_) | AppError::SessionExpired(_)
    )
}

impl Ingestor {
    pub fn new(
        chunker: Arc<Chunker>,
        embedder: Arc<Embedder>,
        index: Arc<dyn VectorIndex>,
        sessions: SessionManager,
    ) -> Self {
        Self {
            chunker,
            embedder,
            index,
            sessions,
        }
    }

    /// Index one extracted document under `session`.
    #[tracing::instrument(skip_all, fields(session = %session, document = %extracted.filename))]
    pub async fn ingest(
        &self,
        session: SessionId,
        extracted: &ExtractedDocument,
    ) -> AppResult<IngestedDocument> {
        self.sessions.get(session).await?;

        let document = Document {
            id: DocumentId::new(),
            session_id: session,
            filename: extracted.filename.clone(),
            format: extracted.format,
            ingested_at: Utc::now(),
        };

        let drafts = self.chunker.chunk_document(extracted, document.id);
        if drafts.is_empty() {
            return Err(AppError::ingestion(
                &extracted.filename,
                "document contains no text",
            ));
        }

        let texts: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let entries: Vec<(Passage, Vec<f32>)> = drafts
            .into_iter()
            .zip(vectors)
            .map(|(draft, vector)| {
                let passage = Passage {
                    id: PassageId::new(),
                    session_id: session,
                    document_id: draft.document_id,
                    document_name: draft.document_name,
                    content_hash: content_hash(&draft.text),
                    text: draft.text,
                    position: draft.position,
                    ordinal: draft.ordinal,
                    ingested_at: document.ingested_at,
                };
                (passage, vector)
            })
            .collect();

        let added = self.index.insert_batch(session, &entries).await?;

        // The session may have been deleted while we were embedding
        if let Err(e) = self.sessions.record_document(&document).await {
            if matches!(e, AppError::SessionNotFound(_)) {
                self.index.delete_session(session).await?;
            }
            return Err(e);
        }

        tracing::info!(
            passages = entries.len(),
            added,
            bytes = extracted.total_bytes(),
            "Ingested document"
        );

        Ok(IngestedDocument {
            document,
            passages: entries.len(),
            added,
        })
    }

    /// Ingest several documents; one failure does not stop the others.
    pub async fn ingest_batch(
        &self,
        session: SessionId,
        documents: &[ExtractedDocument],
    ) -> AppResult<IngestReport> {
        let start = Instant::now();
        self.sessions.get(session).await?;

        let mut report = IngestReport::default();
        for extracted in documents {
            match self.ingest(session, extracted).await {
                Err(e) if aborts_batch(&e) => return Err(e),
                outcome => report.record(extracted.filename.clone(), outcome),
            }
        }

        report.duration_secs = start.elapsed().as_secs_f64();
        Ok(report)
    }

    /// Load files (directories are expanded) and ingest them.
    pub async fn ingest_paths(
        &self,
        session: SessionId,
        paths: &[PathBuf],
    ) -> AppResult<IngestReport> {
        let start = Instant::now();
        self.sessions.get(session).await?;

        let mut report = IngestReport::default();
        for path in loader::collect_files(paths) {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());

            let loaded = tokio::task::spawn_blocking(move || loader::load_document(&path))
                .await
                .map_err(|e| AppError::Other(format!("loader task failed: {}", e)))?;

            let outcome = match loaded {
                Ok(extracted) => self.ingest(session, &extracted).await,
                Err(e) => Err(e),
            };
            match outcome {
                Err(e) if aborts_batch(&e) => return Err(e),
                outcome => report.record(name, outcome),
            }
        }

        report.duration_secs = start.elapsed().as_secs_f64();
        tracing::info!(
            ingested = report.ingested.len(),
            failed = report.failed.len(),
            passages = report.passages_added(),
            "Ingestion finished in {:.2}s",
            report.duration_secs
        );
        Ok(report)
    }
}
