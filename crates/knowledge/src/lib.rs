//! Retrieval-and-answer pipeline.
//!
//! Documents uploaded into a session are chunked, embedded and indexed;
//! questions against that session are answered from its passages only, with
//! citations back to the passages the answer used.
//!
//! [`Pipeline`] is the entry point. It is built once from read-only handles
//! (embedder, index, generation client, session store) and shared by every
//! request.

pub mod chunk;
pub mod config;
pub mod embeddings;
pub mod index;
pub mod ingest;
pub mod loader;
pub mod rag;
pub mod session;
pub mod types;

#[cfg(test)]
mod tests;

pub use config::{
    ChunkStrategy, CitationMode, EmbeddingConfig, IndexBackend, PipelineConfig, RerankerConfig,
    RerankerKind,
};
pub use ingest::{FailedDocument, IngestReport, IngestedDocument, Ingestor};
pub use rag::{AnswerEvent, AnswerStream, AskOptions, LexicalReranker, NoopReranker, Reranker};
pub use session::{JsonSessionStore, MemorySessionStore, SessionManager, SessionStore};
pub use types::{
    Answer, ChatRole, ChatTurn, Citation, Document, DocumentFormat, DocumentId, ExtractedDocument,
    Passage, PassageId, Position, ScoredPassage, Session, SessionId,
};

use chrono::Utc;
use chunk::Chunker;
use embeddings::Embedder;
use index::VectorIndex;
use rag::{Retriever, Synthesizer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use synapse_core::{AppError, AppResult};
use synapse_llm::LlmClient;
use synapse_prompt::{Language, PromptBuilder};

/// Shared handles a pipeline is assembled from.
pub struct Components {
    pub embedder: Arc<Embedder>,
    pub index: Arc<dyn VectorIndex>,
    pub llm: Arc<dyn LlmClient>,
    pub store: Arc<dyn SessionStore>,
    pub reranker: Arc<dyn Reranker>,
}

/// The ingestion and query paths over one set of handles.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    sessions: SessionManager,
    ingestor: Ingestor,
    retriever: Retriever,
    synthesizer: Synthesizer,
}

impl Pipeline {
    /// Assemble a pipeline. Fails if the config is invalid or the embedder
    /// disagrees with the configured dimension.
    pub fn new(config: PipelineConfig, components: Components) -> AppResult<Self> {
        config.validate()?;
        if components.embedder.dimensions() != config.embedding.dimensions {
            return Err(AppError::Config(format!(
                "embedder produces {} dimensions but the index expects {}",
                components.embedder.dimensions(),
                config.embedding.dimensions
            )));
        }

        let config = Arc::new(config);
        let chunker = Arc::new(Chunker::from_config(&config)?);
        let prompts = Arc::new(PromptBuilder::new()?);
        let sessions = SessionManager::new(
            components.store,
            components.index.clone(),
            config.session_ttl(),
        );

        let ingestor = Ingestor::new(
            chunker,
            components.embedder.clone(),
            components.index.clone(),
            sessions.clone(),
        );
        let retriever = Retriever::new(
            components.embedder,
            components.index,
            components.reranker,
            config.overfetch_factor,
            config.min_relevance,
        );
        let synthesizer = Synthesizer::new(
            retriever.clone(),
            components.llm,
            prompts,
            sessions.clone(),
            config.clone(),
        );

        Ok(Self {
            config,
            sessions,
            ingestor,
            retriever,
            synthesizer,
        })
    }

    /// Build the configured embedder, index and JSON session store for a
    /// workspace.
    pub async fn open(
        workspace: &Path,
        config: PipelineConfig,
        llm: Arc<dyn LlmClient>,
    ) -> AppResult<Self> {
        config.validate()?;
        let embedder = Arc::new(Embedder::from_config(&config.embedding)?);
        let index = index::open_index(&config, workspace).await?;
        let store = Arc::new(JsonSessionStore::open(&config::sessions_path(workspace)).await?);
        let reranker = rag::rerank::from_config(&config.reranker, workspace)?;

        tracing::info!(
            index = index.backend_name(),
            embedder = embedder.model_name(),
            reranker = reranker.name(),
            "Opened pipeline"
        );

        Self::new(
            config,
            Components {
                embedder,
                index,
                llm,
                store,
                reranker,
            },
        )
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub async fn create_session(&self) -> AppResult<Session> {
        self.sessions.create(None).await
    }

    /// Index one extracted document.
    pub async fn ingest(
        &self,
        session: SessionId,
        document: &ExtractedDocument,
    ) -> AppResult<IngestedDocument> {
        self.ingestor.ingest(session, document).await
    }

    /// Index several documents, reporting failures per document.
    pub async fn ingest_batch(
        &self,
        session: SessionId,
        documents: &[ExtractedDocument],
    ) -> AppResult<IngestReport> {
        self.ingestor.ingest_batch(session, documents).await
    }

    /// Load and index files from disk.
    pub async fn ingest_paths(
        &self,
        session: SessionId,
        paths: &[PathBuf],
    ) -> AppResult<IngestReport> {
        self.ingestor.ingest_paths(session, paths).await
    }

    /// The `k` passages of `session` most relevant to `query`.
    pub async fn retrieve(
        &self,
        session: SessionId,
        query: &str,
        k: usize,
        rerank: bool,
    ) -> AppResult<Vec<ScoredPassage>> {
        self.sessions.get(session).await?;
        self.retriever.retrieve(session, query, k, rerank).await
    }

    /// Answer a question from the session's documents.
    pub async fn ask(
        &self,
        session: SessionId,
        question: &str,
        language: Language,
        options: AskOptions,
    ) -> AppResult<Answer> {
        self.synthesizer
            .answer(session, question, language, options)
            .await
    }

    /// Answer a question as a stream of fragments ending in a citation event.
    pub async fn ask_stream(
        &self,
        session: SessionId,
        question: &str,
        language: Language,
        options: AskOptions,
    ) -> AppResult<AnswerStream> {
        self.synthesizer
            .answer_stream(session, question, language, options)
            .await
    }

    /// Delete a session and everything it owns.
    pub async fn delete_session(&self, session: SessionId) -> AppResult<usize> {
        self.sessions.delete(session).await
    }

    /// Delete every session whose TTL has elapsed.
    pub async fn purge_expired(&self) -> AppResult<Vec<SessionId>> {
        self.sessions.purge_expired(Utc::now()).await
    }
}
