//! Pipeline configuration management.
//!
//! Loaded from `.synapse/pipeline.yaml` when present; every field has a
//! default so a partial file is enough.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use synapse_core::{AppError, AppResult};

/// How documents are cut into passages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Paragraph, then sentence, then word boundaries
    Semantic,
    /// Fixed-size grapheme windows
    Window,
}

/// Which passages become citations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationMode {
    /// Only passages whose label appears in the answer text
    Referenced,
    /// Every retrieved passage, in retrieval order
    Retrieved,
}

/// Vector index implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Memory,
    Lancedb,
}

/// Second-pass relevance model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankerKind {
    /// BM25 over the candidate set fused with the vector rank
    Lexical,
    /// ONNX cross-encoder scoring (query, passage) pairs
    CrossEncoder,
}

/// Reranker selection. The cross-encoder needs local model files and a
/// build with the `cross-encoder` feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub kind: RerankerKind,
    /// ONNX model file (cross_encoder only)
    pub model_path: Option<PathBuf>,
    /// `tokenizer.json` matching the model (cross_encoder only)
    pub tokenizer_path: Option<PathBuf>,
    /// Tokens per (query, passage) pair
    pub max_length: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            kind: RerankerKind::Lexical,
            model_path: None,
            tokenizer_path: None,
            max_length: 512,
        }
    }
}

/// Embedding backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "hashing" or "ollama"
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
    /// Endpoint override (ollama only)
    pub endpoint: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hashing".to_string(),
            model: "hashing-v1".to_string(),
            dimensions: 384,
            batch_size: 32,
            timeout_secs: 30,
            endpoint: None,
        }
    }
}

/// Tuning for chunking, retrieval and generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Chunk size in characters
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters
    pub chunk_overlap: usize,
    pub chunk_strategy: ChunkStrategy,

    pub embedding: EmbeddingConfig,

    /// Passages handed to the answer prompt
    pub retrieval_top_k: usize,
    /// Candidates fetched per final passage before reranking
    pub overfetch_factor: usize,
    pub rerank: bool,
    pub reranker: RerankerConfig,
    /// Candidates below this cosine similarity are dropped; unset keeps all
    pub min_relevance: Option<f32>,

    pub session_ttl_hours: i64,

    /// Refuse to answer (NoContext) instead of returning a fallback answer
    pub grounded_only: bool,
    pub citation_mode: CitationMode,

    /// Prior chat turns included in prompts
    pub history_turns: usize,
    /// Rewrite follow-ups into standalone questions before retrieval
    pub contextualize: bool,

    pub generation_timeout_secs: u64,
    /// Extra attempts for transient generation failures
    pub max_generation_retries: u32,
    pub temperature: f32,
    pub max_tokens: u32,

    /// Session size at which the memory index switches to HNSW
    pub ann_threshold: usize,
    pub index_backend: IndexBackend,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
            chunk_strategy: ChunkStrategy::Semantic,
            embedding: EmbeddingConfig::default(),
            retrieval_top_k: 3,
            overfetch_factor: 3,
            rerank: true,
            reranker: RerankerConfig::default(),
            min_relevance: None,
            session_ttl_hours: 24,
            grounded_only: true,
            citation_mode: CitationMode::Referenced,
            history_turns: 5,
            contextualize: true,
            generation_timeout_secs: 60,
            max_generation_retries: 1,
            temperature: 0.3,
            max_tokens: 1024,
            ann_threshold: 2000,
            index_backend: IndexBackend::Memory,
        }
    }
}

impl PipelineConfig {
    /// Load from `.synapse/pipeline.yaml`, falling back to defaults.
    pub fn load(workspace: &Path) -> AppResult<Self> {
        let path = config_path(workspace);

        if !path.exists() {
            tracing::debug!("No pipeline config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|e| {
            AppError::Config(format!("Failed to read pipeline config {:?}: {}", path, e))
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            AppError::Config(format!("Failed to parse pipeline config {:?}: {}", path, e))
        })?;

        config.validate()?;
        tracing::debug!("Loaded pipeline config from {:?}", path);
        Ok(config)
    }

    /// Write to `.synapse/pipeline.yaml`.
    pub fn save(&self, workspace: &Path) -> AppResult<()> {
        let path = config_path(workspace);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Reject settings that would make chunking or retrieval ill-defined.
    pub fn validate(&self) -> AppResult<()> {
        if self.chunk_size == 0 {
            return Err(AppError::Config("chunk_size must be positive".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(AppError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.retrieval_top_k == 0 {
            return Err(AppError::Config("retrieval_top_k must be at least 1".to_string()));
        }
        if self.overfetch_factor == 0 {
            return Err(AppError::Config("overfetch_factor must be at least 1".to_string()));
        }
        if self.embedding.dimensions == 0 {
            return Err(AppError::Config(
                "embedding.dimensions must be at least 1".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(AppError::Config(
                "embedding.batch_size must be at least 1".to_string(),
            ));
        }
        if let Some(floor) = self.min_relevance {
            if !(-1.0..=1.0).contains(&floor) {
                return Err(AppError::Config(format!(
                    "min_relevance ({}) must lie within [-1, 1]",
                    floor
                )));
            }
        }
        if self.reranker.kind == RerankerKind::CrossEncoder {
            if self.reranker.model_path.is_none() || self.reranker.tokenizer_path.is_none() {
                return Err(AppError::Config(
                    "reranker.kind cross_encoder needs model_path and tokenizer_path".to_string(),
                ));
            }
            if self.reranker.max_length == 0 {
                return Err(AppError::Config(
                    "reranker.max_length must be at least 1".to_string(),
                ));
            }
        }
        if self.session_ttl_hours <= 0 {
            return Err(AppError::Config("session_ttl_hours must be positive".to_string()));
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours)
    }
}

/// Path of the pipeline config file.
pub fn config_path(workspace: &Path) -> PathBuf {
    workspace.join(".synapse").join("pipeline.yaml")
}

/// Directory of the persistent vector index.
pub fn index_dir(workspace: &Path) -> PathBuf {
    workspace.join(".synapse").join("index")
}

/// File backing the JSON session store.
pub fn sessions_path(workspace: &Path) -> PathBuf {
    workspace.join(".synapse").join("sessions.json")
}
