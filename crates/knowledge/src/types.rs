//! Domain types for the retrieval-and-answer pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use synapse_core::AppError;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|e| AppError::Other(format!("Invalid {} '{}': {}", stringify!($name), s, e)))
            }
        }
    };
}

uuid_id!(
    /// Isolation boundary for one user's documents, passages and chat turns.
    SessionId
);
uuid_id!(
    /// Identifier of one uploaded document.
    DocumentId
);
uuid_id!(
    /// Identifier of one indexed passage.
    PassageId
);

/// A session and its lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub document_count: u32,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Supported upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Text,
    Markdown,
}

impl DocumentFormat {
    /// Extensions accepted by the loader.
    pub const SUPPORTED_EXTENSIONS: [&'static str; 5] = ["pdf", "docx", "txt", "md", "markdown"];

    /// Detect format from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Text => "text",
            Self::Markdown => "markdown",
        }
    }
}

/// An uploaded document, owned by one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub session_id: SessionId,
    pub filename: String,
    pub format: DocumentFormat,
    pub ingested_at: DateTime<Utc>,
}

/// Text of one page (1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Loader output: plain text per page, not yet bound to a session.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub filename: String,
    pub format: DocumentFormat,
    pub pages: Vec<PageText>,
}

impl ExtractedDocument {
    /// Single-page document from in-memory text.
    pub fn from_text(filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            format: DocumentFormat::Text,
            pages: vec![PageText {
                number: 1,
                text: text.into(),
            }],
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.pages.iter().map(|p| p.text.len()).sum()
    }
}

/// Where a passage sits in its document.
///
/// Byte offsets are relative to the page text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub page: u32,
    pub byte_start: usize,
    pub byte_end: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {}", self.page)
    }
}

/// Chunker output, before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct PassageDraft {
    pub document_id: DocumentId,
    pub document_name: String,
    pub text: String,
    pub position: Position,
    /// 0-based order of this chunk within its document
    pub ordinal: u32,
}

/// An indexed passage. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: PassageId,
    pub session_id: SessionId,
    pub document_id: DocumentId,
    pub document_name: String,
    pub text: String,
    pub position: Position,
    pub ordinal: u32,
    pub ingested_at: DateTime<Utc>,
    /// SHA-256 of `text`
    pub content_hash: String,
}

impl Passage {
    /// Identity used for de-duplication: same content, same document name,
    /// same position.
    pub fn fingerprint(&self) -> (String, String, Position) {
        (
            self.content_hash.clone(),
            self.document_name.clone(),
            self.position,
        )
    }

    /// Human-readable origin shown to the model and in citations.
    pub fn source_label(&self) -> String {
        format!("{}, {}", self.document_name, self.position)
    }
}

/// A passage with its relevance scores.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPassage {
    pub passage: Passage,
    /// Cosine similarity to the query vector
    pub score: f32,
    /// Secondary relevance score, when reranked
    pub rerank_score: Option<f32>,
}

impl ScoredPassage {
    pub fn new(passage: Passage, score: f32) -> Self {
        Self {
            passage,
            score,
            rerank_score: None,
        }
    }
}

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub session_id: SessionId,
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Reference from answer text back to a supporting passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Context label the model saw, e.g. 2 for `[2]`
    pub label: usize,
    pub document_id: DocumentId,
    pub document_name: String,
    pub position: Position,
    /// Quoted (possibly truncated) passage text
    pub text: String,
}

/// A generated answer with its citations, in citation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    /// False for the "no information found" fallback
    pub grounded: bool,
}
