//! Prompt types for Synapse.
//!
//! Prompts are a closed set of variants selected by enum, each with a fixed
//! set of interpolation slots. Nothing is assembled ad hoc.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use synapse_core::AppError;

/// Answer language. Each language has its own fixed system instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "en")]
    English,
    #[default]
    #[serde(rename = "id")]
    Indonesian,
}

impl Language {
    /// Parse an ISO 639-1 code ("en", "id").
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_lowercase().as_str() {
            "en" | "english" => Some(Self::English),
            "id" | "indonesian" => Some(Self::Indonesian),
            _ => None,
        }
    }

    /// ISO 639-1 code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Indonesian => "id",
        }
    }
}

impl FromStr for Language {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            AppError::Prompt(format!("Unsupported language '{}' (expected en or id)", s))
        })
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The prompt variants Synapse can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptTemplate {
    /// Grounded answer over labeled context blocks
    Answer(Language),
    /// Rewrite a follow-up into a standalone question
    Contextualize,
}

impl PromptTemplate {
    /// Registry name of the user-message template.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Answer(Language::English) => "answer.en",
            Self::Answer(Language::Indonesian) => "answer.id",
            Self::Contextualize => "contextualize",
        }
    }
}

/// Speaker of a prior chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// One prior chat turn as shown to the model.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub speaker: Speaker,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(speaker: Speaker, content: impl Into<String>) -> Self {
        Self {
            speaker,
            content: content.into(),
        }
    }
}

/// One retrieved passage, labeled for citation.
#[derive(Debug, Clone, Serialize)]
pub struct ContextBlock {
    /// 1-based label the model is asked to cite as `[label]`
    pub label: usize,

    /// Human-readable origin, e.g. "report.pdf, page 2"
    pub source: String,

    pub text: String,
}

/// Slots of the answer template.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerSlots {
    pub context: Vec<ContextBlock>,
    pub history: Vec<HistoryEntry>,
    pub question: String,
}

/// Slots of the contextualization template.
#[derive(Debug, Clone, Serialize)]
pub struct ContextualizeSlots {
    pub history: Vec<HistoryEntry>,
    pub question: String,
}

/// A rendered prompt ready for the generation backend.
#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    /// System instructions
    pub system: String,

    /// User message
    pub user: String,

    /// Variant this prompt was rendered from
    pub template: PromptTemplate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parsing() {
        assert_eq!(Language::parse("EN"), Some(Language::English));
        assert_eq!(Language::parse("id"), Some(Language::Indonesian));
        assert_eq!(Language::parse("fr"), None);
        assert!("de".parse::<Language>().is_err());
        assert_eq!(Language::default().code(), "id");
    }

    #[test]
    fn test_template_names_are_distinct() {
        let names = [
            PromptTemplate::Answer(Language::English).name(),
            PromptTemplate::Answer(Language::Indonesian).name(),
            PromptTemplate::Contextualize.name(),
        ];
        assert_ne!(names[0], names[1]);
        assert_ne!(names[1], names[2]);
    }
}
