//! Prompt system for Synapse.
//!
//! This crate provides the closed set of prompts the answer pipeline uses:
//! - Grounded answer prompts, one per supported language
//! - The follow-up contextualization prompt
//! - Handlebars rendering over typed slots

pub mod builder;
mod templates;
pub mod types;

// Re-export main types
pub use builder::PromptBuilder;
pub use types::{
    AnswerSlots, BuiltPrompt, ContextBlock, ContextualizeSlots, HistoryEntry, Language,
    PromptTemplate, Speaker,
};
