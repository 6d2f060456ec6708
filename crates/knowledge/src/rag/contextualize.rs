//! Rewriting follow-up questions into standalone ones before retrieval.

use crate::rag::generation::GenerationPolicy;
use synapse_llm::{LlmClient, LlmRequest};
use synapse_prompt::{ContextualizeSlots, HistoryEntry, PromptBuilder};

/// Standalone form of `question` given `history`.
///
/// Never fails: with no history the question is returned as is, and any
/// rendering or generation problem falls back to the original question.
pub async fn standalone_question(
    llm: &dyn LlmClient,
    prompts: &PromptBuilder,
    policy: &GenerationPolicy,
    history: &[HistoryEntry],
    question: &str,
) -> String {
    if history.is_empty() {
        return question.to_string();
    }

    let slots = ContextualizeSlots {
        history: history.to_vec(),
        question: question.to_string(),
    };
    let prompt = match prompts.contextualize(&slots) {
        Ok(prompt) => prompt,
        Err(e) => {
            tracing::warn!(error = %e, "Contextualization prompt failed, using original question");
            return question.to_string();
        }
    };

    let request = LlmRequest::new(prompt.user, llm.default_model())
        .with_system(prompt.system)
        .with_temperature(0.0)
        .with_max_tokens(256);

    match policy.complete(llm, &request).await {
        Ok(response) => {
            let rewritten = response.content.trim();
            if rewritten.is_empty() {
                question.to_string()
            } else {
                tracing::debug!(original = question, rewritten, "Contextualized question");
                rewritten.to_string()
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Contextualization failed, using original question");
            question.to_string()
        }
    }
}
