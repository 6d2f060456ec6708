//! Prompt builder for rendering the built-in templates.

use crate::templates;
use crate::types::{AnswerSlots, BuiltPrompt, ContextualizeSlots, Language, PromptTemplate};
use handlebars::Handlebars;
use serde::Serialize;
use synapse_core::{AppError, AppResult};

/// Renders the closed set of Synapse prompts.
///
/// Templates are registered once at construction; rendering is read-only, so
/// a single builder can be shared across concurrent requests.
///
/// # Example
/// ```
/// use synapse_prompt::{AnswerSlots, ContextBlock, Language, PromptBuilder};
///
/// let builder = PromptBuilder::new().unwrap();
/// let slots = AnswerSlots {
///     context: vec![ContextBlock {
///         label: 1,
///         source: "notes.txt, page 1".to_string(),
///         text: "Rust is a systems language.".to_string(),
///     }],
///     history: Vec::new(),
///     question: "What is Rust?".to_string(),
/// };
/// let built = builder.answer(Language::English, &slots).unwrap();
/// assert!(built.user.contains("[1] (notes.txt, page 1)"));
/// ```
pub struct PromptBuilder {
    registry: Handlebars<'static>,
}

impl PromptBuilder {
    /// Register every built-in template.
    pub fn new() -> AppResult<Self> {
        let mut registry = Handlebars::new();

        // Plain text: no HTML escaping, and a typo in a slot name is an error
        registry.register_escape_fn(handlebars::no_escape);
        registry.set_strict_mode(true);

        for (template, source) in [
            (PromptTemplate::Answer(Language::English), templates::ANSWER_EN),
            (PromptTemplate::Answer(Language::Indonesian), templates::ANSWER_ID),
            (PromptTemplate::Contextualize, templates::CONTEXTUALIZE),
        ] {
            registry
                .register_template_string(template.name(), source)
                .map_err(|e| AppError::Prompt(format!("Failed to register template: {}", e)))?;
        }

        Ok(Self { registry })
    }

    /// Render the grounded answer prompt for `language`.
    pub fn answer(&self, language: Language, slots: &AnswerSlots) -> AppResult<BuiltPrompt> {
        let template = PromptTemplate::Answer(language);
        tracing::debug!(
            template = template.name(),
            blocks = slots.context.len(),
            history = slots.history.len(),
            "Rendering answer prompt"
        );

        let system = match language {
            Language::English => templates::SYSTEM_EN,
            Language::Indonesian => templates::SYSTEM_ID,
        };

        Ok(BuiltPrompt {
            system: system.to_string(),
            user: self.render(template, slots)?,
            template,
        })
    }

    /// Render the follow-up rewriting prompt.
    pub fn contextualize(&self, slots: &ContextualizeSlots) -> AppResult<BuiltPrompt> {
        let template = PromptTemplate::Contextualize;
        Ok(BuiltPrompt {
            system: templates::SYSTEM_CONTEXTUALIZE.to_string(),
            user: self.render(template, slots)?,
            template,
        })
    }

    fn render<T: Serialize>(&self, template: PromptTemplate, data: &T) -> AppResult<String> {
        self.registry
            .render(template.name(), data)
            .map_err(|e| AppError::Prompt(format!("Failed to render {}: {}", template.name(), e)))
    }
}
