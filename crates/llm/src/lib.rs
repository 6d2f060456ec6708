//! Generation backends for Synapse.
//!
//! This crate provides a provider-agnostic interface for text generation.
//! The answer pipeline only sees [`LlmClient`]; concrete backends are picked
//! at start-up by [`create_client`].
//!
//! # Providers
//! - **Ollama**: local runtime, NDJSON streaming
//! - **OpenAI / Groq**: OpenAI-compatible chat completions, SSE streaming
//!
//! # Example
//! ```no_run
//! use synapse_llm::{LlmClient, LlmRequest, providers::OllamaClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OllamaClient::new();
//! let request = LlmRequest::new("Hello, world!", "llama3.2");
//! let response = client.complete(&request).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod factory;
pub mod providers;
pub mod types;

// Re-export main types
pub use client::{LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage};
pub use factory::{create_client, ClientSettings};
pub use providers::{OllamaClient, OpenAiCompatibleClient};
pub use types::ProviderType;
