//! Concrete embedding backends.

mod hashing;
mod ollama;

pub use hashing::HashingProvider;
pub use ollama::OllamaProvider;
