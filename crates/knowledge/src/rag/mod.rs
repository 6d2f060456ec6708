//! Query path: retrieval, reranking, prompt assembly and generation.
//!
//! [`Retriever`] turns a question into the session's best passages;
//! [`Synthesizer`] labels them, renders the answer prompt, calls the
//! backend and tracks which labels the answer cites.

pub mod citations;
mod contextualize;
#[cfg(feature = "cross-encoder")]
pub mod cross_encoder;
pub mod generation;
pub mod rerank;
pub mod retriever;
pub mod stream;
pub mod synthesizer;

pub use generation::GenerationPolicy;
#[cfg(feature = "cross-encoder")]
pub use cross_encoder::CrossEncoderReranker;
pub use rerank::{LexicalReranker, NoopReranker, Reranker};
pub use retriever::Retriever;
pub use stream::{AnswerEvent, AnswerStream};
pub use synthesizer::{AskOptions, Synthesizer};
