//! ONNX cross-encoder reranking.
//!
//! Scores each (query, passage) pair jointly with a sequence-classification
//! model such as `ms-marco-MiniLM-L-6-v2` exported to ONNX. Runs on the CPU
//! execution provider.

use super::rerank::{order_by_scores, Reranker};
use crate::types::ScoredPassage;
use anyhow::Context;
use ndarray::{Array2, Axis};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use synapse_core::{AppError, AppResult};
use tokenizers::{Tokenizer, TruncationParams, TruncationStrategy};

/// Reranker backed by an ONNX cross-encoder.
///
/// Scoring failures are logged and leave the vector order untouched.
#[derive(Clone)]
pub struct CrossEncoderReranker {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    model_name: String,
}

impl std::fmt::Debug for CrossEncoderReranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossEncoderReranker")
            .field("model_name", &self.model_name)
            .finish_non_exhaustive()
    }
}

impl CrossEncoderReranker {
    /// Load the model and its tokenizer. Pairs longer than `max_length`
    /// tokens lose the tail of the passage.
    pub fn load(model_path: &Path, tokenizer_path: &Path, max_length: usize) -> AppResult<Self> {
        for path in [model_path, tokenizer_path] {
            if !path.is_file() {
                return Err(AppError::Config(format!(
                    "Cross-encoder file not found: {:?}",
                    path
                )));
            }
        }

        let session = build_session(model_path).map_err(|e| AppError::Config(format!("{:#}", e)))?;
        let tokenizer =
            load_tokenizer(tokenizer_path, max_length).map_err(|e| AppError::Config(format!("{:#}", e)))?;

        let model_name = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cross-encoder".to_string());
        tracing::info!(model = %model_name, "Loaded cross-encoder reranker");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            model_name,
        })
    }

    /// Relevance logit of each passage against `query`.
    fn score(&self, query: &str, passages: &[&str]) -> anyhow::Result<Vec<f32>> {
        let encodings = passages
            .iter()
            .map(|passage| {
                self.tokenizer
                    .encode((query, *passage), true)
                    .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let rows = encodings.len();
        let max_len = encodings
            .iter()
            .map(|enc| enc.get_ids().len())
            .max()
            .unwrap_or(0);

        let mut input_ids = Vec::with_capacity(rows * max_len);
        let mut attention_mask = Vec::with_capacity(rows * max_len);
        let mut token_type_ids = Vec::with_capacity(rows * max_len);

        for encoding in &encodings {
            let ids = encoding.get_ids();
            input_ids.extend(ids.iter().map(|&id| id as i64));
            attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
            token_type_ids.extend(encoding.get_type_ids().iter().map(|&t| t as i64));

            let padding = max_len - ids.len();
            input_ids.extend(std::iter::repeat(0i64).take(padding));
            attention_mask.extend(std::iter::repeat(0i64).take(padding));
            token_type_ids.extend(std::iter::repeat(0i64).take(padding));
        }

        let input_ids = Array2::from_shape_vec((rows, max_len), input_ids)
            .context("Failed to create input_ids array")?;
        let attention_mask = Array2::from_shape_vec((rows, max_len), attention_mask)
            .context("Failed to create attention_mask array")?;
        let token_type_ids = Array2::from_shape_vec((rows, max_len), token_type_ids)
            .context("Failed to create token_type_ids array")?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("Cross-encoder session lock poisoned"))?;
        let outputs = session.run(ort::inputs![
            "input_ids" => Value::from_array(input_ids)?,
            "attention_mask" => Value::from_array(attention_mask)?,
            "token_type_ids" => Value::from_array(token_type_ids)?
        ])?;

        let logits = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract logits")?;
        if logits.ndim() == 0 || logits.shape()[0] != rows {
            anyhow::bail!("Unexpected logits shape {:?} for {} pairs", logits.shape(), rows);
        }

        // One logit per pair, or two-class logits where the last is "relevant"
        Ok((0..rows)
            .map(|row| {
                logits
                    .index_axis(Axis(0), row)
                    .iter()
                    .last()
                    .copied()
                    .unwrap_or(f32::NEG_INFINITY)
            })
            .collect())
    }
}

fn build_session(model_path: &Path) -> anyhow::Result<Session> {
    Session::builder()
        .context("Failed to create session builder")?
        .with_execution_providers([CPUExecutionProvider::default().build()])
        .context("Failed to set CPU execution provider")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(4)
        .context("Failed to set intra threads")?
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load ONNX model from {}", model_path.display()))
}

fn load_tokenizer(path: &Path, max_length: usize) -> anyhow::Result<Tokenizer> {
    let mut tokenizer = Tokenizer::from_file(path)
        .map_err(|e| anyhow::anyhow!("Failed to load tokenizer {}: {}", path.display(), e))?;
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            strategy: TruncationStrategy::OnlySecond,
            ..Default::default()
        }))
        .map_err(|e| anyhow::anyhow!("Failed to configure truncation: {}", e))?;
    Ok(tokenizer)
}

impl Reranker for CrossEncoderReranker {
    fn name(&self) -> &'static str {
        "cross-encoder"
    }

    fn rerank(&self, query: &str, candidates: Vec<ScoredPassage>) -> Vec<ScoredPassage> {
        if candidates.len() < 2 {
            return candidates;
        }

        let passages: Vec<&str> = candidates.iter().map(|c| c.passage.text.as_str()).collect();
        match self.score(query, &passages) {
            Ok(scores) => order_by_scores(candidates, &scores),
            Err(e) => {
                tracing::warn!(
                    model = %self.model_name,
                    "Cross-encoder scoring failed, keeping vector order: {:#}",
                    e
                );
                candidates
            }
        }
    }
}
