//! Second-pass relevance scoring of retrieved candidates.

use crate::config::{RerankerConfig, RerankerKind};
use crate::types::ScoredPassage;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use synapse_core::{AppError, AppResult};

/// Reorders vector-search candidates by a more direct (query, passage)
/// relevance signal.
///
/// Implementations must be deterministic: equal inputs give equal order.
pub trait Reranker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Return the candidates best first. Input order is the vector-search
    /// order and breaks ties.
    fn rerank(&self, query: &str, candidates: Vec<ScoredPassage>) -> Vec<ScoredPassage>;
}

/// Build the configured reranker. Relative model paths resolve against
/// `workspace`.
pub fn from_config(config: &RerankerConfig, workspace: &Path) -> AppResult<Arc<dyn Reranker>> {
    match config.kind {
        RerankerKind::Lexical => Ok(Arc::new(LexicalReranker::default())),
        RerankerKind::CrossEncoder => cross_encoder(config, workspace),
    }
}

#[cfg(feature = "cross-encoder")]
fn cross_encoder(config: &RerankerConfig, workspace: &Path) -> AppResult<Arc<dyn Reranker>> {
    let (Some(model), Some(tokenizer)) = (&config.model_path, &config.tokenizer_path) else {
        return Err(AppError::Config(
            "reranker.kind cross_encoder needs model_path and tokenizer_path".to_string(),
        ));
    };
    let reranker = super::cross_encoder::CrossEncoderReranker::load(
        &workspace.join(model),
        &workspace.join(tokenizer),
        config.max_length,
    )?;
    Ok(Arc::new(reranker))
}

#[cfg(not(feature = "cross-encoder"))]
fn cross_encoder(_config: &RerankerConfig, _workspace: &Path) -> AppResult<Arc<dyn Reranker>> {
    Err(AppError::Config(
        "reranker.kind cross_encoder requires building with the `cross-encoder` feature"
            .to_string(),
    ))
}

/// Sort candidates by `scores` (parallel to `candidates`), best first, with
/// the input position breaking ties. Each score is kept as `rerank_score`;
/// missing or NaN scores rank last.
pub(crate) fn order_by_scores(candidates: Vec<ScoredPassage>, scores: &[f32]) -> Vec<ScoredPassage> {
    let mut scored: Vec<(f32, usize, ScoredPassage)> = candidates
        .into_iter()
        .enumerate()
        .map(|(position, mut candidate)| {
            let score = scores
                .get(position)
                .copied()
                .filter(|s| !s.is_nan())
                .unwrap_or(f32::NEG_INFINITY);
            candidate.rerank_score = Some(score);
            (score, position, candidate)
        })
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    scored.into_iter().map(|(_, _, c)| c).collect()
}

/// Keeps the vector-search order.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReranker;

impl Reranker for NoopReranker {
    fn name(&self) -> &'static str {
        "none"
    }

    fn rerank(&self, _query: &str, candidates: Vec<ScoredPassage>) -> Vec<ScoredPassage> {
        candidates
    }
}

/// Fuses the vector ranking with a BM25 keyword ranking over the candidate
/// set using reciprocal rank fusion.
#[derive(Debug, Clone, Copy)]
pub struct LexicalReranker {
    vector_weight: f32,
    keyword_weight: f32,
}

const RRF_K: f32 = 60.0;
const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

impl Default for LexicalReranker {
    fn default() -> Self {
        Self {
            vector_weight: 0.5,
            keyword_weight: 0.5,
        }
    }
}

impl LexicalReranker {
    pub fn new(vector_weight: f32, keyword_weight: f32) -> Self {
        Self {
            vector_weight,
            keyword_weight,
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(str::to_string)
        .collect()
}

/// BM25 of each document against the query, with document statistics taken
/// from `documents` alone.
fn bm25_scores(query: &str, documents: &[Vec<String>]) -> Vec<f32> {
    // Ordered so the per-document sum is computed in the same order every call
    let terms: BTreeSet<String> = tokenize(query).into_iter().collect();
    if terms.is_empty() || documents.is_empty() {
        return vec![0.0; documents.len()];
    }

    let n = documents.len() as f32;
    let avg_len = documents.iter().map(|d| d.len()).sum::<usize>() as f32 / n;

    let mut doc_freq: HashMap<&str, f32> = HashMap::new();
    for doc in documents {
        let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
        for term in &terms {
            if unique.contains(term.as_str()) {
                *doc_freq.entry(term.as_str()).or_insert(0.0) += 1.0;
            }
        }
    }

    documents
        .iter()
        .map(|doc| {
            let len = doc.len() as f32;
            terms
                .iter()
                .map(|term| {
                    let tf = doc.iter().filter(|t| *t == term).count() as f32;
                    if tf == 0.0 {
                        return 0.0;
                    }
                    let df = doc_freq.get(term.as_str()).copied().unwrap_or(0.0);
                    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                    let norm = if avg_len > 0.0 { len / avg_len } else { 1.0 };
                    idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * norm))
                })
                .sum()
        })
        .collect()
}

impl Reranker for LexicalReranker {
    fn name(&self) -> &'static str {
        "lexical"
    }

    fn rerank(&self, query: &str, candidates: Vec<ScoredPassage>) -> Vec<ScoredPassage> {
        if candidates.len() < 2 {
            return candidates;
        }

        let documents: Vec<Vec<String>> = candidates
            .iter()
            .map(|c| tokenize(&c.passage.text))
            .collect();
        let keyword = bm25_scores(query, &documents);

        // Keyword rank of every candidate with a positive BM25 score
        let mut by_keyword: Vec<usize> = (0..candidates.len()).filter(|&i| keyword[i] > 0.0).collect();
        by_keyword.sort_by(|&a, &b| {
            keyword[b]
                .partial_cmp(&keyword[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        let mut keyword_rank = vec![None; candidates.len()];
        for (rank, &i) in by_keyword.iter().enumerate() {
            keyword_rank[i] = Some(rank);
        }

        let mut fused: Vec<(f32, usize, ScoredPassage)> = candidates
            .into_iter()
            .enumerate()
            .map(|(vector_rank, mut candidate)| {
                let mut score = self.vector_weight / (RRF_K + vector_rank as f32 + 1.0);
                if let Some(rank) = keyword_rank[vector_rank] {
                    score += self.keyword_weight / (RRF_K + rank as f32 + 1.0);
                }
                candidate.rerank_score = Some(score);
                (score, vector_rank, candidate)
            })
            .collect();

        fused.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });

        fused.into_iter().map(|(_, _, c)| c).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::content_hash;
    use crate::types::{DocumentId, Passage, PassageId, Position, SessionId};
    use chrono::Utc;

    fn candidate(text: &str, score: f32) -> ScoredPassage {
        ScoredPassage::new(
            Passage {
                id: PassageId::new(),
                session_id: SessionId::new(),
                document_id: DocumentId::new(),
                document_name: "doc.txt".to_string(),
                text: text.to_string(),
                position: Position {
                    page: 1,
                    byte_start: 0,
                    byte_end: text.len(),
                },
                ordinal: 0,
                ingested_at: Utc::now(),
                content_hash: content_hash(text),
            },
            score,
        )
    }

    fn texts(results: &[ScoredPassage]) -> Vec<&str> {
        results.iter().map(|r| r.passage.text.as_str()).collect()
    }

    #[test]
    fn test_keyword_match_moves_up() {
        let candidates = vec![
            candidate("General overview of the company history.", 0.61),
            candidate("Quarterly revenue grew by twelve percent.", 0.60),
            candidate("Office locations and opening hours.", 0.59),
        ];

        let reranked = LexicalReranker::default().rerank("What was the quarterly revenue?", candidates);
        assert_eq!(reranked[0].passage.text, "Quarterly revenue grew by twelve percent.");
        assert!(reranked.iter().all(|r| r.rerank_score.is_some()));
    }

    #[test]
    fn test_no_keyword_overlap_keeps_vector_order() {
        let candidates = vec![
            candidate("alpha", 0.9),
            candidate("beta", 0.8),
            candidate("gamma", 0.7),
        ];

        let reranked = LexicalReranker::default().rerank("zzz", candidates);
        assert_eq!(texts(&reranked), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_deterministic() {
        let make = || {
            vec![
                candidate("rust ownership rules", 0.5),
                candidate("ownership in rust explained", 0.5),
                candidate("borrowing rules", 0.5),
            ]
        };
        let reranker = LexicalReranker::default();
        let first = reranker.rerank("rust ownership", make());
        let second = reranker.rerank("rust ownership", make());
        assert_eq!(texts(&first), texts(&second));
    }

    #[test]
    fn test_bm25_scores_are_bit_identical_across_calls() {
        let documents: Vec<Vec<String>> = [
            "the annual report covers revenue margins staffing and regional growth",
            "regional offices report staffing levels and growth targets each quarter",
            "margins improved while revenue in the northern region stayed flat",
        ]
        .iter()
        .map(|d| tokenize(d))
        .collect();
        let query = "annual revenue margins staffing regional growth report quarter northern offices";

        let first: Vec<u32> = bm25_scores(query, &documents).iter().map(|s| s.to_bits()).collect();
        for _ in 0..32 {
            let again: Vec<u32> = bm25_scores(query, &documents).iter().map(|s| s.to_bits()).collect();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_order_by_scores_breaks_ties_by_input_position() {
        let candidates = vec![
            candidate("first", 0.9),
            candidate("second", 0.8),
            candidate("third", 0.7),
            candidate("fourth", 0.6),
        ];
        let ordered = order_by_scores(candidates, &[0.2, 0.5, 0.5, f32::NAN]);
        assert_eq!(texts(&ordered)[..3], ["second", "third", "first"]);
        assert_eq!(texts(&ordered)[3], "fourth");
        assert_eq!(ordered[0].rerank_score, Some(0.5));
    }

    #[test]
    fn test_lexical_is_the_default_reranker() {
        let reranker = from_config(&RerankerConfig::default(), Path::new(".")).unwrap();
        assert_eq!(reranker.name(), "lexical");
    }

    #[cfg(not(feature = "cross-encoder"))]
    #[test]
    fn test_cross_encoder_needs_the_feature() {
        let config = RerankerConfig {
            kind: RerankerKind::CrossEncoder,
            model_path: Some("model.onnx".into()),
            tokenizer_path: Some("tokenizer.json".into()),
            ..Default::default()
        };
        assert!(matches!(
            from_config(&config, Path::new(".")),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_noop_keeps_order() {
        let candidates = vec![candidate("b", 0.2), candidate("a", 0.9)];
        let out = NoopReranker.rerank("a", candidates);
        assert_eq!(texts(&out), vec!["b", "a"]);
    }
}
