//! Label assignment and citation extraction.
//!
//! Retrieved passages are labeled `1..=n` in their final order. After
//! generation the answer text is scanned for `[n]` / `[n, m]` markers and
//! each label that matches a block becomes a citation.

use crate::config::CitationMode;
use crate::types::{Citation, ScoredPassage};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use synapse_prompt::ContextBlock;

/// Longest quoted passage text carried by a citation, in characters.
pub const MAX_SNIPPET_CHARS: usize = 150;

fn label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]")
            .unwrap_or_else(|e| unreachable!("static label pattern: {}", e))
    })
}

/// Context blocks for the answer prompt, labeled from 1 in passage order.
pub fn context_blocks(passages: &[ScoredPassage]) -> Vec<ContextBlock> {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| ContextBlock {
            label: i + 1,
            source: p.passage.source_label(),
            text: p.passage.text.clone(),
        })
        .collect()
}

/// Labels referenced in `text` that fall in `1..=max_label`, in order of
/// first appearance, without repeats.
pub fn referenced_labels(text: &str, max_label: usize) -> Vec<usize> {
    let mut seen = HashSet::new();
    let mut labels = Vec::new();

    for caps in label_regex().captures_iter(text) {
        for part in caps[1].split(',') {
            let Ok(label) = part.trim().parse::<usize>() else {
                continue;
            };
            if (1..=max_label).contains(&label) && seen.insert(label) {
                labels.push(label);
            }
        }
    }

    labels
}

/// Build the citation list for an answer over `passages`.
pub fn extract_citations(
    answer: &str,
    passages: &[ScoredPassage],
    mode: CitationMode,
) -> Vec<Citation> {
    let labels = match mode {
        CitationMode::Referenced => referenced_labels(answer, passages.len()),
        CitationMode::Retrieved => (1..=passages.len()).collect(),
    };

    labels
        .into_iter()
        .map(|label| citation(label, &passages[label - 1]))
        .collect()
}

fn citation(label: usize, scored: &ScoredPassage) -> Citation {
    let passage = &scored.passage;
    Citation {
        label,
        document_id: passage.document_id,
        document_name: passage.document_name.clone(),
        position: passage.position,
        text: snippet(&passage.text),
    }
}

/// Collapse whitespace and cut to [`MAX_SNIPPET_CHARS`] on a char boundary.
fn snippet(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= MAX_SNIPPET_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(MAX_SNIPPET_CHARS - 3).collect();
    format!("{}...", cut.trim_end())
}
