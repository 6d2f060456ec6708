//! Deterministic fakes shared by the pipeline scenarios.

use crate::config::{EmbeddingConfig, PipelineConfig};
use crate::embeddings::providers::HashingProvider;
use crate::embeddings::Embedder;
use crate::index::MemoryVectorIndex;
use crate::rag::LexicalReranker;
use crate::session::MemorySessionStore;
use crate::types::{DocumentFormat, ExtractedDocument, PageText};
use crate::{Components, Pipeline};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use synapse_core::{AppError, AppResult, GenerationErrorKind};
use synapse_llm::{LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage};

pub(crate) const DIMENSIONS: usize = 256;

/// How the scripted backend streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamMode {
    /// Every word, then a final chunk
    Complete,
    /// First word, then nothing ever again
    StallAfterFirst,
    /// First word, then a connection error
    FailAfterFirst,
}

/// Generation backend that cites every context block mentioning `keyword`.
pub(crate) struct ScriptedLlm {
    keyword: String,
    mode: StreamMode,
    requests: Mutex<Vec<LlmRequest>>,
    pub completions: AtomicUsize,
    pub streams: AtomicUsize,
    pub stream_dropped: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl ScriptedLlm {
    pub(crate) fn citing(keyword: &str) -> Arc<Self> {
        Self::with_mode(keyword, StreamMode::Complete)
    }

    pub(crate) fn with_mode(keyword: &str, mode: StreamMode) -> Arc<Self> {
        Arc::new(Self {
            keyword: keyword.to_lowercase(),
            mode,
            requests: Mutex::new(Vec::new()),
            completions: AtomicUsize::new(0),
            streams: AtomicUsize::new(0),
            stream_dropped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Every request seen so far, in order.
    pub(crate) fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn reply(&self, request: &LlmRequest) -> String {
        self.requests.lock().unwrap().push(request.clone());

        if request
            .system
            .as_deref()
            .is_some_and(|s| s.contains("rewrite follow-up"))
        {
            // Fold the last user turn into the follow-up
            let latest = request
                .prompt
                .lines()
                .find_map(|l| l.strip_prefix("Latest Question: "))
                .unwrap_or_default();
            return match request.prompt.lines().filter_map(|l| l.strip_prefix("User: ")).last() {
                Some(previous) => format!("{} ({})", latest, previous),
                None => latest.to_string(),
            };
        }

        let cited: Vec<String> = context_blocks(&request.prompt)
            .into_iter()
            .filter(|(_, text)| text.to_lowercase().contains(&self.keyword))
            .map(|(label, _)| format!("[{}]", label))
            .collect();

        if cited.is_empty() {
            "The documents do not cover this.".to_string()
        } else {
            format!("The documents discuss {} {}.", self.keyword, cited.join(" "))
        }
    }
}

/// `(label, text)` of every context block in a rendered answer prompt.
fn context_blocks(prompt: &str) -> Vec<(usize, String)> {
    let mut blocks = Vec::new();
    let mut current: Option<(usize, String)> = None;

    for line in prompt.lines() {
        if let Some(label) = block_label(line) {
            blocks.extend(current.take());
            current = Some((label, String::new()));
        } else if line.starts_with("Question:") || line.starts_with("Pertanyaan:") {
            blocks.extend(current.take());
        } else if let Some((_, text)) = current.as_mut() {
            text.push_str(line);
            text.push('\n');
        }
    }
    blocks.extend(current);
    blocks
}

fn block_label(line: &str) -> Option<usize> {
    let rest = line.strip_prefix('[')?;
    let (number, _) = rest.split_once("] (")?;
    number.parse().ok()
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-1"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        Ok(LlmResponse {
            content: self.reply(request),
            model: request.model.clone(),
            usage: LlmUsage::new(10, 10),
        })
    }

    async fn stream(&self, request: &LlmRequest) -> AppResult<LlmStream> {
        self.streams.fetch_add(1, Ordering::SeqCst);
        let text = self.reply(request);
        let guard = DropFlag(self.stream_dropped.clone());
        let first = text.split_inclusive(' ').next().unwrap_or_default().to_string();

        let chunks: LlmStream = match self.mode {
            StreamMode::Complete => {
                let mut items: Vec<AppResult<LlmStreamChunk>> = text
                    .split_inclusive(' ')
                    .map(|piece| Ok(LlmStreamChunk::text(piece)))
                    .collect();
                items.push(Ok(LlmStreamChunk::finished(Some(LlmUsage::new(10, 10)))));
                Box::pin(futures::stream::iter(items))
            }
            StreamMode::StallAfterFirst => Box::pin(
                futures::stream::iter(vec![Ok(LlmStreamChunk::text(first))])
                    .chain(futures::stream::pending()),
            ),
            StreamMode::FailAfterFirst => Box::pin(futures::stream::iter(vec![
                Ok(LlmStreamChunk::text(first)),
                Err(AppError::generation(
                    GenerationErrorKind::Unavailable,
                    "connection reset by peer",
                )),
            ])),
        };

        Ok(Box::pin(chunks.map(move |chunk| {
            let _alive = &guard;
            chunk
        })))
    }
}

pub(crate) fn test_config() -> PipelineConfig {
    PipelineConfig {
        chunk_size: 200,
        chunk_overlap: 40,
        embedding: EmbeddingConfig {
            dimensions: DIMENSIONS,
            ..Default::default()
        },
        retrieval_top_k: 3,
        generation_timeout_secs: 5,
        ..Default::default()
    }
}

pub(crate) fn pipeline_with(config: PipelineConfig, llm: Arc<ScriptedLlm>) -> Pipeline {
    let embedder = Arc::new(Embedder::new(
        Arc::new(HashingProvider::new("hashing-v1", DIMENSIONS)),
        Duration::from_secs(5),
        16,
    ));
    let components = Components {
        embedder,
        index: Arc::new(MemoryVectorIndex::new(DIMENSIONS, config.ann_threshold)),
        llm,
        store: Arc::new(MemorySessionStore::new()),
        reranker: Arc::new(LexicalReranker::default()),
    };
    Pipeline::new(config, components).unwrap()
}

pub(crate) fn pipeline(llm: Arc<ScriptedLlm>) -> Pipeline {
    pipeline_with(test_config(), llm)
}

/// A three-page document; only page 2 talks about photosynthesis.
pub(crate) fn three_page_document() -> ExtractedDocument {
    let pages = [
        "The company was founded in 1998 in a small garage. Its first product was a bookkeeping tool for farmers.",
        "Photosynthesis converts sunlight into chemical energy. Chlorophyll in the leaves absorbs the light.",
        "Visitors may park behind the office building. The front desk is open from nine to five.",
    ];
    ExtractedDocument {
        filename: "field-guide.pdf".to_string(),
        format: DocumentFormat::Pdf,
        pages: pages
            .iter()
            .enumerate()
            .map(|(i, text)| PageText {
                number: i as u32 + 1,
                text: text.to_string(),
            })
            .collect(),
    }
}

#[test]
fn test_context_block_parsing() {
    let prompt = "Chat History:\n(none)\n\nDocument Context:\n[1] (a.pdf, page 1)\nfirst line\nsecond line\n\n[2] (a.pdf, page 2)\nother\n\nQuestion: what?\n\nAnswer:";
    let blocks = context_blocks(prompt);
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].0, 1);
    assert!(blocks[0].1.contains("second line"));
    assert_eq!(blocks[1].0, 2);
    assert!(!blocks[1].1.contains("what"));
}
