//! Grounded answer generation.
//!
//! Retrieval completes before the prompt is rendered, and rendering before
//! the backend is called. Citations are extracted only from the fully
//! assembled answer text.

use crate::config::PipelineConfig;
use crate::rag::citations::{context_blocks, extract_citations};
use crate::rag::contextualize::standalone_question;
use crate::rag::generation::GenerationPolicy;
use crate::rag::retriever::Retriever;
use crate::rag::stream::{self, AnswerSink, AnswerStream};
use crate::session::SessionManager;
use crate::types::{Answer, ChatRole, ChatTurn, ScoredPassage, SessionId};
use futures::StreamExt;
use std::sync::Arc;
use synapse_core::{AppError, AppResult, GenerationErrorKind};
use synapse_llm::{LlmClient, LlmRequest};
use synapse_prompt::{AnswerSlots, HistoryEntry, Language, PromptBuilder, Speaker};
use tokio_util::sync::CancellationToken;

/// Per-question overrides of the pipeline defaults.
#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    /// Rerank candidates; `None` uses the configured default
    pub rerank: Option<bool>,
    /// Passages shown to the model; `None` uses `retrieval_top_k`
    pub top_k: Option<usize>,
    /// Conversation so far, oldest first; `None` reads the session's stored
    /// turns. Only the last `history_turns` entries are used.
    pub history: Option<Vec<ChatTurn>>,
}

/// What to do once retrieval has finished.
enum Plan {
    /// Call the backend with this request over these passages
    Generate {
        request: LlmRequest,
        passages: Vec<ScoredPassage>,
    },
    /// Nothing retrieved and fallback answers are allowed
    Fallback(Answer),
}

/// Builds prompts from retrieved passages and turns backend output into
/// cited answers.
#[derive(Clone)]
pub struct Synthesizer {
    retriever: Retriever,
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptBuilder>,
    sessions: SessionManager,
    config: Arc<PipelineConfig>,
    policy: GenerationPolicy,
}

impl Synthesizer {
    pub fn new(
        retriever: Retriever,
        llm: Arc<dyn LlmClient>,
        prompts: Arc<PromptBuilder>,
        sessions: SessionManager,
        config: Arc<PipelineConfig>,
    ) -> Self {
        let policy = GenerationPolicy::from_config(&config);
        Self {
            retriever,
            llm,
            prompts,
            sessions,
            config,
            policy,
        }
    }

    /// Answer `question` in one piece.
    #[tracing::instrument(skip_all, fields(session = %session, lang = %language))]
    pub async fn answer(
        &self,
        session: SessionId,
        question: &str,
        language: Language,
        options: AskOptions,
    ) -> AppResult<Answer> {
        let (request, passages) = match self.plan(session, question, language, options).await? {
            Plan::Fallback(answer) => {
                self.record_exchange(session, question, &answer.text).await?;
                return Ok(answer);
            }
            Plan::Generate { request, passages } => (request, passages),
        };

        let response = self.policy.complete(self.llm.as_ref(), &request).await?;
        let answer = self.finish(session, question, response.content, &passages).await?;

        tracing::info!(
            citations = answer.citations.len(),
            tokens = response.usage.total_tokens,
            "Answer generated"
        );
        Ok(answer)
    }

    /// Answer `question` as a stream of fragments.
    ///
    /// Retrieval and prompt errors (including `NoContext`) are returned
    /// here; anything after generation starts arrives as a `Failed` event.
    #[tracing::instrument(skip_all, fields(session = %session, lang = %language))]
    pub async fn answer_stream(
        &self,
        session: SessionId,
        question: &str,
        language: Language,
        options: AskOptions,
    ) -> AppResult<AnswerStream> {
        let (request, passages) = match self.plan(session, question, language, options).await? {
            Plan::Fallback(answer) => {
                self.record_exchange(session, question, &answer.text).await?;
                return Ok(AnswerStream::ready(answer));
            }
            Plan::Generate { request, passages } => (request, passages),
        };

        let (sink, consumer) = stream::channel();
        let this = self.clone();
        let question = question.to_string();
        tokio::spawn(async move {
            this.produce(sink, session, question, request.with_streaming(), passages)
                .await;
        });

        Ok(consumer)
    }

    async fn plan(
        &self,
        session: SessionId,
        question: &str,
        language: Language,
        options: AskOptions,
    ) -> AppResult<Plan> {
        self.sessions.get(session).await?;

        let turns = match options.history {
            Some(supplied) => recent_supplied(session, supplied, self.config.history_turns),
            None => {
                self.sessions
                    .recent_turns(session, self.config.history_turns)
                    .await?
            }
        };
        let history: Vec<HistoryEntry> = turns.into_iter().map(history_entry).collect();

        let search_query = if self.config.contextualize {
            standalone_question(
                self.llm.as_ref(),
                &self.prompts,
                &self.policy,
                &history,
                question,
            )
            .await
        } else {
            question.to_string()
        };

        let k = options.top_k.unwrap_or(self.config.retrieval_top_k).max(1);
        let rerank = options.rerank.unwrap_or(self.config.rerank);
        let passages = self
            .retriever
            .retrieve(session, &search_query, k, rerank)
            .await?;

        if passages.is_empty() {
            if self.config.grounded_only {
                tracing::info!("No passages retrieved; refusing to answer ungrounded");
                return Err(AppError::NoContext(no_information(language, question)));
            }
            tracing::info!("No passages retrieved; returning fallback answer");
            return Ok(Plan::Fallback(Answer {
                text: no_information(language, question),
                citations: Vec::new(),
                grounded: false,
            }));
        }

        let slots = AnswerSlots {
            context: context_blocks(&passages),
            history,
            question: question.to_string(),
        };
        let prompt = self.prompts.answer(language, &slots)?;

        let request = LlmRequest::new(prompt.user, self.llm.default_model())
            .with_system(prompt.system)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        Ok(Plan::Generate { request, passages })
    }

    /// Extract citations and persist the exchange.
    async fn finish(
        &self,
        session: SessionId,
        question: &str,
        text: String,
        passages: &[ScoredPassage],
    ) -> AppResult<Answer> {
        let answer = self.compose(text, passages)?;
        self.record_exchange(session, question, &answer.text).await?;
        Ok(answer)
    }

    /// Turn raw backend text into an answer with citations.
    fn compose(&self, text: String, passages: &[ScoredPassage]) -> AppResult<Answer> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(AppError::generation(
                GenerationErrorKind::Malformed,
                "backend returned an empty answer",
            ));
        }

        let citations = extract_citations(&text, passages, self.config.citation_mode);
        Ok(Answer {
            text,
            citations,
            grounded: true,
        })
    }

    /// Record a streamed exchange unless its consumer has cancelled.
    /// Returns whether it was recorded.
    pub(crate) async fn settle(
        &self,
        token: &CancellationToken,
        session: SessionId,
        question: &str,
        answer: &Answer,
    ) -> AppResult<bool> {
        if token.is_cancelled() {
            tracing::info!(session = %session, "Answer cancelled before it was recorded");
            return Ok(false);
        }
        self.record_exchange(session, question, &answer.text).await?;
        Ok(true)
    }

    async fn record_exchange(&self, session: SessionId, question: &str, answer: &str) -> AppResult<()> {
        self.sessions
            .append_turn(session, ChatRole::User, question)
            .await?;
        self.sessions
            .append_turn(session, ChatRole::Assistant, answer)
            .await
    }

    /// Drive one streamed generation until it completes, fails, or the
    /// consumer goes away.
    async fn produce(
        self,
        sink: AnswerSink,
        session: SessionId,
        question: String,
        request: LlmRequest,
        passages: Vec<ScoredPassage>,
    ) {
        let token = sink.token().clone();

        let opened = tokio::select! {
            _ = token.cancelled() => {
                tracing::info!(session = %session, "Answer stream cancelled before start");
                return;
            }
            opened = self.policy.open_stream(self.llm.as_ref(), &request) => opened,
        };
        let mut fragments = match opened {
            Ok(fragments) => fragments,
            Err(e) => return sink.fail(e).await,
        };

        let mut text = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::info!(session = %session, received = text.len(), "Answer stream cancelled");
                    return;
                }
                next = tokio::time::timeout(self.policy.timeout, fragments.next()) => next,
            };

            match next {
                Err(_) => {
                    let err = AppError::generation(
                        GenerationErrorKind::Timeout,
                        format!("no fragment within {}s", self.policy.timeout.as_secs()),
                    );
                    return sink.fail(err).await;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    tracing::warn!(session = %session, error = %e, "Answer stream failed mid-generation");
                    return sink.fail(e).await;
                }
                Ok(Some(Ok(chunk))) => {
                    if !chunk.content.is_empty() {
                        text.push_str(&chunk.content);
                        if !sink.fragment(chunk.content).await {
                            tracing::info!(session = %session, "Answer stream consumer went away");
                            return;
                        }
                    }
                    if chunk.done {
                        break;
                    }
                }
            }
        }

        // Dropping the backend stream here releases the connection
        drop(fragments);

        let answer = match self.compose(text, &passages) {
            Ok(answer) => answer,
            Err(e) => return sink.fail(e).await,
        };
        match self.settle(&token, session, &question, &answer).await {
            Ok(true) => {
                tracing::info!(session = %session, citations = answer.citations.len(), "Answer stream completed");
                sink.complete(answer).await
            }
            Ok(false) => {}
            Err(e) => sink.fail(e).await,
        }
    }
}

/// The last `limit` caller-supplied turns that belong to `session`.
fn recent_supplied(session: SessionId, turns: Vec<ChatTurn>, limit: usize) -> Vec<ChatTurn> {
    let supplied = turns.len();
    let mut turns: Vec<ChatTurn> = turns
        .into_iter()
        .filter(|t| t.session_id == session)
        .collect();
    if turns.len() < supplied {
        tracing::warn!(
            dropped = supplied - turns.len(),
            "Ignoring supplied turns from another session"
        );
    }
    let skip = turns.len().saturating_sub(limit);
    turns.drain(..skip);
    turns
}

fn history_entry(turn: ChatTurn) -> HistoryEntry {
    let speaker = match turn.role {
        ChatRole::User => Speaker::User,
        ChatRole::Assistant => Speaker::Assistant,
    };
    HistoryEntry::new(speaker, turn.content)
}

/// Explanatory answer for a question nothing was retrieved for.
pub fn no_information(language: Language, question: &str) -> String {
    match language {
        Language::English => format!(
            "I could not find information about \"{}\" in the uploaded documents.",
            question.trim()
        ),
        Language::Indonesian => format!(
            "Saya tidak menemukan informasi tentang \"{}\" di dalam dokumen yang diunggah.",
            question.trim()
        ),
    }
}
