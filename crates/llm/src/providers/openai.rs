//! OpenAI-compatible chat completions provider.
//!
//! Works against any endpoint speaking the `/chat/completions` protocol,
//! including OpenAI itself and Groq. Streaming uses server-sent events
//! (`data: {...}` lines terminated by `data: [DONE]`).

use crate::client::{LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage};
use crate::providers::{error_from_response, line_stream, transport_error};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use synapse_core::{AppError, AppResult, GenerationErrorKind};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl From<ApiUsage> for LlmUsage {
    fn from(u: ApiUsage) -> Self {
        LlmUsage::new(u.prompt_tokens, u.completion_tokens)
    }
}

/// Client for OpenAI-compatible APIs.
pub struct OpenAiCompatibleClient {
    provider: &'static str,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiCompatibleClient {
    /// Create a client for `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(
        provider: &'static str,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: Duration::from_secs(60),
            client: reqwest::Client::new(),
        }
    }

    /// Bound non-streaming requests by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn body<'a>(&'a self, request: &'a LlmRequest, stream: bool) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        ChatRequest {
            model: if request.model.is_empty() {
                self.model.as_str()
            } else {
                request.model.as_str()
            },
            messages,
            stream,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }

    fn post(&self) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json");
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        builder
    }
}

/// What a single SSE line means for the stream.
#[derive(Debug)]
enum SseEvent {
    Chunk(LlmStreamChunk),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> AppResult<SseEvent> {
    let Some(data) = line.strip_prefix("data:") else {
        // comments (": keep-alive"), event names and ids carry no content
        return Ok(SseEvent::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }

    let parsed: StreamResponse = serde_json::from_str(data).map_err(|e| {
        AppError::generation(
            GenerationErrorKind::Malformed,
            format!("Failed to parse stream event: {}", e),
        )
    })?;

    let usage = parsed.usage.map(LlmUsage::from);
    let Some(choice) = parsed.choices.into_iter().next() else {
        return Ok(match usage {
            Some(usage) => SseEvent::Chunk(LlmStreamChunk::finished(Some(usage))),
            None => SseEvent::Skip,
        });
    };

    let content = choice.delta.content.unwrap_or_default();
    Ok(SseEvent::Chunk(LlmStreamChunk {
        content,
        done: choice.finish_reason.is_some(),
        usage,
    }))
}

#[async_trait::async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn provider_name(&self) -> &str {
        self.provider
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        tracing::debug!(provider = self.provider, model = %request.model, "Sending chat completion");

        let response = self
            .post()
            .timeout(self.timeout)
            .json(&self.body(request, false))
            .send()
            .await
            .map_err(|e| transport_error(self.provider, e))?;

        if !response.status().is_success() {
            return Err(error_from_response(self.provider, response).await);
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            AppError::generation(
                GenerationErrorKind::Malformed,
                format!("Failed to parse {} response: {}", self.provider, e),
            )
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                AppError::generation(
                    GenerationErrorKind::Malformed,
                    format!("{} response contained no choices", self.provider),
                )
            })?;

        Ok(LlmResponse {
            content,
            model: parsed.model,
            usage: parsed.usage.map(LlmUsage::from).unwrap_or_default(),
        })
    }

    async fn stream(&self, request: &LlmRequest) -> AppResult<LlmStream> {
        tracing::debug!(provider = self.provider, model = %request.model, "Starting chat stream");

        let response = self
            .post()
            .json(&self.body(request, true))
            .send()
            .await
            .map_err(|e| transport_error(self.provider, e))?;

        if !response.status().is_success() {
            return Err(error_from_response(self.provider, response).await);
        }

        let lines = line_stream(self.provider, Box::pin(response.bytes_stream()));

        // Stop at [DONE]; anything the server sends afterwards is ignored.
        let chunks = lines
            .map(|line| line.and_then(|l| parse_sse_line(&l)))
            .take_while(|event| futures::future::ready(!matches!(event, Ok(SseEvent::Done))))
            .filter_map(|event| {
                futures::future::ready(match event {
                    Ok(SseEvent::Chunk(chunk)) => Some(Ok(chunk)),
                    Ok(SseEvent::Done) | Ok(SseEvent::Skip) => None,
                    Err(e) => Some(Err(e)),
                })
            });

        Ok(Box::pin(chunks))
    }
}
