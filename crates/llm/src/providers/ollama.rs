//! Ollama generation provider.
//!
//! Ollama API: https://github.com/ollama/ollama/blob/main/docs/api.md
//! Streaming responses are newline-delimited JSON objects.

use crate::client::{LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage};
use crate::providers::{error_from_response, line_stream, transport_error};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use synapse_core::{AppError, AppResult, GenerationErrorKind};

const PROVIDER: &str = "ollama";

/// Ollama API request format.
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize, Default)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

/// Ollama API response format (whole response or one NDJSON line).
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    model: String,
    #[serde(default)]
    response: String,
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaResponse {
    fn usage(&self) -> LlmUsage {
        LlmUsage::new(
            self.prompt_eval_count.unwrap_or(0),
            self.eval_count.unwrap_or(0),
        )
    }
}

/// Ollama generation client.
pub struct OllamaClient {
    base_url: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a client for the default local endpoint.
    ///
    /// Default URL: http://localhost:11434
    pub fn new() -> Self {
        Self::with_base_url("http://localhost:11434")
    }

    /// Create a client with a custom base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: "llama3.2".to_string(),
            timeout: Duration::from_secs(60),
            client: reqwest::Client::new(),
        }
    }

    /// Set the default model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Bound non-streaming requests by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn to_ollama_request(&self, request: &LlmRequest, stream: bool) -> OllamaRequest {
        let model = if request.model.is_empty() {
            self.model.clone()
        } else {
            request.model.clone()
        };

        OllamaRequest {
            model,
            prompt: request.prompt.clone(),
            system: request.system.clone(),
            stream,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        }
    }

    fn url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode one NDJSON line of a streamed generation.
fn parse_stream_line(line: &str) -> AppResult<LlmStreamChunk> {
    let parsed: OllamaResponse = serde_json::from_str(line).map_err(|e| {
        AppError::generation(
            GenerationErrorKind::Malformed,
            format!("Failed to parse Ollama chunk: {}", e),
        )
    })?;

    if let Some(error) = parsed.error {
        return Err(AppError::generation(GenerationErrorKind::Unavailable, error));
    }

    Ok(LlmStreamChunk {
        usage: parsed.done.then(|| parsed.usage()),
        content: parsed.response,
        done: parsed.done,
    })
}

#[async_trait::async_trait]
impl LlmClient for OllamaClient {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        tracing::debug!(model = %request.model, "Sending completion request to Ollama");

        let response = self
            .client
            .post(self.url())
            .timeout(self.timeout)
            .json(&self.to_ollama_request(request, false))
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PROVIDER, response).await);
        }

        let parsed: OllamaResponse = response.json().await.map_err(|e| {
            AppError::generation(
                GenerationErrorKind::Malformed,
                format!("Failed to parse Ollama response: {}", e),
            )
        })?;

        if let Some(error) = parsed.error {
            return Err(AppError::generation(GenerationErrorKind::Unavailable, error));
        }

        tracing::debug!(
            completion_tokens = parsed.eval_count.unwrap_or(0),
            "Received completion from Ollama"
        );

        Ok(LlmResponse {
            usage: parsed.usage(),
            content: parsed.response,
            model: parsed.model,
        })
    }

    async fn stream(&self, request: &LlmRequest) -> AppResult<LlmStream> {
        tracing::debug!(model = %request.model, "Starting streaming request to Ollama");

        let response = self
            .client
            .post(self.url())
            .json(&self.to_ollama_request(request, true))
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PROVIDER, response).await);
        }

        let lines = line_stream(PROVIDER, Box::pin(response.bytes_stream()));
        let chunks = lines.map(|line| line.and_then(|l| parse_stream_line(&l)));

        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_client_creation() {
        let client = OllamaClient::with_base_url("http://localhost:11434/").with_model("mistral");
        assert_eq!(client.provider_name(), "ollama");
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.default_model(), "mistral");
    }

    #[test]
    fn test_ollama_request_conversion() {
        let client = OllamaClient::new();
        let request = LlmRequest::new("Hello", "")
            .with_temperature(0.0)
            .with_max_tokens(100);

        let ollama_req = client.to_ollama_request(&request, true);
        assert_eq!(ollama_req.model, "llama3.2");
        assert_eq!(ollama_req.prompt, "Hello");
        assert!(ollama_req.stream);
        assert_eq!(ollama_req.options.temperature, Some(0.0));
        assert_eq!(ollama_req.options.num_predict, Some(100));
    }

    #[test]
    fn test_parse_stream_lines() {
        let chunk = parse_stream_line(r#"{"model":"llama3.2","response":"Pa","done":false}"#)
            .unwrap();
        assert_eq!(chunk.content, "Pa");
        assert!(!chunk.done);
        assert!(chunk.usage.is_none());

        let last = parse_stream_line(
            r#"{"model":"llama3.2","response":"","done":true,"prompt_eval_count":10,"eval_count":4}"#,
        )
        .unwrap();
        assert!(last.done);
        assert_eq!(last.usage.map(|u| u.total_tokens), Some(14));
    }

    #[test]
    fn test_parse_stream_error_line() {
        let err = parse_stream_line(r#"{"model":"x","done":false,"error":"model crashed"}"#)
            .unwrap_err();
        assert!(err.is_retryable());

        let err = parse_stream_line("not json").unwrap_err();
        assert!(!err.is_retryable());
    }
}
