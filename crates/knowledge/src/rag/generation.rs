//! Bounded timeouts and retries around the generation backend.

use crate::config::PipelineConfig;
use std::future::Future;
use std::time::Duration;
use synapse_core::{AppError, AppResult, GenerationErrorKind};
use synapse_llm::{LlmClient, LlmRequest, LlmResponse, LlmStream};

/// How long to wait on the backend and how often to retry it.
#[derive(Debug, Clone, Copy)]
pub struct GenerationPolicy {
    pub timeout: Duration,
    /// Extra attempts after the first, transient failures only
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry
    pub backoff: Duration,
}

impl GenerationPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.generation_timeout_secs),
            max_retries: config.max_generation_retries,
            backoff: Duration::from_millis(500),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `op` under the timeout, retrying transient failures.
    async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(AppError::generation(
                    GenerationErrorKind::Timeout,
                    format!("{} timed out after {}s", what, self.timeout.as_secs()),
                )),
            };

            match result {
                Err(err @ AppError::Generation { .. })
                    if err.is_retryable() && attempt < self.max_retries =>
                {
                    let delay = self.delay(attempt);
                    tracing::warn!(
                        error = %err,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Transient generation failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Blocking completion with retry.
    pub async fn complete(
        &self,
        llm: &dyn LlmClient,
        request: &LlmRequest,
    ) -> AppResult<LlmResponse> {
        self.run("generation", move || llm.complete(request)).await
    }

    /// Open a fragment stream with retry.
    ///
    /// Only opening is retried; once the stream yields, failures are final.
    pub async fn open_stream(
        &self,
        llm: &dyn LlmClient,
        request: &LlmRequest,
    ) -> AppResult<LlmStream> {
        self.run("stream start", move || llm.stream(request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use synapse_llm::LlmUsage;

    struct Failing {
        kind: GenerationErrorKind,
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmClient for Failing {
        fn provider_name(&self) -> &str {
            "failing"
        }

        fn default_model(&self) -> &str {
            "test"
        }

        async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(AppError::generation(self.kind, "boom"));
            }
            Ok(LlmResponse {
                content: "ok".to_string(),
                model: request.model.clone(),
                usage: LlmUsage::default(),
            })
        }

        async fn stream(&self, _request: &LlmRequest) -> AppResult<LlmStream> {
            Err(AppError::generation(self.kind, "boom"))
        }
    }

    fn policy(max_retries: u32) -> GenerationPolicy {
        GenerationPolicy {
            timeout: Duration::from_secs(5),
            max_retries,
            backoff: Duration::from_millis(10),
        }
    }

    fn failing(kind: GenerationErrorKind, failures: u32) -> Failing {
        Failing {
            kind,
            failures,
            calls: AtomicU32::new(0),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let llm = failing(GenerationErrorKind::RateLimited, 1);
        let response = policy(1)
            .complete(&llm, &LlmRequest::new("q", "test"))
            .await
            .unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let llm = failing(GenerationErrorKind::Unavailable, 10);
        let err = policy(2)
            .complete(&llm, &LlmRequest::new("q", "test"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Generation { kind: GenerationErrorKind::Unavailable, .. }));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let llm = failing(GenerationErrorKind::Rejected, 1);
        let err = policy(2)
            .complete(&llm, &LlmRequest::new("q", "test"))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    struct Slow;

    #[async_trait]
    impl LlmClient for Slow {
        fn provider_name(&self) -> &str {
            "slow"
        }

        fn default_model(&self) -> &str {
            "test"
        }

        async fn complete(&self, _request: &LlmRequest) -> AppResult<LlmResponse> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(AppError::Other("unreachable".to_string()))
        }

        async fn stream(&self, _request: &LlmRequest) -> AppResult<LlmStream> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(AppError::Other("unreachable".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_generation_timeout() {
        let err = policy(0)
            .complete(&Slow, &LlmRequest::new("q", "test"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Generation { kind: GenerationErrorKind::Timeout, .. }));
    }
}
