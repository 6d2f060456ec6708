//! Generation backends and the HTTP plumbing they share.

pub mod ollama;
pub mod openai;

pub use ollama::OllamaClient;
pub use openai::OpenAiCompatibleClient;

use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use std::collections::VecDeque;
use synapse_core::{AppError, AppResult, GenerationErrorKind};

/// Classify a non-success HTTP status.
pub(crate) fn status_kind(status: StatusCode) -> GenerationErrorKind {
    if status == StatusCode::TOO_MANY_REQUESTS {
        GenerationErrorKind::RateLimited
    } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        GenerationErrorKind::Timeout
    } else if status.is_server_error() {
        GenerationErrorKind::Unavailable
    } else {
        GenerationErrorKind::Rejected
    }
}

/// Map a transport-level failure to a generation error.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> AppError {
    let kind = if err.is_timeout() {
        GenerationErrorKind::Timeout
    } else if err.is_decode() {
        GenerationErrorKind::Malformed
    } else {
        GenerationErrorKind::Unavailable
    };
    AppError::generation(kind, format!("{} request failed: {}", provider, err))
}

/// Turn a non-success response into a generation error, consuming the body.
pub(crate) async fn error_from_response(provider: &str, response: reqwest::Response) -> AppError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    AppError::generation(
        status_kind(status),
        format!("{} API error ({}): {}", provider, status, body.trim()),
    )
}

struct LineState<S> {
    inner: S,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    finished: bool,
    provider: &'static str,
}

/// Split a byte stream into non-empty trimmed lines.
///
/// Lines may straddle network chunks, so bytes are buffered until a newline
/// arrives; a trailing line without newline is flushed at end of stream.
pub(crate) fn line_stream<S, B>(
    provider: &'static str,
    bytes: S,
) -> impl Stream<Item = AppResult<String>> + Send
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + Unpin,
    B: AsRef<[u8]> + Send,
{
    let state = LineState {
        inner: bytes,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
        provider,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(line) = st.pending.pop_front() {
                return Some((Ok(line), st));
            }
            if st.finished {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(bytes)) => {
                    st.buffer.extend_from_slice(bytes.as_ref());
                    while let Some(pos) = st.buffer.iter().position(|b| *b == b'\n') {
                        let raw: Vec<u8> = st.buffer.drain(..=pos).collect();
                        push_line(&mut st.pending, &raw);
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(transport_error(st.provider, e)), st));
                }
                None => {
                    st.finished = true;
                    let rest = std::mem::take(&mut st.buffer);
                    push_line(&mut st.pending, &rest);
                }
            }
        }
    })
}

fn push_line(pending: &mut VecDeque<String>, raw: &[u8]) {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if !line.is_empty() {
        pending.push_back(line.to_string());
    }
}
