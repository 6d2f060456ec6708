//! Streamed answers as a typed event sequence.
//!
//! The consumer sees zero or more `Fragment`s in receipt order followed by
//! exactly one terminal event: `Completed` carrying the final citations, or
//! `Failed`. Dropping or cancelling the stream stops the producer and
//! abandons the backend request.

use crate::types::Answer;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use synapse_core::{AppError, GenerationErrorKind};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// One item of a streamed answer.
#[derive(Debug)]
pub enum AnswerEvent {
    /// Generated text, in the order the backend produced it
    Fragment(String),
    /// Normal end: the assembled answer with its citations
    Completed(Answer),
    /// Abnormal end: generation failed after the stream began
    Failed(AppError),
}

impl AnswerEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Fragment(_))
    }
}

/// Consumer half of a streamed answer.
pub struct AnswerStream {
    events: mpsc::Receiver<AnswerEvent>,
    token: CancellationToken,
    _guard: DropGuard,
    finished: bool,
}

/// Producer half, owned by the generation task.
pub(crate) struct AnswerSink {
    events: mpsc::Sender<AnswerEvent>,
    token: CancellationToken,
}

const CHANNEL_CAPACITY: usize = 64;

/// Connected producer and consumer.
pub(crate) fn channel() -> (AnswerSink, AnswerStream) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let token = CancellationToken::new();
    let sink = AnswerSink {
        events: tx,
        token: token.clone(),
    };
    let stream = AnswerStream {
        events: rx,
        _guard: token.clone().drop_guard(),
        token,
        finished: false,
    };
    (sink, stream)
}

impl AnswerStream {
    /// A stream that completes immediately with `answer`.
    pub(crate) fn ready(answer: Answer) -> Self {
        let (sink, stream) = channel();
        // Fresh channel, so there is room for one event
        let _ = sink.events.try_send(AnswerEvent::Completed(answer));
        stream
    }

    /// Stop generation. No further events are delivered.
    pub fn cancel(&mut self) {
        self.token.cancel();
        self.events.close();
        self.finished = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Stream for AnswerStream {
    type Item = AnswerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<AnswerEvent>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.events.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                // Producer vanished without a terminal event
                self.finished = true;
                Poll::Ready(Some(AnswerEvent::Failed(AppError::generation(
                    GenerationErrorKind::Unavailable,
                    "answer stream ended without completing",
                ))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AnswerSink {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Deliver a fragment. Returns `false` once the consumer is gone.
    pub(crate) async fn fragment(&self, text: String) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.events.send(AnswerEvent::Fragment(text)).await.is_ok()
    }

    pub(crate) async fn complete(self, answer: Answer) {
        if !self.token.is_cancelled() {
            let _ = self.events.send(AnswerEvent::Completed(answer)).await;
        }
    }

    pub(crate) async fn fail(self, error: AppError) {
        if !self.token.is_cancelled() {
            let _ = self.events.send(AnswerEvent::Failed(error)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn answer(text: &str) -> Answer {
        Answer {
            text: text.to_string(),
            citations: Vec::new(),
            grounded: true,
        }
    }

    #[tokio::test]
    async fn test_fragments_then_completion() {
        let (sink, mut stream) = channel();
        tokio::spawn(async move {
            assert!(sink.fragment("Hel".to_string()).await);
            assert!(sink.fragment("lo".to_string()).await);
            sink.complete(answer("Hello")).await;
        });

        let mut fragments = Vec::new();
        let mut completed = None;
        while let Some(event) = stream.next().await {
            match event {
                AnswerEvent::Fragment(text) => fragments.push(text),
                AnswerEvent::Completed(answer) => completed = Some(answer),
                AnswerEvent::Failed(e) => panic!("unexpected failure: {}", e),
            }
        }
        assert_eq!(fragments, vec!["Hel", "lo"]);
        assert_eq!(completed.unwrap().text, "Hello");
    }

    #[tokio::test]
    async fn test_cancel_stops_delivery_and_signals_producer() {
        let (sink, mut stream) = channel();
        assert!(sink.fragment("first".to_string()).await);

        assert!(matches!(stream.next().await, Some(AnswerEvent::Fragment(_))));
        stream.cancel();

        assert!(sink.token().is_cancelled());
        assert!(!sink.fragment("second".to_string()).await);
        sink.complete(answer("ignored")).await;
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_cancels_producer() {
        let (sink, stream) = channel();
        drop(stream);
        assert!(sink.token().is_cancelled());
        assert!(!sink.fragment("late".to_string()).await);
    }

    #[tokio::test]
    async fn test_vanished_producer_is_reported_as_failure() {
        let (sink, mut stream) = channel();
        drop(sink);
        assert!(matches!(stream.next().await, Some(AnswerEvent::Failed(_))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_ready_stream() {
        let mut stream = AnswerStream::ready(answer("nothing found"));
        assert!(matches!(stream.next().await, Some(AnswerEvent::Completed(a)) if a.text == "nothing found"));
        assert!(stream.next().await.is_none());
    }
}
