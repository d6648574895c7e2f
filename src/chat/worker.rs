//! The single-slot background worker that performs one remote call at a time.
//!
//! The worker takes a request snapshot, opens the response stream through a
//! [`ChatTransport`], reduces it, and reports everything through an ordered channel of
//! [`ChatEvent`]s.  Every exchange ends with exactly one terminal event.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::chat::config::OutputMode;
use crate::client::ChatTransport;
use crate::error::{Error, Result};
use crate::observability::SUBMISSIONS_REJECTED;
use crate::reducer::{ChatEvent, StreamFailure, reduce_stream};
use crate::types::ChatCompletionRequest;

/// Runs exchanges on a tokio task and hands their events back to the foreground.
pub struct ChatWorker {
    transport: Arc<dyn ChatTransport>,
    events_tx: UnboundedSender<ChatEvent>,
    events_rx: UnboundedReceiver<ChatEvent>,
    busy: bool,
}

impl ChatWorker {
    /// Create an idle worker that sends requests through `transport`.
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            events_tx,
            events_rx,
            busy: false,
        }
    }

    /// Returns true from submission until the terminal event has been received.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Start an exchange.  Rejected while another exchange is in flight.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&mut self, request: ChatCompletionRequest, mode: OutputMode) -> Result<()> {
        if self.busy {
            SUBMISSIONS_REJECTED.click();
            return Err(Error::busy("a response is still streaming"));
        }
        self.busy = true;
        let transport = Arc::clone(&self.transport);
        let mut sink = self.events_tx.clone();
        tokio::spawn(async move {
            tracing::debug!(model = %request.model, %mode, "exchange started");
            let outcome = match transport.stream(request).await {
                Ok(stream) => reduce_stream(stream, mode, &mut sink).await,
                Err(error) => {
                    tracing::warn!(error = %error, "failed to open response stream");
                    Err(StreamFailure {
                        error,
                        partial_text: String::new(),
                        partial_audio: Vec::new(),
                    })
                }
            };
            let terminal = match outcome {
                Ok(reduced) => ChatEvent::StreamComplete(reduced),
                Err(failure) => ChatEvent::StreamFailed(failure),
            };
            if sink.send(terminal).is_err() {
                tracing::debug!("worker dropped before the exchange finished");
            }
        });
        Ok(())
    }

    /// Wait for the next event of the current exchange.
    ///
    /// Returns `None` when no exchange is in flight.
    pub async fn next_event(&mut self) -> Option<ChatEvent> {
        if !self.busy {
            return None;
        }
        let event = self.events_rx.recv().await?;
        self.observe(&event);
        Some(event)
    }

    /// Take the next event if one is already queued.
    pub fn try_next_event(&mut self) -> Option<ChatEvent> {
        if !self.busy {
            return None;
        }
        let event = self.events_rx.try_recv().ok()?;
        self.observe(&event);
        Some(event)
    }

    fn observe(&mut self, event: &ChatEvent) {
        if event.is_terminal() {
            self.busy = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChunkStream;
    use crate::types::{ChatCompletionChunk, Fragment, Model, Turn, Usage};
    use async_trait::async_trait;
    use futures::stream;

    struct Canned(Vec<Fragment>);

    #[async_trait]
    impl ChatTransport for Canned {
        async fn stream(&self, _request: ChatCompletionRequest) -> Result<ChunkStream> {
            let chunks: Vec<Result<ChatCompletionChunk>> =
                self.0.iter().cloned().map(|f| Ok(f.into())).collect();
            Ok(Box::pin(stream::iter(chunks)))
        }
    }

    struct Refusing;

    #[async_trait]
    impl ChatTransport for Refusing {
        async fn stream(&self, _request: ChatCompletionRequest) -> Result<ChunkStream> {
            Err(Error::authentication("invalid api key"))
        }
    }

    fn request() -> ChatCompletionRequest {
        ChatCompletionRequest::new(Model::from("qwen-omni-turbo"), vec![Turn::user("hi")])
    }

    async fn drain(worker: &mut ChatWorker) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Some(event) = worker.next_event().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn emits_deltas_then_completion() {
        let transport = Canned(vec![
            Fragment::text("Hi"),
            Fragment::text(" there"),
            Fragment::usage(Usage::new(5, 2)),
        ]);
        let mut worker = ChatWorker::new(Arc::new(transport));
        worker.submit(request(), OutputMode::TextOnly).unwrap();
        assert!(worker.is_busy());

        let events = drain(&mut worker).await;
        assert!(!worker.is_busy());
        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], ChatEvent::TextDelta(t) if t == "Hi"));
        assert!(matches!(&events[2], ChatEvent::UsageReport(_)));
        let ChatEvent::StreamComplete(reduced) = &events[3] else {
            panic!("expected completion, got {:?}", events[3]);
        };
        assert_eq!(reduced.text, "Hi there");
    }

    #[tokio::test]
    async fn rejects_second_submission() {
        let mut worker = ChatWorker::new(Arc::new(Canned(vec![Fragment::text("x")])));
        worker.submit(request(), OutputMode::TextOnly).unwrap();
        let err = worker
            .submit(request(), OutputMode::TextOnly)
            .unwrap_err();
        assert!(err.is_busy());
        let events = drain(&mut worker).await;
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        worker.submit(request(), OutputMode::TextOnly).unwrap();
    }

    #[tokio::test]
    async fn open_failure_is_terminal() {
        let mut worker = ChatWorker::new(Arc::new(Refusing));
        worker.submit(request(), OutputMode::TextOnly).unwrap();
        let events = drain(&mut worker).await;
        assert_eq!(events.len(), 1);
        let ChatEvent::StreamFailed(failure) = &events[0] else {
            panic!("expected failure");
        };
        assert!(failure.error.is_authentication());
        assert!(failure.partial_text.is_empty());
    }

    #[test]
    fn idle_worker_has_no_events() {
        let mut worker = ChatWorker::new(Arc::new(Refusing));
        assert!(worker.try_next_event().is_none());
        assert!(tokio_test::block_on(worker.next_event()).is_none());
    }
}
