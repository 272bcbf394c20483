//! Turn events and the channel that carries them to the caller
//!
//! A turn produces a finite, ordered sequence of [`StreamEvent`]s that always
//! ends in exactly one `done` or `error`. Producers write through an
//! [`EventSink`]; the caller pulls from a [`TurnStream`].

mod answer;
mod prompt;

pub use answer::AnswerStreamer;
pub use prompt::{build_grounding_prompt, GROUNDED_SYSTEM_PROMPT};

use crate::planner::RoundTrace;
use crate::retrieval::EvidenceSet;
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Lifecycle phase reported by `status` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Retrieving { round: u32 },
    Generating,
}

/// Fatal error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoIndexAvailable,
    GenerationFailure,
    Cancelled,
    Internal,
}

/// One event of a turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status { phase: Phase },
    /// Audit record of a finished retrieval round
    Process { trace: Box<RoundTrace> },
    Evidence { evidence: EvidenceSet },
    Token { text: String },
    Done,
    Error { kind: ErrorKind, message: String },
}

impl StreamEvent {
    pub fn status(phase: Phase) -> Self {
        StreamEvent::Status { phase }
    }

    pub fn token(text: impl Into<String>) -> Self {
        StreamEvent::Token { text: text.into() }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        StreamEvent::Error {
            kind,
            message: message.into(),
        }
    }

    /// `done` or `error`
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}

/// Producer half of a turn's event channel
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    /// Send an event, waiting for channel capacity
    ///
    /// Returns false once the consumer is gone; producers should stop then.
    pub async fn send(&self, event: StreamEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a bounded event channel for one turn
pub fn channel(buffer: usize, cancel: CancellationToken) -> (EventSink, TurnStream) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (
        EventSink { tx },
        TurnStream {
            rx,
            cancel,
            finished: false,
        },
    )
}

/// Consumer half of a turn: a lazy, finite, non-restartable event sequence
///
/// Dropping the stream cancels the turn.
#[derive(Debug)]
pub struct TurnStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    finished: bool,
}

impl TurnStream {
    /// Next event, or `None` after the terminal event
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        std::future::poll_fn(|cx| self.poll_event(cx)).await
    }

    /// Ask the turn to stop; a `Cancelled` error follows unless it already ended
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain the remaining events
    pub async fn collect_events(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                    self.rx.close();
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                // Producer vanished without a terminal event (panic or abort)
                self.finished = true;
                Poll::Ready(Some(StreamEvent::error(
                    ErrorKind::Internal,
                    "turn ended without a terminal event",
                )))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Stream for TurnStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_event(cx)
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel.cancel();
        }
    }
}
