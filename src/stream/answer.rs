//! Answer streaming over the final evidence set

use crate::backend::{CompletionRequest, Generator, Purpose};
use crate::retrieval::{EvidenceSet, Query};
use crate::stream::{
    build_grounding_prompt, channel, ErrorKind, EventSink, Phase, StreamEvent, TurnStream,
    GROUNDED_SYSTEM_PROMPT,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Drives the generator and turns its tokens into stream events
pub struct AnswerStreamer {
    generator: Arc<dyn Generator>,
    history_window: usize,
    max_chunk_chars: usize,
    max_tokens: u32,
    temperature: f32,
}

impl AnswerStreamer {
    pub fn new(
        generator: Arc<dyn Generator>,
        history_window: usize,
        max_chunk_chars: usize,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            generator,
            history_window,
            max_chunk_chars,
            max_tokens,
            temperature,
        }
    }

    /// Emit `status(generating)`, the evidence (when retrieval ran), tokens and
    /// finally exactly one `done` or `error`
    pub async fn run(
        &self,
        query: &Query,
        evidence: Option<&EvidenceSet>,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) {
        if !sink.send(StreamEvent::status(Phase::Generating)).await {
            return;
        }
        if let Some(evidence) = evidence {
            let event = StreamEvent::Evidence {
                evidence: evidence.clone(),
            };
            if !sink.send(event).await {
                return;
            }
        }

        let prompt = build_grounding_prompt(query, evidence, self.history_window, self.max_chunk_chars);
        let request = CompletionRequest::new(Purpose::Answer, prompt)
            .with_system(GROUNDED_SYSTEM_PROMPT)
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature);

        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.generator.complete(request) => Some(result),
        };

        let mut tokens = match started {
            None => {
                sink.send(StreamEvent::error(ErrorKind::Cancelled, "turn cancelled"))
                    .await;
                return;
            }
            Some(Err(e)) => {
                tracing::warn!("Generation failed to start: {}", e);
                sink.send(StreamEvent::error(ErrorKind::GenerationFailure, e.to_string()))
                    .await;
                return;
            }
            Some(Ok(tokens)) => tokens,
        };

        let mut emitted = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // Dropping the token stream releases the upstream request
                    drop(tokens);
                    tracing::info!(emitted, "Generation cancelled");
                    sink.send(StreamEvent::error(ErrorKind::Cancelled, "turn cancelled"))
                        .await;
                    return;
                }
                next = tokens.next() => next,
            };

            match next {
                Some(Ok(text)) => {
                    if text.is_empty() {
                        continue;
                    }
                    emitted += 1;
                    if !sink.send(StreamEvent::token(text)).await {
                        tracing::debug!("Consumer went away, stopping generation");
                        return;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(emitted, "Generation failed mid-stream: {}", e);
                    sink.send(StreamEvent::error(ErrorKind::GenerationFailure, e.to_string()))
                        .await;
                    return;
                }
                None => break,
            }
        }

        tracing::debug!(emitted, "Generation complete");
        sink.send(StreamEvent::Done).await;
    }

    /// Run on a spawned task and hand back the event stream
    pub fn stream(
        self: &Arc<Self>,
        query: Query,
        evidence: Option<EvidenceSet>,
        buffer: usize,
    ) -> TurnStream {
        let cancel = CancellationToken::new();
        let (sink, stream) = channel(buffer, cancel.clone());
        let streamer = Arc::clone(self);

        tokio::spawn(async move {
            streamer
                .run(&query, evidence.as_ref(), &sink, &cancel)
                .await;
        });

        stream
    }
}
