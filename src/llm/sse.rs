//! Server-sent event decoding for streamed chat completions

use crate::backend::{GenerationError, TokenStream};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    pub(crate) message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Token(String),
    Done,
}

/// Incremental `data: {...}` line decoder
///
/// Network chunks split lines (and UTF-8 sequences) arbitrarily, so bytes are
/// buffered until a full line is available.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the events completed by it, in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<SseEvent, GenerationError>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(&line).transpose() {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever is left once the byte stream ends
    pub fn finish(&mut self) -> Result<Option<SseEvent>, GenerationError> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }
}

fn decode_line(raw: &[u8]) -> Result<Option<SseEvent>, GenerationError> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();

    let Some(payload) = line.strip_prefix("data:") else {
        // Comments, event names and blank separators
        return Ok(None);
    };
    let payload = payload.trim_start();

    if payload == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }

    if let Ok(response) = serde_json::from_str::<StreamResponse>(payload) {
        let token: String = response
            .choices
            .into_iter()
            .filter_map(|c| c.delta.content)
            .collect();
        return Ok((!token.is_empty()).then_some(SseEvent::Token(token)));
    }

    if let Ok(error) = serde_json::from_str::<ErrorResponse>(payload) {
        return Err(GenerationError::Stream(error.error.message));
    }

    Err(GenerationError::Parse(format!(
        "Unexpected stream payload: {}",
        payload
    )))
}

struct DecodeState<S> {
    inner: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    error: Option<GenerationError>,
    finished: bool,
}

/// Turn a response body into a lazy token stream
///
/// Stops at `[DONE]`, at the end of the body, or after the first error.
/// Dropping the stream drops the body and with it the connection.
pub fn token_stream<S, B, E>(body: S) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        inner: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        error: None,
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(token) = state.pending.pop_front() {
                return Some((Ok(token), state));
            }
            if let Some(error) = state.error.take() {
                return Some((Err(error), state));
            }
            if state.finished {
                return None;
            }

            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    for event in state.decoder.push(chunk.as_ref()) {
                        match event {
                            Ok(SseEvent::Token(token)) => state.pending.push_back(token),
                            Ok(SseEvent::Done) => {
                                state.finished = true;
                                break;
                            }
                            Err(e) => {
                                state.error = Some(e);
                                state.finished = true;
                                break;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    state.error = Some(GenerationError::Stream(e.to_string()));
                    state.finished = true;
                }
                None => {
                    state.finished = true;
                    match state.decoder.finish() {
                        Ok(Some(SseEvent::Token(token))) => state.pending.push_back(token),
                        Ok(_) => {}
                        Err(e) => state.error = Some(e),
                    }
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(content: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":{}}}}}]}}\n\n",
            serde_json::to_string(content).unwrap()
        )
    }

    async fn collect(chunks: Vec<Result<Vec<u8>, String>>) -> Vec<Result<String, GenerationError>> {
        token_stream(futures::stream::iter(chunks)).collect().await
    }

    #[test]
    fn test_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::new();
        let event = delta("Hello");
        let (a, b) = event.as_bytes().split_at(10);

        assert!(decoder.push(a).is_empty());
        assert_eq!(
            decoder.push(b),
            vec![Ok(SseEvent::Token("Hello".to_string()))]
        );
    }

    #[test]
    fn test_decoder_ignores_comments_and_role_deltas() {
        let mut decoder = SseDecoder::new();
        let events = decoder
            .push(b": keep-alive\n\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n");
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_stream_until_done() {
        let body = format!("{}{}data: [DONE]\n\n{}", delta("Re"), delta("funds"), delta("ignored"));
        let tokens = collect(vec![Ok(body.into_bytes())]).await;

        let tokens: Vec<String> = tokens.into_iter().map(|t| t.unwrap()).collect();
        assert_eq!(tokens, vec!["Re", "funds"]);
    }

    #[tokio::test]
    async fn test_stream_error_payload_ends_stream() {
        let body = format!(
            "{}data: {{\"error\":{{\"message\":\"overloaded\"}}}}\n\n{}",
            delta("partial"),
            delta("never")
        );
        let items = collect(vec![Ok(body.into_bytes())]).await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok("partial".to_string()));
        assert_eq!(
            items[1],
            Err(GenerationError::Stream("overloaded".to_string()))
        );
    }

    #[tokio::test]
    async fn test_transport_error() {
        let items = collect(vec![
            Ok(delta("a").into_bytes()),
            Err("connection reset".to_string()),
            Ok(delta("b").into_bytes()),
        ])
        .await;

        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(GenerationError::Stream(_))));
    }
}
