//! Retrieval necessity judgment

use crate::backend::{CompletionRequest, Generator, Purpose};
use crate::retrieval::{format_history, Query};
use std::sync::Arc;
use std::time::Duration;

/// Whether a turn needs retrieval at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Necessity {
    Retrieve,
    Skip,
}

const JUDGE_SYSTEM_PROMPT: &str = "You decide whether answering a message requires looking up \
documents in a knowledge base. Greetings, small talk and questions answerable from the \
conversation alone do not. Reply with exactly one word: RETRIEVE or SKIP.";

/// Map a judge reply to a decision; anything unclear means retrieve
pub fn parse_necessity(reply: &str) -> Necessity {
    let word = reply
        .trim()
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or_default()
        .to_ascii_uppercase();

    match word.as_str() {
        "SKIP" | "NO" => Necessity::Skip,
        _ => Necessity::Retrieve,
    }
}

/// One generator call per turn deciding whether to search
pub struct NecessityJudge {
    generator: Arc<dyn Generator>,
    enabled: bool,
    timeout: Duration,
    history_window: usize,
}

impl NecessityJudge {
    pub fn new(
        generator: Arc<dyn Generator>,
        enabled: bool,
        timeout: Duration,
        history_window: usize,
    ) -> Self {
        Self {
            generator,
            enabled,
            timeout,
            history_window,
        }
    }

    /// Judge the user's query. Never fails: errors and timeouts mean retrieve.
    pub async fn judge(&self, query: &Query) -> Necessity {
        if !self.enabled {
            return Necessity::Retrieve;
        }

        let mut prompt = String::new();
        let history = query.recent_history(self.history_window);
        if !history.is_empty() {
            prompt.push_str("Conversation so far:\n");
            prompt.push_str(&format_history(history));
            prompt.push_str("\n\n");
        }
        prompt.push_str("Message: ");
        prompt.push_str(query.text());
        prompt.push_str("\n\nAnswer RETRIEVE or SKIP.");

        let request = CompletionRequest::new(Purpose::NecessityJudgment, prompt)
            .with_system(JUDGE_SYSTEM_PROMPT)
            .with_max_tokens(8)
            .with_temperature(0.0);

        match tokio::time::timeout(self.timeout, self.generator.complete_text(request)).await {
            Ok(Ok(reply)) => {
                let necessity = parse_necessity(&reply);
                tracing::debug!(reply = %reply.trim(), ?necessity, "Necessity judged");
                necessity
            }
            Ok(Err(e)) => {
                tracing::warn!("Necessity judge failed, retrieving: {}", e);
                Necessity::Retrieve
            }
            Err(_) => {
                tracing::warn!(
                    "Necessity judge timed out after {}ms, retrieving",
                    self.timeout.as_millis()
                );
                Necessity::Retrieve
            }
        }
    }
}
