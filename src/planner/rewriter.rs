//! Search query rewriting with mandatory fallback

use crate::backend::{CompletionRequest, GenerationError, Generator, Purpose};
use crate::planner::RoundTrace;
use crate::retrieval::{format_history, Query};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RewriteError {
    #[error("Query rewriting is disabled")]
    Disabled,

    #[error("Rewrite generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Rewrite timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Degenerate rewrite: {0}")]
    Degenerate(String),
}

static LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(rewritten\s+)?(search\s+)?query\s*[:：]\s*").expect("Invalid label regex")
});

const REWRITE_SYSTEM_PROMPT: &str = "You rewrite a user's question into a single search query \
for a document knowledge base. Resolve pronouns using the conversation, keep the key terms, \
and when earlier searches fell short, target what they were missing. \
Reply with the query only, on one line.";

/// Clean up a generator reply into a usable query text
pub fn sanitize_rewrite(raw: &str, max_chars: usize) -> Result<String, RewriteError> {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();

    let unlabeled = LABEL.replace(line, "");
    let text = unlabeled
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '“' | '”'))
        .trim();

    if text.is_empty() {
        return Err(RewriteError::Degenerate("empty output".to_string()));
    }
    if text.chars().count() > max_chars {
        return Err(RewriteError::Degenerate(format!(
            "longer than {} characters",
            max_chars
        )));
    }
    if !text.chars().any(char::is_alphanumeric) {
        return Err(RewriteError::Degenerate(
            "no alphanumeric characters".to_string(),
        ));
    }

    Ok(text.to_string())
}

/// Turns the user's question into a search query for each round
pub struct QueryRewriter {
    generator: Arc<dyn Generator>,
    enabled: bool,
    timeout: Duration,
    max_chars: usize,
    history_window: usize,
}

impl QueryRewriter {
    pub fn new(
        generator: Arc<dyn Generator>,
        enabled: bool,
        timeout: Duration,
        max_chars: usize,
        history_window: usize,
    ) -> Self {
        Self {
            generator,
            enabled,
            timeout,
            max_chars,
            history_window,
        }
    }

    /// Rewrite `original` for `round`, seeded by the traces of earlier rounds
    pub async fn rewrite(
        &self,
        original: &Query,
        prior: &[RoundTrace],
        round: u32,
    ) -> Result<Query, RewriteError> {
        if !self.enabled {
            return Err(RewriteError::Disabled);
        }

        let request = CompletionRequest::new(Purpose::QueryRewrite, self.build_prompt(original, prior))
            .with_system(REWRITE_SYSTEM_PROMPT)
            .with_max_tokens(96)
            .with_temperature(0.0);

        let reply = tokio::time::timeout(self.timeout, self.generator.complete_text(request))
            .await
            .map_err(|_| RewriteError::Timeout(self.timeout))??;

        let text = sanitize_rewrite(&reply, self.max_chars)?;
        Ok(original.for_round(text, round))
    }

    /// Rewrite, or fall back to the previous round's query (the original
    /// query before any round). Returns the query and the failure, if any.
    pub async fn rewrite_or_fallback(
        &self,
        original: &Query,
        prior: &[RoundTrace],
        round: u32,
    ) -> (Query, Option<RewriteError>) {
        match self.rewrite(original, prior, round).await {
            Ok(query) => (query, None),
            Err(e) => {
                let previous = prior.last().map(|t| &t.query).unwrap_or(original);
                (previous.reissue(round), Some(e))
            }
        }
    }

    fn build_prompt(&self, original: &Query, prior: &[RoundTrace]) -> String {
        let mut prompt = String::new();

        let history = original.recent_history(self.history_window);
        if !history.is_empty() {
            prompt.push_str("Conversation so far:\n");
            prompt.push_str(&format_history(history));
            prompt.push_str("\n\n");
        }

        prompt.push_str("Question: ");
        prompt.push_str(original.text());
        prompt.push('\n');

        if !prior.is_empty() {
            prompt.push_str("\nEarlier searches did not find enough:\n");
            for trace in prior {
                prompt.push_str("- ");
                prompt.push_str(&trace.gap_summary());
                prompt.push('\n');
            }
            prompt.push_str("Write a different query that targets the missing information.\n");
        }

        prompt.push_str("\nSearch query:");
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_labels_and_quotes() {
        assert_eq!(
            sanitize_rewrite("Query: \"refund policy\"", 100).unwrap(),
            "refund policy"
        );
        assert_eq!(
            sanitize_rewrite("\n  Rewritten search query: refund window days\nbecause...", 100)
                .unwrap(),
            "refund window days"
        );
        assert_eq!(sanitize_rewrite("'shipping times'", 100).unwrap(), "shipping times");
    }

    #[test]
    fn test_sanitize_rejects_degenerate_output() {
        assert!(matches!(
            sanitize_rewrite("", 100),
            Err(RewriteError::Degenerate(_))
        ));
        assert!(matches!(
            sanitize_rewrite("Query: \"\"", 100),
            Err(RewriteError::Degenerate(_))
        ));
        assert!(matches!(
            sanitize_rewrite("?!...", 100),
            Err(RewriteError::Degenerate(_))
        ));
        assert!(matches!(
            sanitize_rewrite(&"refund ".repeat(30), 100),
            Err(RewriteError::Degenerate(_))
        ));
    }
}
