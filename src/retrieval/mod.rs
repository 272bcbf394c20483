//! Hybrid retrieval, reranking and evidence sets
//!
//! Lexical and vector search run side by side, get combined with Reciprocal
//! Rank Fusion, and the fused candidates pass through a cross-encoder gate that
//! decides whether the evidence is good enough to answer from.

mod candidate;
mod deduplication;
mod evidence;
mod fusion;
mod hybrid;
mod reranker;

pub use candidate::{evidence_order, Candidate, Origin, RankedHit};
pub use deduplication::merge_evidence;
pub use evidence::{EvidenceSet, SufficiencyPolicy, ThresholdPolicy, Verdict};
pub use fusion::{reciprocal_rank_fusion, FusedEntry, FusionConfig, FusionError};
pub use hybrid::{HybridRetriever, Retrieval, RetrievalError, SearchFailure};
pub use reranker::{RerankError, RerankerGate};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One prior message of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Immutable query value.
///
/// The user's question carries round 0; the query searched in round `n`
/// carries round `n`. Rewrites produce new values so every round's query stays
/// in the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    text: String,
    #[serde(skip_serializing)]
    history: Arc<[Turn]>,
    round: u32,
}

impl Query {
    pub fn new(text: impl Into<String>, history: Vec<Turn>) -> Self {
        Self {
            text: text.into(),
            history: history.into(),
            round: 0,
        }
    }

    /// A new query for `round`, sharing this query's conversation history
    pub fn for_round(&self, text: impl Into<String>, round: u32) -> Self {
        Self {
            text: text.into(),
            history: Arc::clone(&self.history),
            round,
        }
    }

    /// Same text, re-issued for another round
    pub fn reissue(&self, round: u32) -> Self {
        self.for_round(self.text.clone(), round)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// The last `window` turns of the conversation
    pub fn recent_history(&self, window: usize) -> &[Turn] {
        let start = self.history.len().saturating_sub(window);
        &self.history[start..]
    }

    pub fn round(&self) -> u32 {
        self.round
    }
}

/// Render turns as `role: content` lines for prompts
pub fn format_history(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role.as_str(), t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_round_keeps_history() {
        let query = Query::new(
            "what about refunds?",
            vec![Turn::user("hi"), Turn::assistant("hello")],
        );
        let rewritten = query.for_round("refund policy", 1);

        assert_eq!(query.text(), "what about refunds?");
        assert_eq!(query.round(), 0);
        assert_eq!(rewritten.text(), "refund policy");
        assert_eq!(rewritten.round(), 1);
        assert_eq!(rewritten.history().len(), 2);
    }

    #[test]
    fn test_recent_history_window() {
        let history = (0..5).map(|i| Turn::user(format!("m{}", i))).collect();
        let query = Query::new("q", history);

        let recent = query.recent_history(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "m3");
        assert_eq!(query.recent_history(10).len(), 5);
    }
}
