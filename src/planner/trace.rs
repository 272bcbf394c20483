//! Per-round audit records

use crate::retrieval::{EvidenceSet, Origin, Query};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Why the retrieval loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The necessity judge decided no retrieval was needed
    Skipped,
    Sufficient,
    RoundBudgetExhausted,
    /// A non-fatal failure in rewriting, search or reranking
    ComponentFailure,
    /// No query left that earlier rounds have not already searched
    QueryExhausted,
    TurnBudgetExceeded,
}

/// What the planner did after a round
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    /// Retrieve again; `gap` is what the evidence was missing
    Continue { gap: String },
    Terminate { reason: Termination },
}

/// Non-fatal failure absorbed during a round
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    RetrievalFailure {
        /// Failed sub-search, or none when the whole search failed
        origin: Option<Origin>,
        message: String,
    },
    ScoringFailure {
        message: String,
    },
    RewriteFailure {
        message: String,
    },
}

/// One retrieval round: the query searched, the evidence it produced and the
/// decision taken
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundTrace {
    pub round: u32,
    pub query: Query,
    pub evidence: EvidenceSet,
    pub decision: Decision,
    pub degradations: Vec<Degradation>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RoundTrace {
    /// One-line summary of what the round lacked, fed to the next rewrite
    pub fn gap_summary(&self) -> String {
        let best = self
            .evidence
            .top_score()
            .map(|s| format!("{:.2}", s))
            .unwrap_or_else(|| "none".to_string());
        format!(
            "round {} searched \"{}\" (best score {}): {}",
            self.round,
            self.query.text(),
            best,
            self.evidence.verdict().rationale
        )
    }
}
