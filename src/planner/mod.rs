//! Retrieval planner: the bounded rewrite, search, rerank and judge loop
//!
//! A turn first asks whether retrieval is needed at all. If it is, rounds run
//! strictly one after another. The loop ends on sufficient evidence, on the
//! round budget, on any non-fatal failure during a round, when the rewriter
//! has no new query to offer, or when the turn's time budget is spent.
//! Evidence from every round is folded into one merged set; each round leaves
//! a [`RoundTrace`].

mod judge;
mod rewriter;
mod trace;

pub use judge::{parse_necessity, Necessity, NecessityJudge};
pub use rewriter::{sanitize_rewrite, QueryRewriter, RewriteError};
pub use trace::{Decision, Degradation, RoundTrace, Termination};

use crate::config::Config;
use crate::retrieval::{
    merge_evidence, EvidenceSet, HybridRetriever, Query, RerankerGate, RetrievalError,
};
use crate::stream::{EventSink, Phase, StreamEvent};
use chrono::Utc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("No index available: {0}")]
    NoIndexAvailable(String),

    #[error("Turn cancelled")]
    Cancelled,
}

/// Outcome of planning one turn
#[derive(Debug, Clone)]
pub struct Plan {
    pub necessity: Necessity,
    /// Merged evidence; `None` only when retrieval was skipped
    pub evidence: Option<EvidenceSet>,
    pub traces: Vec<RoundTrace>,
    pub termination: Termination,
}

/// Bounds of the retrieval loop
#[derive(Debug, Clone)]
pub struct PlannerLimits {
    pub max_rounds: u32,
    /// Candidates retrieved per round
    pub top_n: usize,
    /// Evidence kept per round after reranking
    pub top_k: usize,
    /// Cap on the merged evidence set
    pub max_evidence: usize,
    pub turn_budget: Duration,
}

impl PlannerLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_rounds: config.planner.max_rounds,
            top_n: config.retrieval.top_n,
            top_k: config.rerank.top_k,
            max_evidence: config.planner.max_evidence,
            turn_budget: config.timeouts.turn_budget(),
        }
    }
}

struct RoundOutcome {
    query: Query,
    evidence: EvidenceSet,
    degradations: Vec<Degradation>,
}

/// What follows an insufficient round
enum NextRound {
    Search(Query),
    Stop {
        reason: Termination,
        degradation: Option<Degradation>,
    },
}

/// Case- and whitespace-insensitive query identity
fn same_search(a: &str, b: &str) -> bool {
    a.split_whitespace()
        .map(str::to_lowercase)
        .eq(b.split_whitespace().map(str::to_lowercase))
}

/// Send an event unless the turn is cancelled first
async fn emit(
    sink: &EventSink,
    cancel: &CancellationToken,
    event: StreamEvent,
) -> Result<(), PlanError> {
    let delivered = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(PlanError::Cancelled),
        delivered = sink.send(event) => delivered,
    };
    if !delivered {
        cancel.cancel();
        return Err(PlanError::Cancelled);
    }
    Ok(())
}

pub struct RetrievalPlanner {
    judge: NecessityJudge,
    rewriter: QueryRewriter,
    retriever: HybridRetriever,
    gate: RerankerGate,
    limits: PlannerLimits,
}

impl RetrievalPlanner {
    pub fn new(
        judge: NecessityJudge,
        rewriter: QueryRewriter,
        retriever: HybridRetriever,
        gate: RerankerGate,
        limits: PlannerLimits,
    ) -> Self {
        Self {
            judge,
            rewriter,
            retriever,
            gate,
            limits,
        }
    }

    pub fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    pub fn gate(&self) -> &RerankerGate {
        &self.gate
    }

    pub fn limits(&self) -> &PlannerLimits {
        &self.limits
    }

    /// Plan one turn, emitting a `retrieving` status before each round and a
    /// `process` event after it
    pub async fn plan(
        &self,
        query: &Query,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<Plan, PlanError> {
        let necessity = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PlanError::Cancelled),
            necessity = self.judge.judge(query) => necessity,
        };

        if necessity == Necessity::Skip {
            tracing::info!("Retrieval skipped by necessity judge");
            return Ok(Plan {
                necessity,
                evidence: None,
                traces: Vec::new(),
                termination: Termination::Skipped,
            });
        }

        let deadline = Instant::now() + self.limits.turn_budget;
        let mut merged: Option<EvidenceSet> = None;
        let mut traces: Vec<RoundTrace> = Vec::new();
        let mut termination = Termination::RoundBudgetExhausted;
        // Query for the next round; round 1 rewrites the question itself
        let mut planned: Option<Query> = None;

        for round in 1..=self.limits.max_rounds {
            if cancel.is_cancelled() {
                return Err(PlanError::Cancelled);
            }
            if Instant::now() >= deadline {
                tracing::warn!(round, "Turn budget exhausted before round");
                termination = Termination::TurnBudgetExceeded;
                break;
            }

            emit(sink, cancel, StreamEvent::status(Phase::Retrieving { round })).await?;

            let started_at = Utc::now();
            let started = Instant::now();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PlanError::Cancelled),
                outcome = tokio::time::timeout_at(
                    deadline,
                    self.run_round(query, planned.take(), merged.is_some(), round),
                ) => outcome,
            };
            let outcome = match outcome {
                Ok(outcome) => outcome?,
                Err(_) => {
                    tracing::warn!(round, "Turn budget exhausted during round");
                    termination = Termination::TurnBudgetExceeded;
                    break;
                }
            };

            let mut reason = if outcome.evidence.is_sufficient() {
                Some(Termination::Sufficient)
            } else if !outcome.degradations.is_empty() {
                Some(Termination::ComponentFailure)
            } else if round >= self.limits.max_rounds {
                Some(Termination::RoundBudgetExhausted)
            } else {
                None
            };

            let gap = outcome.evidence.verdict().rationale.clone();
            merged = Some(merge_evidence(
                merged.as_ref(),
                &outcome.evidence,
                self.limits.max_evidence,
            ));
            traces.push(RoundTrace {
                round,
                query: outcome.query,
                evidence: outcome.evidence,
                decision: Decision::Continue { gap },
                degradations: outcome.degradations,
                started_at,
                elapsed_ms: 0,
            });
            let current = traces.len() - 1;

            if reason.is_none() {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PlanError::Cancelled),
                    next = tokio::time::timeout_at(
                        deadline,
                        self.next_round(query, &traces, round + 1),
                    ) => next,
                };
                match next {
                    Ok(NextRound::Search(next_query)) => planned = Some(next_query),
                    Ok(NextRound::Stop {
                        reason: stop,
                        degradation,
                    }) => {
                        reason = Some(stop);
                        traces[current].degradations.extend(degradation);
                    }
                    Err(_) => {
                        tracing::warn!(round, "Turn budget exhausted while planning the next round");
                        reason = Some(Termination::TurnBudgetExceeded);
                    }
                }
            }

            let trace = &mut traces[current];
            if let Some(reason) = reason {
                trace.decision = Decision::Terminate { reason };
            }
            trace.elapsed_ms = started.elapsed().as_millis() as u64;

            tracing::info!(
                round,
                query = %trace.query.text(),
                candidates = trace.evidence.len(),
                top_score = trace.evidence.top_score().unwrap_or_default(),
                sufficient = trace.evidence.is_sufficient(),
                degradations = trace.degradations.len(),
                "Round complete"
            );
            tracing::debug!(decision = ?trace.decision, "Planner decision");

            let event = StreamEvent::Process {
                trace: Box::new(trace.clone()),
            };
            emit(sink, cancel, event).await?;

            if let Some(reason) = reason {
                termination = reason;
                break;
            }
        }

        let evidence = merged.unwrap_or_else(|| {
            EvidenceSet::empty(0, "turn budget exhausted before any retrieval")
        });

        Ok(Plan {
            necessity,
            evidence: Some(evidence),
            traces,
            termination,
        })
    }

    /// Search and rerank one round. Without a planned query, round 1
    /// rewrites the question, falling back to the question as asked.
    async fn run_round(
        &self,
        original: &Query,
        planned: Option<Query>,
        has_evidence: bool,
        round: u32,
    ) -> Result<RoundOutcome, PlanError> {
        let mut degradations = Vec::new();

        let query = match planned {
            Some(query) => query,
            None => {
                let (query, rewrite_error) =
                    self.rewriter.rewrite_or_fallback(original, &[], round).await;
                match rewrite_error {
                    None | Some(RewriteError::Disabled) => {}
                    Some(e) => {
                        tracing::warn!(round, "Rewrite failed, searching the question as asked: {}", e);
                        degradations.push(Degradation::RewriteFailure {
                            message: e.to_string(),
                        });
                    }
                }
                query
            }
        };

        let evidence = match self.retriever.retrieve(&query, self.limits.top_n).await {
            Ok(retrieval) => {
                degradations.extend(retrieval.failures.into_iter().map(|f| {
                    Degradation::RetrievalFailure {
                        origin: Some(f.origin),
                        message: f.message,
                    }
                }));

                if retrieval.candidates.is_empty() {
                    EvidenceSet::empty(round, "no candidates retrieved")
                } else {
                    match self
                        .gate
                        .rerank(&query, &retrieval.candidates, self.limits.top_k)
                        .await
                    {
                        Ok(evidence) => evidence,
                        Err(e) => {
                            tracing::warn!(round, "Reranking failed, keeping fused order: {}", e);
                            degradations.push(Degradation::ScoringFailure {
                                message: e.to_string(),
                            });
                            EvidenceSet::unscored(
                                round,
                                &retrieval.candidates,
                                self.limits.top_k,
                                format!("scoring failed: {}", e),
                            )
                        }
                    }
                }
            }
            Err(e @ RetrievalError::NoIndexAvailable { .. }) if !has_evidence => {
                tracing::error!(round, "{}", e);
                return Err(PlanError::NoIndexAvailable(e.to_string()));
            }
            Err(e) => {
                tracing::warn!(round, "Retrieval failed: {}", e);
                degradations.push(Degradation::RetrievalFailure {
                    origin: None,
                    message: e.to_string(),
                });
                EvidenceSet::empty(round, format!("retrieval failed: {}", e))
            }
        };

        Ok(RoundOutcome {
            query,
            evidence,
            degradations,
        })
    }

    /// Query for the next round, rewritten toward what the rounds so far
    /// were missing. A query an earlier round already searched is never
    /// reissued.
    async fn next_round(&self, original: &Query, prior: &[RoundTrace], round: u32) -> NextRound {
        match self.rewriter.rewrite(original, prior, round).await {
            Ok(query) => {
                if prior
                    .iter()
                    .any(|t| same_search(t.query.text(), query.text()))
                {
                    tracing::info!(round, query = %query.text(), "Rewrite repeats an earlier search");
                    NextRound::Stop {
                        reason: Termination::QueryExhausted,
                        degradation: None,
                    }
                } else {
                    NextRound::Search(query)
                }
            }
            Err(RewriteError::Disabled) => NextRound::Stop {
                reason: Termination::QueryExhausted,
                degradation: None,
            },
            Err(e) => {
                tracing::warn!(round, "Rewrite failed, stopping after this round: {}", e);
                NextRound::Stop {
                    reason: Termination::ComponentFailure,
                    degradation: Some(Degradation::RewriteFailure {
                        message: e.to_string(),
                    }),
                }
            }
        }
    }
}
