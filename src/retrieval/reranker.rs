//! Reranker gate: cross-encoder scoring, truncation and the sufficiency verdict

use crate::backend::{RelevanceScorer, ScoringError};
use crate::retrieval::{Candidate, EvidenceSet, Query, SufficiencyPolicy};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RerankError {
    #[error("No candidates to rerank")]
    EmptyCandidates,

    #[error("Scorer failed: {0}")]
    Scoring(#[from] ScoringError),

    #[error("Scorer returned {actual} scores for {expected} candidates")]
    ScoreCountMismatch { expected: usize, actual: usize },

    #[error("Scorer returned a non-finite score")]
    InvalidScore,

    #[error("Scoring timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

/// Re-scores candidates and attaches exactly one sufficiency verdict
pub struct RerankerGate {
    scorer: Arc<dyn RelevanceScorer>,
    policy: Arc<dyn SufficiencyPolicy>,
    timeout: Duration,
}

impl RerankerGate {
    pub fn new(
        scorer: Arc<dyn RelevanceScorer>,
        policy: Arc<dyn SufficiencyPolicy>,
        timeout: Duration,
    ) -> Self {
        Self {
            scorer,
            policy,
            timeout,
        }
    }

    /// Rerank candidates against the query
    ///
    /// # Returns
    /// The best `top_k` candidates by rerank score (clamped to the number of
    /// candidates), tagged with the query's round.
    pub async fn rerank(
        &self,
        query: &Query,
        candidates: &[Candidate],
        top_k: usize,
    ) -> Result<EvidenceSet, RerankError> {
        if candidates.is_empty() {
            return Err(RerankError::EmptyCandidates);
        }

        let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        let scores = tokio::time::timeout(self.timeout, self.scorer.score_batch(query.text(), &texts))
            .await
            .map_err(|_| RerankError::Timeout(self.timeout))??;

        if scores.len() != candidates.len() {
            return Err(RerankError::ScoreCountMismatch {
                expected: candidates.len(),
                actual: scores.len(),
            });
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(RerankError::InvalidScore);
        }

        let mut scored: Vec<Candidate> = candidates
            .iter()
            .zip(scores)
            .map(|(candidate, score)| candidate.with_rerank_score(score))
            .collect();
        scored.sort_by(crate::retrieval::evidence_order);
        scored.truncate(top_k.clamp(1, candidates.len()));

        let scores_desc: Vec<f32> = scored.iter().map(Candidate::score).collect();
        let verdict = self.policy.judge(&scores_desc);

        tracing::debug!(
            round = query.round(),
            kept = scored.len(),
            top_score = scores_desc.first().copied().unwrap_or_default(),
            sufficient = verdict.sufficient,
            "Reranked candidates"
        );

        Ok(EvidenceSet::new(scored, query.round(), verdict))
    }
}
