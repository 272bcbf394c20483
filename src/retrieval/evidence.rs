//! Evidence sets and the sufficiency verdict attached to them

use crate::retrieval::candidate::{evidence_order, Candidate};
use serde::Serialize;

/// Whether a set of evidence is good enough to answer from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub sufficient: bool,
    pub rationale: String,
}

impl Verdict {
    pub fn sufficient(rationale: impl Into<String>) -> Self {
        Self {
            sufficient: true,
            rationale: rationale.into(),
        }
    }

    pub fn insufficient(rationale: impl Into<String>) -> Self {
        Self {
            sufficient: false,
            rationale: rationale.into(),
        }
    }
}

/// Ranked, verdict-carrying evidence produced by one retrieval round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceSet {
    candidates: Vec<Candidate>,
    round: u32,
    verdict: Verdict,
}

impl EvidenceSet {
    /// Build a set; candidates are put in evidence order
    pub fn new(mut candidates: Vec<Candidate>, round: u32, verdict: Verdict) -> Self {
        candidates.sort_by(evidence_order);
        Self {
            candidates,
            round,
            verdict,
        }
    }

    pub fn empty(round: u32, rationale: impl Into<String>) -> Self {
        Self {
            candidates: Vec::new(),
            round,
            verdict: Verdict::insufficient(rationale),
        }
    }

    /// Fused candidates kept in fused order when scoring was unavailable.
    /// Never sufficient.
    pub fn unscored(
        round: u32,
        candidates: &[Candidate],
        top_k: usize,
        rationale: impl Into<String>,
    ) -> Self {
        let kept = candidates
            .iter()
            .take(top_k)
            .map(|c| Candidate {
                rerank_score: None,
                ..c.clone()
            })
            .collect();
        Self::new(kept, round, Verdict::insufficient(rationale))
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn into_candidates(self) -> Vec<Candidate> {
        self.candidates
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn verdict(&self) -> &Verdict {
        &self.verdict
    }

    pub fn is_sufficient(&self) -> bool {
        self.verdict.sufficient
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn top_score(&self) -> Option<f32> {
        self.candidates.first().map(Candidate::score)
    }
}

/// Decides sufficiency from rerank scores in descending order
pub trait SufficiencyPolicy: Send + Sync {
    fn judge(&self, scores_desc: &[f32]) -> Verdict;
}

/// Sufficient when the best score clears the confidence threshold and enough
/// candidates clear the floor.
#[derive(Debug, Clone)]
pub struct ThresholdPolicy {
    pub confidence_threshold: f32,
    pub floor_threshold: f32,
    pub min_evidence: usize,
}

impl ThresholdPolicy {
    pub fn new(confidence_threshold: f32, floor_threshold: f32, min_evidence: usize) -> Self {
        Self {
            confidence_threshold,
            floor_threshold,
            min_evidence,
        }
    }
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self::new(0.7, 0.5, 1)
    }
}

impl SufficiencyPolicy for ThresholdPolicy {
    fn judge(&self, scores_desc: &[f32]) -> Verdict {
        let Some(&top) = scores_desc.first() else {
            return Verdict::insufficient("no candidates to judge");
        };

        if top <= self.confidence_threshold {
            return Verdict::insufficient(format!(
                "top score {:.3} does not exceed confidence threshold {:.3}",
                top, self.confidence_threshold
            ));
        }

        let above_floor = scores_desc
            .iter()
            .filter(|s| **s >= self.floor_threshold)
            .count();
        if above_floor < self.min_evidence {
            return Verdict::insufficient(format!(
                "only {} candidate(s) at or above floor {:.3}, need {}",
                above_floor, self.floor_threshold, self.min_evidence
            ));
        }

        Verdict::sufficient(format!(
            "top score {:.3} exceeds {:.3} with {} supporting candidate(s)",
            top, self.confidence_threshold, above_floor
        ))
    }
}
