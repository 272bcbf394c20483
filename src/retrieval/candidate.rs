//! Retrieved candidates and their deterministic ordering

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Which sub-search produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Lexical,
    Vector,
    Both,
}

impl Origin {
    pub(crate) fn from_presence(lexical: bool, vector: bool) -> Option<Self> {
        match (lexical, vector) {
            (true, true) => Some(Origin::Both),
            (true, false) => Some(Origin::Lexical),
            (false, true) => Some(Origin::Vector),
            (false, false) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Lexical => "lexical",
            Origin::Vector => "vector",
            Origin::Both => "both",
        }
    }
}

/// Position and raw score of a candidate within one sub-search's ranking
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankedHit {
    /// 1-based rank
    pub rank: usize,
    /// Origin-specific score, not comparable across origins
    pub score: f32,
}

/// A retrieved passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub doc_id: String,
    pub text: String,
    pub origin: Origin,
    pub lexical: Option<RankedHit>,
    pub vector: Option<RankedHit>,
    /// Reciprocal rank fusion score
    pub fused_score: f32,
    /// Cross-encoder score; authoritative once present
    pub rerank_score: Option<f32>,
}

impl Candidate {
    /// Score used for ordering: the rerank score when scored, else the fused score
    pub fn score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.fused_score)
    }

    /// A copy of this candidate carrying a rerank score
    pub fn with_rerank_score(&self, score: f32) -> Self {
        Self {
            rerank_score: Some(score),
            ..self.clone()
        }
    }

    /// Get a short preview of the text (first N characters)
    pub fn preview(&self, max_chars: usize) -> String {
        match self.text.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => format!("{}...", &self.text[..byte_idx]),
            None => self.text.clone(),
        }
    }
}

/// Descending score, then lexical rank, then vector rank (missing ranks last),
/// then document id. Total and stable, so evidence order never depends on
/// hash iteration or input order.
pub fn evidence_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.score()
        .total_cmp(&a.score())
        .then_with(|| rank_order(a.lexical.as_ref(), b.lexical.as_ref()))
        .then_with(|| rank_order(a.vector.as_ref(), b.vector.as_ref()))
        .then_with(|| a.doc_id.cmp(&b.doc_id))
}

pub(crate) fn rank_order(a: Option<&RankedHit>, b: Option<&RankedHit>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.rank.cmp(&b.rank),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
pub(crate) fn candidate(doc_id: &str, fused: f32, rerank: Option<f32>) -> Candidate {
    Candidate {
        doc_id: doc_id.to_string(),
        text: format!("text of {}", doc_id),
        origin: Origin::Lexical,
        lexical: Some(RankedHit { rank: 1, score: 1.0 }),
        vector: None,
        fused_score: fused,
        rerank_score: rerank,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rerank_score_is_authoritative() {
        let a = candidate("a", 0.9, Some(0.1));
        let b = candidate("b", 0.1, Some(0.8));

        let mut items = vec![a, b];
        items.sort_by(evidence_order);
        assert_eq!(items[0].doc_id, "b");
    }

    #[test]
    fn test_ties_use_lexical_then_vector_rank() {
        let mut a = candidate("a", 0.5, None);
        a.lexical = None;
        a.vector = Some(RankedHit { rank: 1, score: 0.9 });

        let mut b = candidate("b", 0.5, None);
        b.lexical = Some(RankedHit { rank: 3, score: 2.0 });

        let mut c = candidate("c", 0.5, None);
        c.lexical = Some(RankedHit { rank: 2, score: 2.5 });

        let mut items = vec![a, b, c];
        items.sort_by(evidence_order);
        let order: Vec<_> = items.iter().map(|c| c.doc_id.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let mut c = candidate("a", 0.1, None);
        c.text = "héllo wörld".to_string();
        assert_eq!(c.preview(4), "héll...");
        assert_eq!(c.preview(50), "héllo wörld");
    }
}
