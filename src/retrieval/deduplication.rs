//! Cross-round evidence merging

use crate::retrieval::candidate::Candidate;
use crate::retrieval::evidence::EvidenceSet;
use ahash::{HashSet, HashSetExt};

/// Merge the latest round's evidence into what earlier rounds found.
///
/// Documents seen again keep only their latest-round entry. The result is in
/// evidence order, capped at `limit`, and carries the latest round number and
/// verdict. Neither input is modified.
pub fn merge_evidence(
    previous: Option<&EvidenceSet>,
    latest: &EvidenceSet,
    limit: usize,
) -> EvidenceSet {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut merged: Vec<Candidate> = Vec::with_capacity(
        latest.len() + previous.map(EvidenceSet::len).unwrap_or(0),
    );

    for candidate in latest.candidates() {
        if seen.insert(candidate.doc_id.as_str()) {
            merged.push(candidate.clone());
        }
    }

    if let Some(previous) = previous {
        for candidate in previous.candidates() {
            if seen.insert(candidate.doc_id.as_str()) {
                merged.push(candidate.clone());
            }
        }
    }

    let mut set = EvidenceSet::new(merged, latest.round(), latest.verdict().clone());
    if set.len() > limit {
        let mut candidates = set.into_candidates();
        candidates.truncate(limit);
        set = EvidenceSet::new(candidates, latest.round(), latest.verdict().clone());
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::candidate::candidate;
    use crate::retrieval::evidence::Verdict;

    fn set(round: u32, items: &[(&str, f32)]) -> EvidenceSet {
        EvidenceSet::new(
            items
                .iter()
                .map(|(id, s)| candidate(id, 0.01, Some(*s)))
                .collect(),
            round,
            Verdict::insufficient(format!("round {}", round)),
        )
    }

    #[test]
    fn test_merge_without_previous() {
        let latest = set(1, &[("a", 0.3)]);
        let merged = merge_evidence(None, &latest, 10);
        assert_eq!(merged, latest);
    }

    #[test]
    fn test_latest_round_wins_on_duplicates() {
        let first = set(1, &[("a", 0.3), ("b", 0.2)]);
        let second = set(2, &[("a", 0.1), ("c", 0.8)]);

        let merged = merge_evidence(Some(&first), &second, 10);
        let order: Vec<_> = merged.candidates().iter().map(|c| c.doc_id.as_str()).collect();

        assert_eq!(order, vec!["c", "b", "a"]);
        assert_eq!(merged.candidates()[2].rerank_score, Some(0.1));
        assert_eq!(merged.round(), 2);
        assert_eq!(merged.verdict().rationale, "round 2");

        // Inputs are untouched
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn test_merge_is_capped() {
        let first = set(1, &[("a", 0.3), ("b", 0.2)]);
        let second = set(2, &[("c", 0.8), ("d", 0.1)]);

        let merged = merge_evidence(Some(&first), &second, 3);
        let order: Vec<_> = merged.candidates().iter().map(|c| c.doc_id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }
}
