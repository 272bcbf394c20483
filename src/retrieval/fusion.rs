//! Reciprocal Rank Fusion algorithm for combining search results

use crate::backend::IndexHit;
use crate::retrieval::candidate::{rank_order, Origin, RankedHit};
use ahash::{HashMap, HashMapExt};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Invalid weight configuration: weights must be positive")]
    InvalidWeights,

    #[error("Invalid RRF constant: {0}")]
    InvalidConstant(f32),
}

/// Configuration for fusion algorithm
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// RRF K constant (typically 60)
    pub rrf_k: f32,

    /// Weight for semantic results
    pub semantic_weight: f32,

    /// Weight for keyword results
    pub keyword_weight: f32,
}

impl FusionConfig {
    pub fn new(rrf_k: f32, semantic_weight: f32, keyword_weight: f32) -> Result<Self, FusionError> {
        if semantic_weight <= 0.0 || keyword_weight <= 0.0 {
            return Err(FusionError::InvalidWeights);
        }
        if !rrf_k.is_finite() || rrf_k < 0.0 {
            return Err(FusionError::InvalidConstant(rrf_k));
        }

        Ok(Self {
            rrf_k,
            semantic_weight,
            keyword_weight,
        })
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            semantic_weight: 1.0,
            keyword_weight: 1.0,
        }
    }
}

/// A fused entry before its text is fetched
#[derive(Debug, Clone, PartialEq)]
pub struct FusedEntry {
    pub id: String,
    pub fused_score: f32,
    pub lexical: Option<RankedHit>,
    pub vector: Option<RankedHit>,
}

impl FusedEntry {
    pub fn origin(&self) -> Origin {
        // Every entry comes from at least one list
        Origin::from_presence(self.lexical.is_some(), self.vector.is_some())
            .unwrap_or(Origin::Lexical)
    }
}

/// Apply Reciprocal Rank Fusion to combine two ranked lists
///
/// RRF formula: score(id) = sum over all rankings of: weight / (k + rank),
/// with 1-based ranks. A repeated id within one list only counts at its best
/// rank.
///
/// # Returns
/// Fused entries sorted by score descending; ties go to the better lexical
/// rank, then the better vector rank, then the smaller id.
pub fn reciprocal_rank_fusion(
    keyword_results: &[IndexHit],
    semantic_results: &[IndexHit],
    config: &FusionConfig,
) -> Vec<FusedEntry> {
    let mut entries: Vec<FusedEntry> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for (idx, hit) in keyword_results.iter().enumerate() {
        if positions.contains_key(hit.id.as_str()) {
            continue;
        }
        let rank = idx + 1;
        positions.insert(hit.id.as_str(), entries.len());
        entries.push(FusedEntry {
            id: hit.id.clone(),
            fused_score: config.keyword_weight / (config.rrf_k + rank as f32),
            lexical: Some(RankedHit {
                rank,
                score: hit.score,
            }),
            vector: None,
        });
    }

    for (idx, hit) in semantic_results.iter().enumerate() {
        let rank = idx + 1;
        let contribution = config.semantic_weight / (config.rrf_k + rank as f32);
        match positions.get(hit.id.as_str()) {
            Some(&pos) => {
                let entry = &mut entries[pos];
                if entry.vector.is_none() {
                    entry.fused_score += contribution;
                    entry.vector = Some(RankedHit {
                        rank,
                        score: hit.score,
                    });
                }
            }
            None => {
                positions.insert(hit.id.as_str(), entries.len());
                entries.push(FusedEntry {
                    id: hit.id.clone(),
                    fused_score: contribution,
                    lexical: None,
                    vector: Some(RankedHit {
                        rank,
                        score: hit.score,
                    }),
                });
            }
        }
    }

    entries.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| rank_order(a.lexical.as_ref(), b.lexical.as_ref()))
            .then_with(|| rank_order(a.vector.as_ref(), b.vector.as_ref()))
            .then_with(|| a.id.cmp(&b.id))
    });

    entries
}
