//! Cross-encoder relevance scoring using FastEmbed

use crate::backend::{RelevanceScorer, ScoringError};
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::sync::Arc;

/// Cross-encoder scorer for (query, passage) relevance
///
/// Raw reranker logits are squashed through a sigmoid so scores land in
/// `0.0..=1.0` and are comparable with the sufficiency thresholds.
pub struct CrossEncoderScorer {
    model: Arc<TextRerank>,
    model_name: String,
}

impl CrossEncoderScorer {
    /// Create a new scorer with the specified model
    ///
    /// # Arguments
    /// * `model_name` - "bge-reranker-base" or "bge-reranker-v2-m3"
    pub fn new(model_name: &str) -> Result<Self, ScoringError> {
        let reranker_model = match model_name {
            "bge-reranker-base" | "BAAI/bge-reranker-base" => RerankerModel::BGERerankerBase,
            "bge-reranker-v2-m3" | "BAAI/bge-reranker-v2-m3" => RerankerModel::BGERerankerV2M3,
            _ => {
                return Err(ScoringError::Model(format!(
                    "Unsupported reranker model: {}. Supported: bge-reranker-base, bge-reranker-v2-m3",
                    model_name
                )));
            }
        };

        tracing::info!("Initializing reranker model: {}", model_name);

        let init_options = RerankInitOptions::new(reranker_model).with_show_download_progress(true);
        let model =
            TextRerank::try_new(init_options).map_err(|e| ScoringError::Model(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Put reranker output back into input order
///
/// The model returns results sorted by score, each tagged with the index of
/// the document it scored.
fn align_scores(
    results: impl IntoIterator<Item = (usize, f32)>,
    expected: usize,
) -> Result<Vec<f32>, ScoringError> {
    let mut scores: Vec<Option<f32>> = vec![None; expected];
    for (index, score) in results {
        let slot = scores.get_mut(index).ok_or_else(|| {
            ScoringError::Model(format!("Reranker returned out-of-range index {}", index))
        })?;
        *slot = Some(sigmoid(score));
    }

    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| ScoringError::Model(format!("No score for passage {}", i))))
        .collect()
}

#[async_trait]
impl RelevanceScorer for CrossEncoderScorer {
    async fn score(&self, query: &str, text: &str) -> Result<f32, ScoringError> {
        let scores = self.score_batch(query, &[text.to_string()]).await?;
        scores
            .into_iter()
            .next()
            .ok_or_else(|| ScoringError::Model("No score returned".to_string()))
    }

    async fn score_batch(&self, query: &str, texts: &[String]) -> Result<Vec<f32>, ScoringError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if query.trim().is_empty() {
            return Err(ScoringError::InvalidInput(
                "Query cannot be empty".to_string(),
            ));
        }

        let model = Arc::clone(&self.model);
        let query = query.to_string();
        let documents = texts.to_vec();
        let expected = documents.len();

        let results = tokio::task::spawn_blocking(move || {
            let documents: Vec<&str> = documents.iter().map(String::as_str).collect();
            model.rerank(query.as_str(), documents, false, None)
        })
        .await
        .map_err(|e| ScoringError::Model(e.to_string()))?
        .map_err(|e| ScoringError::Model(e.to_string()))?;

        align_scores(results.into_iter().map(|r| (r.index, r.score)), expected)
    }
}
