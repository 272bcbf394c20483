use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    #[error("Relevance model failed: {0}")]
    Model(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Stateless (query, passage) relevance model, conceptually a cross-encoder.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    async fn score(&self, query: &str, text: &str) -> Result<f32, ScoringError>;

    /// Score many passages against one query; one score per passage, same order
    async fn score_batch(&self, query: &str, texts: &[String]) -> Result<Vec<f32>, ScoringError> {
        let mut scores = Vec::with_capacity(texts.len());
        for text in texts {
            scores.push(self.score(query, text).await?);
        }
        Ok(scores)
    }
}
