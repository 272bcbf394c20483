use crate::backend::{GenerationError, IndexError, ScoringError};
use crate::embedding::{EmbeddingError, KeywordIndexError, VectorIndexError};
use crate::retrieval::{FusionError, RerankError, RetrievalError};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ragloop
#[derive(Error, Debug)]
pub enum RagloopError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Every violation found by the config validator
    #[error("Configuration validation failed: {}", join_errors(.errors))]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Keyword index error: {0}")]
    KeywordIndex(#[from] KeywordIndexError),

    #[error("Vector index error: {0}")]
    VectorIndex(#[from] VectorIndexError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Scoring error: {0}")]
    Scoring(#[from] ScoringError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Fusion error: {0}")]
    Fusion(#[from] FusionError),

    #[error("Rerank error: {0}")]
    Rerank(#[from] RerankError),

    /// Ad-hoc failures from the binary and join errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One invalid configuration key
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ValidationError::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for ragloop operations
pub type Result<T> = std::result::Result<T, RagloopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_listed() {
        let err = RagloopError::ConfigValidation {
            errors: vec![
                ValidationError::new("rerank.top_k", "top_k must be at least 1"),
                ValidationError::new("planner.max_rounds", "max_rounds must be at least 1"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Configuration validation failed: rerank.top_k: top_k must be at least 1; \
             planner.max_rounds: max_rounds must be at least 1"
        );
    }
}
