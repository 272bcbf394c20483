use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{RagloopError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every violation
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_rerank(config, &mut errors);
        Self::validate_planner(config, &mut errors);
        Self::validate_timeouts(config, &mut errors);
        Self::validate_generation(config, &mut errors);
        Self::validate_models(config, &mut errors);
        Self::validate_index(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RagloopError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.top_n == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_n",
                "top_n must be at least 1",
            ));
        }

        if retrieval.search_multiplier == 0 {
            errors.push(ValidationError::new(
                "retrieval.search_multiplier",
                "Search multiplier must be at least 1",
            ));
        }

        if !retrieval.rrf_k.is_finite() || retrieval.rrf_k < 0.0 {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                format!("RRF constant must be a non-negative number, got {}", retrieval.rrf_k),
            ));
        }

        if retrieval.semantic_weight <= 0.0 || retrieval.keyword_weight <= 0.0 {
            errors.push(ValidationError::new(
                "retrieval.semantic_weight",
                "Fusion weights must be positive",
            ));
        }
    }

    fn validate_rerank(config: &Config, errors: &mut Vec<ValidationError>) {
        let rerank = &config.rerank;

        if rerank.top_k == 0 {
            errors.push(ValidationError::new("rerank.top_k", "top_k must be at least 1"));
        }

        for (path, value) in [
            ("rerank.confidence_threshold", rerank.confidence_threshold),
            ("rerank.floor_threshold", rerank.floor_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(ValidationError::new(
                    path,
                    format!("Threshold must be between 0.0 and 1.0, got {}", value),
                ));
            }
        }

        if rerank.floor_threshold > rerank.confidence_threshold {
            errors.push(ValidationError::new(
                "rerank.floor_threshold",
                "Floor threshold cannot exceed the confidence threshold",
            ));
        }

        if rerank.min_evidence == 0 || rerank.min_evidence > rerank.top_k {
            errors.push(ValidationError::new(
                "rerank.min_evidence",
                format!(
                    "min_evidence must be between 1 and top_k ({}), got {}",
                    rerank.top_k, rerank.min_evidence
                ),
            ));
        }
    }

    fn validate_planner(config: &Config, errors: &mut Vec<ValidationError>) {
        let planner = &config.planner;

        if planner.max_rounds == 0 {
            errors.push(ValidationError::new(
                "planner.max_rounds",
                "At least one retrieval round is required",
            ));
        }

        if planner.max_evidence < config.rerank.top_k {
            errors.push(ValidationError::new(
                "planner.max_evidence",
                "max_evidence cannot be smaller than rerank.top_k",
            ));
        }

        if planner.max_rewrite_chars == 0 {
            errors.push(ValidationError::new(
                "planner.max_rewrite_chars",
                "Rewrite length limit must be greater than 0",
            ));
        }
    }

    fn validate_timeouts(config: &Config, errors: &mut Vec<ValidationError>) {
        let timeouts = &config.timeouts;
        for (path, value) in [
            ("timeouts.judge_ms", timeouts.judge_ms),
            ("timeouts.rewrite_ms", timeouts.rewrite_ms),
            ("timeouts.retrieval_ms", timeouts.retrieval_ms),
            ("timeouts.rerank_ms", timeouts.rerank_ms),
            ("timeouts.turn_budget_ms", timeouts.turn_budget_ms),
        ] {
            if value == 0 {
                errors.push(ValidationError::new(path, "Timeout must be greater than 0"));
            }
        }
    }

    fn validate_generation(config: &Config, errors: &mut Vec<ValidationError>) {
        let generation = &config.generation;

        let temp = generation.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "generation.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        if generation.event_buffer == 0 {
            errors.push(ValidationError::new(
                "generation.event_buffer",
                "Event buffer must be greater than 0",
            ));
        }

        if generation.max_chunk_chars == 0 {
            errors.push(ValidationError::new(
                "generation.max_chunk_chars",
                "Chunk length limit must be greater than 0",
            ));
        }
    }

    fn validate_models(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.llm.model.is_empty() {
            errors.push(ValidationError::new("llm.model", "Model name cannot be empty"));
        }

        let api_base = &config.llm.api_base;
        if !(api_base.starts_with("http://") || api_base.starts_with("https://")) {
            errors.push(ValidationError::new(
                "llm.api_base",
                format!("API base must be an http(s) URL, got '{}'", api_base),
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.reranker_model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.reranker_model",
                "Reranker model name cannot be empty",
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.index.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "index.data_dir",
                "Index directory cannot be empty",
            ));
        }

        if config.index.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if config.index.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }

        if config.index.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }
    }
}
