//! Configuration management for ragloop
//!
//! Every tunable of the retrieval loop (fusion constant, thresholds, round limit,
//! timeouts) lives here rather than in code. Files are TOML; any section left out
//! falls back to its defaults.

use crate::error::{RagloopError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub retrieval: RetrievalConfig,
    pub rerank: RerankConfig,
    pub planner: PlannerConfig,
    pub timeouts: TimeoutConfig,
    pub generation: GenerationConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: current_timestamp(),
            last_modified: current_timestamp(),
        }
    }
}

/// Hybrid retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates handed to the reranker per round
    pub top_n: usize,
    /// Fan-out of each sub-search relative to `top_n`
    pub search_multiplier: usize,
    /// Reciprocal rank fusion constant
    pub rrf_k: f32,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    /// Keep going with one origin when the other sub-search fails
    pub tolerate_partial_failure: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            search_multiplier: 3,
            rrf_k: 60.0,
            semantic_weight: 1.0,
            keyword_weight: 1.0,
            tolerate_partial_failure: true,
        }
    }
}

/// Reranker gate and sufficiency policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub top_k: usize,
    /// The best candidate must score above this
    pub confidence_threshold: f32,
    /// Candidates at or above this count towards `min_evidence`
    pub floor_threshold: f32,
    pub min_evidence: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            confidence_threshold: 0.7,
            floor_threshold: 0.5,
            min_evidence: 1,
        }
    }
}

/// Retrieval loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub max_rounds: u32,
    /// Cap on the evidence accumulated across rounds
    pub max_evidence: usize,
    pub enable_query_rewrite: bool,
    pub enable_retrieval_judge: bool,
    pub max_rewrite_chars: usize,
    /// Number of prior conversation turns shown to the judge, rewriter and generator
    pub history_window: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            max_evidence: 10,
            enable_query_rewrite: true,
            enable_retrieval_judge: true,
            max_rewrite_chars: 512,
            history_window: 3,
        }
    }
}

/// Per-call and per-turn time limits, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub judge_ms: u64,
    pub rewrite_ms: u64,
    pub retrieval_ms: u64,
    pub rerank_ms: u64,
    /// Wall-clock budget for the whole retrieval loop of one turn
    pub turn_budget_ms: u64,
}

impl TimeoutConfig {
    pub fn judge(&self) -> Duration {
        Duration::from_millis(self.judge_ms)
    }

    pub fn rewrite(&self) -> Duration {
        Duration::from_millis(self.rewrite_ms)
    }

    pub fn retrieval(&self) -> Duration {
        Duration::from_millis(self.retrieval_ms)
    }

    pub fn rerank(&self) -> Duration {
        Duration::from_millis(self.rerank_ms)
    }

    pub fn turn_budget(&self) -> Duration {
        Duration::from_millis(self.turn_budget_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            judge_ms: 10_000,
            rewrite_ms: 10_000,
            retrieval_ms: 5_000,
            rerank_ms: 10_000,
            turn_budget_ms: 60_000,
        }
    }
}

/// Answer generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Evidence chunks are cut to this many characters in the grounding prompt
    pub max_chunk_chars: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Capacity of the per-turn event channel
    pub event_buffer: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 500,
            max_tokens: 2000,
            temperature: 0.1,
            event_buffer: 64,
        }
    }
}

/// LLM endpoint configuration (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_base: String,
    pub model: String,
    pub api_key_env: String,
    pub request_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:11434/v1".to_string(),
            model: "llama3.1:8b".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_ms: 120_000,
        }
    }
}

/// Embedding and cross-encoder model names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub reranker_model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            reranker_model: "bge-reranker-base".to_string(),
        }
    }
}

/// Local index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub data_dir: PathBuf,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.ragloop/index"),
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_query_rewrite: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_retrieval_judge: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RagloopError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| RagloopError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| RagloopError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| RagloopError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(max_rounds) = overrides.max_rounds {
            self.planner.max_rounds = max_rounds;
        }
        if let Some(top_k) = overrides.top_k {
            self.rerank.top_k = top_k;
        }
        if let Some(threshold) = overrides.confidence_threshold {
            self.rerank.confidence_threshold = threshold;
        }
        if let Some(enabled) = overrides.enable_query_rewrite {
            self.planner.enable_query_rewrite = enabled;
        }
        if let Some(enabled) = overrides.enable_retrieval_judge {
            self.planner.enable_retrieval_judge = enabled;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: RAGLOOP_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply `RAGLOOP_*` overrides from an arbitrary key/value source
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix("RAGLOOP_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "PLANNER__MAX_ROUNDS" => {
                self.planner.max_rounds = parse_value(path, value)?;
            }
            "RERANK__TOP_K" => {
                self.rerank.top_k = parse_value(path, value)?;
            }
            "RERANK__CONFIDENCE_THRESHOLD" => {
                self.rerank.confidence_threshold = parse_value(path, value)?;
            }
            "RETRIEVAL__RRF_K" => {
                self.retrieval.rrf_k = parse_value(path, value)?;
            }
            "LLM__MODEL" => {
                self.llm.model = value.to_string();
            }
            "LLM__API_BASE" => {
                self.llm.api_base = value.to_string();
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "INDEX__DATA_DIR" => {
                self.index.data_dir = PathBuf::from(value);
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| RagloopError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("ragloop").join("config.toml"))
    }
}

fn parse_value<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| RagloopError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| RagloopError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| RagloopError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
