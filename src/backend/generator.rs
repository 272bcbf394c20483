use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("API key not found. Set {env_var} environment variable")]
    MissingApiKey { env_var: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Stream interrupted: {0}")]
    Stream(String),
}

/// Lazy, cancellable token sequence. Dropping it stops the upstream request.
pub type TokenStream = BoxStream<'static, Result<String, GenerationError>>;

/// What a completion is for; lets backends route or log sub-calls separately
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    NecessityJudgment,
    QueryRewrite,
    #[default]
    Answer,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompletionRequest {
    pub purpose: Purpose,
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(purpose: Purpose, prompt: impl Into<String>) -> Self {
        Self {
            purpose,
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Text generator with a streaming token interface.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<TokenStream, GenerationError>;

    /// Run a completion to the end and return the concatenated text
    async fn complete_text(&self, request: CompletionRequest) -> Result<String, GenerationError> {
        let mut tokens = self.complete(request).await?;
        let mut text = String::new();
        while let Some(token) = tokens.next().await {
            text.push_str(&token?);
        }
        Ok(text)
    }
}
