//! OpenAI-compatible chat completions client
//!
//! Works against OpenAI itself and local servers that speak the same API
//! (Ollama, vLLM, llama.cpp). Every call streams; sub-calls that need the whole
//! reply collect the stream.

mod sse;

pub use sse::{token_stream, SseDecoder, SseEvent};

use crate::backend::{CompletionRequest, GenerationError, Generator, TokenStream};
use crate::config::{GenerationConfig, LlmConfig};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

/// Streaming generator for OpenAI-compatible endpoints
pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiGenerator {
    /// Create a generator from configuration
    ///
    /// The API key is read from the configured environment variable. It is
    /// only required for remote endpoints; local servers run without one.
    pub fn new(llm: &LlmConfig, generation: &GenerationConfig) -> Result<Self, GenerationError> {
        let api_key = std::env::var(&llm.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());

        if api_key.is_none() && !is_local(&llm.api_base) {
            return Err(GenerationError::MissingApiKey {
                env_var: llm.api_key_env.clone(),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(llm.request_timeout_ms))
            .build()
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: llm.api_base.trim_end_matches('/').to_string(),
            model: llm.model.clone(),
            api_key,
            max_tokens: generation.max_tokens,
            temperature: generation.temperature,
        })
    }

    fn build_request(&self, request: CompletionRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.prompt,
        });

        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: Some(request.max_tokens.unwrap_or(self.max_tokens)),
            temperature: Some(request.temperature.unwrap_or(self.temperature)),
            stream: true,
        }
    }
}

fn is_local(api_base: &str) -> bool {
    let rest = api_base
        .strip_prefix("http://")
        .or_else(|| api_base.strip_prefix("https://"))
        .unwrap_or(api_base);
    if rest.starts_with("[::1]") {
        return true;
    }
    let host = rest.split(['/', ':']).next().unwrap_or_default();
    matches!(host, "localhost" | "127.0.0.1" | "0.0.0.0")
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn complete(&self, request: CompletionRequest) -> Result<TokenStream, GenerationError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let purpose = request.purpose;
        let body = self.build_request(request);

        tracing::debug!(?purpose, model = %self.model, "Requesting completion");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<sse::ErrorResponse>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(token_stream(response.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Purpose;

    fn generator() -> OpenAiGenerator {
        OpenAiGenerator::new(&LlmConfig::default(), &GenerationConfig::default()).unwrap()
    }

    #[test]
    fn test_local_endpoints_need_no_key() {
        assert!(is_local("http://localhost:11434/v1"));
        assert!(is_local("http://127.0.0.1:8000"));
        assert!(!is_local("https://api.openai.com/v1"));
    }

    #[test]
    fn test_remote_endpoint_requires_key() {
        let llm = LlmConfig {
            api_base: "https://api.example.com/v1".to_string(),
            api_key_env: "RAGLOOP_TEST_KEY_THAT_IS_NOT_SET".to_string(),
            ..LlmConfig::default()
        };
        let err = OpenAiGenerator::new(&llm, &GenerationConfig::default()).err();
        assert!(matches!(err, Some(GenerationError::MissingApiKey { .. })));
    }

    #[test]
    fn test_request_shape() {
        let request = CompletionRequest::new(Purpose::QueryRewrite, "rewrite this")
            .with_system("You rewrite queries.")
            .with_max_tokens(64);
        let body = serde_json::to_value(generator().build_request(request)).unwrap();

        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "rewrite this");
    }
}
