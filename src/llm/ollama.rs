//! Ollama client implementation
//!
//! Async HTTP client for the Ollama chat API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::core::{Config, Message, OracleError, Result, WardenError};
use crate::llm::traits::{GenerateOptions, LLMProvider, LLMResponse, TokenUsage};

/// Ollama API client
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

/// Ollama chat request
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    stream: bool,
}

/// Ollama generation options
#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

/// Ollama chat response (non-streaming)
#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    model: String,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// Ollama models list response
#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

/// Model information
#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

impl OllamaClient {
    /// Create a new Ollama client with default configuration
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    /// Create a new Ollama client from configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            client: build_client(Duration::from_secs(config.ollama.timeout_secs)),
            base_url: config.ollama_url(),
        }
    }

    /// Create a client with custom base URL
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: build_client(Duration::from_secs(120)),
            base_url: base_url.into(),
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> WardenError {
        if e.is_timeout() {
            OracleError::Timeout.into()
        } else if e.is_connect() {
            OracleError::Unavailable(format!(
                "Cannot connect to Ollama at {}. Is it running?",
                self.base_url
            ))
            .into()
        } else {
            WardenError::from(e)
        }
    }

    /// An unreadable body is the model's fault, so the oracle re-prompts
    fn parse_chat_response(body: &str) -> Result<LLMResponse> {
        let response: ChatResponse = serde_json::from_str(body).map_err(|e| {
            OracleError::Malformed(format!("Failed to parse Ollama response: {}", e))
        })?;
        Ok(Self::to_llm_response(response))
    }

    fn to_llm_response(response: ChatResponse) -> LLMResponse {
        let usage = match (response.prompt_eval_count, response.eval_count) {
            (Some(prompt), Some(completion)) => Some(TokenUsage::new(prompt, completion)),
            _ => None,
        };

        LLMResponse {
            content: response.message.content,
            usage,
            model: response.model,
        }
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a reqwest client, falling back to the defaults if the builder fails
pub(crate) fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Map a non-success HTTP status onto the error taxonomy
pub(crate) fn status_error(provider: &str, model: &str, status: StatusCode, body: &str) -> WardenError {
    match status.as_u16() {
        429 => OracleError::RateLimited(format!("{} ({})", provider, body.trim())).into(),
        404 if body.contains("not found") => WardenError::ModelNotFound(model.to_string()),
        408 | 504 => OracleError::Timeout.into(),
        500..=599 => OracleError::Unavailable(format!("{} returned {}", provider, status)).into(),
        _ => WardenError::provider(format!("{} API error ({}): {}", provider, status, body)),
    }
}

#[async_trait]
impl LLMProvider for OllamaClient {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: Option<GenerateOptions>,
    ) -> Result<LLMResponse> {
        let request = ChatRequest {
            model,
            messages,
            options: options.map(|opts| OllamaOptions {
                temperature: opts.temperature,
                num_predict: opts.max_tokens,
                stop: opts.stop,
            }),
            stream: false,
        };

        debug!(model, messages = messages.len(), "ollama chat request");

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(status_error("Ollama", model, status, &error_text));
        }

        let response_text = response.text().await.map_err(|e| self.transport_error(e))?;
        debug!(bytes = response_text.len(), "ollama chat response");

        Self::parse_chat_response(&response_text)
    }

    async fn is_model_available(&self, model: &str) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models
            .iter()
            .any(|m| m == model || m.split(':').next() == model.split(':').next()))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(WardenError::provider("Failed to list models"));
        }

        let models_response: ModelsResponse = response.json().await?;
        Ok(models_response.models.into_iter().map(|m| m.name).collect())
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OllamaClient::with_base_url("http://localhost:11434");
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error("Ollama", "m", StatusCode::TOO_MANY_REQUESTS, "slow down"),
            WardenError::Oracle(OracleError::RateLimited(_))
        ));
        assert!(matches!(
            status_error("Ollama", "qwen3:8b", StatusCode::NOT_FOUND, "model not found"),
            WardenError::ModelNotFound(_)
        ));
        assert!(matches!(
            status_error("Ollama", "m", StatusCode::BAD_GATEWAY, ""),
            WardenError::Oracle(OracleError::Unavailable(_))
        ));
        assert!(matches!(
            status_error("Ollama", "m", StatusCode::BAD_REQUEST, "bad"),
            WardenError::Provider(_)
        ));
    }

    #[test]
    fn test_response_conversion() {
        let raw = r#"{"model":"qwen3:8b","message":{"role":"assistant","content":"hi"},
            "prompt_eval_count":10,"eval_count":2}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        let response = OllamaClient::to_llm_response(parsed);
        assert_eq!(response.content, "hi");
        assert_eq!(response.usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn test_unreadable_body_is_malformed() {
        let err = OllamaClient::parse_chat_response("<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, WardenError::Oracle(OracleError::Malformed(_))));
        assert!(matches!(
            crate::llm::oracle::oracle_error(err),
            OracleError::Malformed(_)
        ));
    }
}
