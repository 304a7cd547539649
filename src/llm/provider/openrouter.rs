//! OpenRouter Provider
//!
//! OpenAI-compatible chat completions against the OpenRouter API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::core::{Config, Message, OracleError, Result, WardenError};
use crate::llm::ollama::{build_client, status_error};
use crate::llm::traits::{GenerateOptions, LLMProvider, LLMResponse, TokenUsage};

pub struct OpenRouterProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

impl OpenRouterProvider {
    pub fn from_config(config: &Config) -> Self {
        Self {
            client: build_client(Duration::from_secs(config.openrouter.timeout_secs)),
            base_url: config.openrouter.base_url.trim_end_matches('/').to_string(),
            api_key: config.openrouter.api_key.clone(),
        }
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| WardenError::config("OPENROUTER_API_KEY is not set"))
    }

    fn transport_error(e: reqwest::Error) -> WardenError {
        if e.is_timeout() {
            OracleError::Timeout.into()
        } else if e.is_connect() {
            OracleError::Unavailable(format!("Cannot reach OpenRouter: {}", e)).into()
        } else if e.is_decode() {
            OracleError::Malformed(format!("Failed to parse OpenRouter response: {}", e)).into()
        } else {
            WardenError::from(e)
        }
    }
}

#[async_trait]
impl LLMProvider for OpenRouterProvider {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: Option<GenerateOptions>,
    ) -> Result<LLMResponse> {
        let options = options.unwrap_or_default();
        let request = CompletionRequest {
            model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stop: options.stop,
        };

        debug!(model, messages = messages.len(), "openrouter chat request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key()?)
            .json(&request)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(status_error("OpenRouter", model, status, &error_text));
        }

        let completion: CompletionResponse =
            response.json().await.map_err(Self::transport_error)?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OracleError::Malformed("completion had no choices".to_string()))?;

        Ok(LLMResponse {
            content,
            usage: completion
                .usage
                .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
            model: if completion.model.is_empty() {
                model.to_string()
            } else {
                completion.model
            },
        })
    }

    async fn is_model_available(&self, model: &str) -> Result<bool> {
        Ok(self.list_models().await?.iter().any(|m| m == model))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(WardenError::provider("Failed to list OpenRouter models"));
        }

        let list: ModelList = response.json().await?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key() {
        let mut config = Config::default();
        config.openrouter.api_key = None;
        let provider = OpenRouterProvider::from_config(&config);
        assert!(matches!(provider.api_key(), Err(WardenError::Config(_))));
    }

    #[test]
    fn test_parse_completion() {
        let raw = r#"{"model":"openai/gpt-4o","choices":[{"message":{"role":"assistant","content":"ok"}}],
            "usage":{"prompt_tokens":5,"completion_tokens":1,"total_tokens":6}}"#;
        let parsed: CompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("ok"));
        assert_eq!(parsed.usage.unwrap().completion_tokens, 1);
    }
}
