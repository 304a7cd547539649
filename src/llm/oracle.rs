//! Model oracle
//!
//! Turns an optimized page context into a ranked list of candidate
//! [`Action`]s. The prompt format is an implementation detail of
//! [`LlmOracle`]; the task loop only depends on [`ModelOracle`].

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::{Action, ActionKind, Message, OracleError, WardenError};
use crate::llm::traits::{GenerateOptions, LLMProvider};

/// Source of candidate actions
#[async_trait]
pub trait ModelOracle: Send + Sync {
    /// Propose candidate actions for `context`, best first.
    ///
    /// `budget` caps the tokens the model may spend on its answer.
    async fn propose_actions(
        &self,
        context: &str,
        budget: usize,
    ) -> std::result::Result<Vec<Action>, OracleError>;
}

const SYSTEM_PROMPT: &str = r#"You control a web browser on behalf of a user.
You receive the user's goal, the current page and the recent history.
Reply with JSON only, no prose, in this exact shape:

{"candidates": [
  {"action": "click", "target": "e3", "parameters": {}, "confidence": 0.9,
   "destructive": false, "requires_confirmation": false,
   "description": "why this helps"}
]}

Rules:
- action is one of: navigate, click, type, select, submit, scroll, wait,
  extract, hover, back, refresh, done
- target is an element id from the page (e.g. "e3"); omit it for navigate,
  scroll, wait, back, refresh and done
- parameters: navigate {"url"}, type {"text"}, select {"value"},
  scroll {"direction", "pixels"}, wait {"duration_ms"}
- confidence is a number between 0 and 1
- set destructive to true for anything that deletes, pays or cannot be undone
- list up to 3 candidates, best first
- use "done" when the goal has been achieved
- if the context says an attempt failed or was denied, propose something different"#;

/// Oracle backed by a chat model
pub struct LlmOracle {
    provider: Arc<dyn LLMProvider>,
    model: String,
    temperature: f32,
}

impl LlmOracle {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.1,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl ModelOracle for LlmOracle {
    async fn propose_actions(
        &self,
        context: &str,
        budget: usize,
    ) -> std::result::Result<Vec<Action>, OracleError> {
        let messages = [Message::system(SYSTEM_PROMPT), Message::user(context)];
        let options = GenerateOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(u32::try_from(budget).unwrap_or(u32::MAX)),
            stop: None,
        };

        let response = self
            .provider
            .chat(&self.model, &messages, Some(options))
            .await
            .map_err(oracle_error)?;

        if let Some(usage) = &response.usage {
            debug!(
                model = %response.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "oracle response"
            );
        }

        parse_candidates(&response.content)
    }
}

/// Collapse provider errors into the oracle failure modes
pub fn oracle_error(err: WardenError) -> OracleError {
    match err {
        WardenError::Oracle(e) => e,
        WardenError::Http(e) if e.is_timeout() => OracleError::Timeout,
        WardenError::Json(e) => OracleError::Malformed(e.to_string()),
        other => OracleError::Unavailable(other.to_string()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawReply {
    Wrapped { candidates: Vec<serde_json::Value> },
    List(Vec<serde_json::Value>),
    Single(serde_json::Map<String, serde_json::Value>),
}

#[derive(Debug, Deserialize)]
struct RawCandidate {
    #[serde(alias = "kind", alias = "type")]
    action: ActionKind,
    #[serde(default)]
    target: Option<serde_json::Value>,
    #[serde(default, alias = "params")]
    parameters: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    destructive: bool,
    #[serde(default)]
    requires_confirmation: bool,
    #[serde(default, alias = "reason", alias = "reasoning")]
    description: String,
}

impl RawCandidate {
    fn into_action(self) -> Action {
        let mut action = Action::new(self.action);
        action.target = match self.target {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
                Some(s.trim().trim_start_matches('@').to_string())
            }
            Some(serde_json::Value::Number(n)) => Some(format!("e{}", n)),
            _ => None,
        };
        action.parameters = self.parameters.unwrap_or_default();
        action.confidence = self.confidence.unwrap_or(0.5);
        action.destructive = self.destructive;
        action.requires_confirmation = self.requires_confirmation;
        action.description = self.description;
        action
    }
}

/// Parse a model reply into candidate actions, highest confidence first.
///
/// Tolerates code fences, reasoning blocks and surrounding prose. Entries
/// that do not describe a known action are skipped; a reply with no JSON
/// at all is malformed.
pub fn parse_candidates(reply: &str) -> std::result::Result<Vec<Action>, OracleError> {
    let json = extract_json(reply)
        .ok_or_else(|| OracleError::Malformed(format!("no JSON in reply: {}", preview(reply))))?;

    let raw: RawReply = serde_json::from_str(json)
        .map_err(|e| OracleError::Malformed(format!("{}: {}", e, preview(json))))?;

    let values = match raw {
        RawReply::Wrapped { candidates } => candidates,
        RawReply::List(list) => list,
        RawReply::Single(map) => vec![serde_json::Value::Object(map)],
    };

    let mut actions: Vec<Action> = values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<RawCandidate>(value) {
            Ok(candidate) => Some(candidate.into_action()),
            Err(e) => {
                warn!(error = %e, "skipping unparseable candidate");
                None
            }
        })
        .collect();

    actions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    Ok(actions)
}

/// Locate the JSON payload inside a model reply
fn extract_json(reply: &str) -> Option<&str> {
    let mut text = reply;
    if let Some(end) = text.find("</think>") {
        text = &text[end + "</think>".len()..];
    }

    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
    }

    let start = text.find(|c: char| c == '{' || c == '[')?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| text[start..=end].trim())
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}
