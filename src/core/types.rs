//! Shared types used across Warden modules
//!
//! Contains chat messages, browser actions, risk annotations, confirmation
//! records and recovery decisions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message in a model conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (user, assistant, system)
    pub role: String,
    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Kind of browser operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Navigate,
    Click,
    Type,
    Select,
    Submit,
    Scroll,
    Wait,
    Extract,
    Hover,
    Back,
    Refresh,
    /// The model declares the goal reached; executes as a no-op
    Done,
}

impl ActionKind {
    /// Whether this kind must name an element in the current snapshot
    pub fn needs_target(&self) -> bool {
        matches!(
            self,
            ActionKind::Click
                | ActionKind::Type
                | ActionKind::Select
                | ActionKind::Submit
                | ActionKind::Hover
        )
    }

    /// Kinds that never change page or account state
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            ActionKind::Navigate
                | ActionKind::Scroll
                | ActionKind::Wait
                | ActionKind::Extract
                | ActionKind::Hover
                | ActionKind::Back
                | ActionKind::Refresh
                | ActionKind::Done
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Select => "select",
            ActionKind::Submit => "submit",
            ActionKind::Scroll => "scroll",
            ActionKind::Wait => "wait",
            ActionKind::Extract => "extract",
            ActionKind::Hover => "hover",
            ActionKind::Back => "back",
            ActionKind::Refresh => "refresh",
            ActionKind::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// A single browser operation proposed by the model oracle.
///
/// Immutable once produced; risk annotations live in [`RiskAssessment`]
/// next to it rather than on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Instance id, unique per proposal
    pub id: Uuid,
    /// What to do
    pub kind: ActionKind,
    /// Element identifier from the page snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Kind-specific parameters (url, text, value, duration_ms, direction)
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// Model confidence in [0, 1]
    pub confidence: f64,
    /// Model flagged this action as destructive
    #[serde(default)]
    pub destructive: bool,
    /// Model asked for confirmation regardless of classification
    #[serde(default)]
    pub requires_confirmation: bool,
    /// Free-text rationale from the model
    #[serde(default)]
    pub description: String,
}

impl Action {
    /// Create an action with a fresh instance id and full confidence
    pub fn new(kind: ActionKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target: None,
            parameters: serde_json::Map::new(),
            confidence: 1.0,
            destructive: false,
            requires_confirmation: false,
            description: String::new(),
        }
    }

    /// Navigate to a URL
    pub fn navigate(url: impl Into<String>) -> Self {
        Self::new(ActionKind::Navigate).with_param("url", url.into())
    }

    /// Click an element
    pub fn click(target: impl Into<String>) -> Self {
        Self::new(ActionKind::Click).with_target(target)
    }

    /// Type text into an element
    pub fn type_text(target: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(ActionKind::Type)
            .with_target(target)
            .with_param("text", text.into())
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn destructive(mut self) -> Self {
        self.destructive = true;
        self
    }

    /// Get a string parameter by key
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }

    /// Get an unsigned integer parameter by key
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.parameters.get(key).and_then(|v| v.as_u64())
    }

    /// Structural identity ignoring the instance id and confidence
    pub fn signature(&self) -> ActionSignature {
        let params = serde_json::Value::Object(self.parameters.clone()).to_string();
        ActionSignature(format!(
            "{}|{}|{}",
            self.kind,
            self.target.as_deref().unwrap_or("-"),
            params
        ))
    }

    /// One-line human readable summary
    pub fn summary(&self) -> String {
        let mut out = self.kind.to_string();
        if let Some(target) = &self.target {
            out.push_str(&format!(" @{}", target));
        }
        if let Some(url) = self.get_string("url") {
            out.push_str(&format!(" {}", url));
        }
        if let Some(text) = self.get_string("text") {
            out.push_str(&format!(" \"{}\"", text));
        }
        if !self.description.is_empty() {
            out.push_str(&format!(" ({})", self.description));
        }
        out
    }
}

/// Structural identity of an action, used to avoid re-proposing failures
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionSignature(pub String);

/// Result of a successfully executed action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Human-readable result
    pub detail: String,
    /// Page URL after the action, when the driver knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extracted content for extract actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted: Option<String>,
}

impl Outcome {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            url: None,
            extracted: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Risk bucket controlling whether confirmation is mandatory
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskTier::Low => write!(f, "LOW"),
            RiskTier::Medium => write!(f, "MEDIUM"),
            RiskTier::High => write!(f, "HIGH"),
            RiskTier::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl std::str::FromStr for RiskTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(RiskTier::Low),
            "medium" => Ok(RiskTier::Medium),
            "high" => Ok(RiskTier::High),
            "critical" => Ok(RiskTier::Critical),
            other => Err(format!("unknown risk tier '{}'", other)),
        }
    }
}

/// Why an action landed in its tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Financial,
    AccountDeletion,
    CredentialChange,
    Deletion,
    Unsubscribe,
    Modification,
    PersonalData,
    SensitiveDomain,
    FlaggedByModel,
}

/// Risk annotation attached to an action for the duration of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub tier: RiskTier,
    pub categories: Vec<RiskCategory>,
    pub rationale: String,
    pub requires_confirmation: bool,
}

impl RiskAssessment {
    /// Assessment for an action with nothing risky about it
    pub fn low() -> Self {
        Self {
            tier: RiskTier::Low,
            categories: Vec::new(),
            rationale: "read-only or benign interaction".to_string(),
            requires_confirmation: false,
        }
    }
}

/// Answer recorded for one confirmation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationResponse {
    Approved,
    Denied,
    TimedOut,
    /// The task was cancelled while waiting
    Cancelled,
}

impl ConfirmationResponse {
    pub fn is_affirmative(&self) -> bool {
        matches!(self, ConfirmationResponse::Approved)
    }
}

/// Append-only audit entry for one confirmation gate invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRecord {
    /// Per-task sequence number of the request
    pub seq: u64,
    pub task_id: Uuid,
    /// Instance id of the action that was presented
    pub action_id: Uuid,
    pub tier: RiskTier,
    /// Text shown to the approver
    pub prompt: String,
    pub response: ConfirmationResponse,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Classified reason an iteration failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Element not yet rendered, navigation timeout
    Transient,
    /// Target element gone or stale
    Structural,
    OracleRateLimited,
    OracleTimeout,
    OracleUnavailable,
    OracleMalformed,
    /// Empty candidate list or none valid against the snapshot
    NoValidCandidate,
    /// Context could not fit any interactive element
    DegradedContext,
    /// The user must log in manually
    AuthRequired,
    /// Browser crashed or session invalidated
    Fatal,
}

impl FailureKind {
    pub fn is_oracle(&self) -> bool {
        matches!(
            self,
            FailureKind::OracleRateLimited
                | FailureKind::OracleTimeout
                | FailureKind::OracleUnavailable
                | FailureKind::OracleMalformed
        )
    }
}

/// A failure handed to the recovery policy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    /// Action being executed when the failure happened, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<Uuid>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            action_id: None,
        }
    }

    pub fn for_action(mut self, action_id: Uuid) -> Self {
        self.action_id = Some(action_id);
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// What the recovery policy wants the loop to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    RetrySame,
    RetryAlternate,
    Escalate,
    Abort,
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryStrategy::RetrySame => write!(f, "retry-same"),
            RecoveryStrategy::RetryAlternate => write!(f, "retry-alternate"),
            RecoveryStrategy::Escalate => write!(f, "escalate"),
            RecoveryStrategy::Abort => write!(f, "abort"),
        }
    }
}

/// Output of the recovery policy. Contains no timestamps so that identical
/// inputs always produce identical decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryDecision {
    /// Sequence number of the step being attempted
    pub step_seq: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_action: Option<Uuid>,
    pub failure: FailureKind,
    pub strategy: RecoveryStrategy,
    /// Attempts already made for this step when the decision was taken
    pub attempt: u32,
    /// Delay before the retry, for retry-same
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
    /// Human-readable explanation, shown to the user on escalation or abort
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_ignores_instance_identity() {
        let a = Action::click("e3").with_confidence(0.9);
        let b = Action::click("e3").with_confidence(0.4);
        assert_ne!(a.id, b.id);
        assert_eq!(a.signature(), b.signature());
        assert_ne!(a.signature(), Action::click("e4").signature());
    }

    #[test]
    fn test_risk_tier_ordering_and_parse() {
        assert!(RiskTier::Critical > RiskTier::High);
        assert!(RiskTier::Medium > RiskTier::Low);
        assert_eq!("high".parse::<RiskTier>().unwrap(), RiskTier::High);
        assert!("extreme".parse::<RiskTier>().is_err());
    }

    #[test]
    fn test_action_summary() {
        let action = Action::type_text("e5", "hello").with_description("fill search");
        assert_eq!(action.summary(), "type @e5 \"hello\" (fill search)");
    }

    #[test]
    fn test_action_deserializes_with_defaults() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "kind": "click",
            "target": "e1",
            "confidence": 0.7
        });
        let action: Action = serde_json::from_value(json).unwrap();
        assert_eq!(action.kind, ActionKind::Click);
        assert!(!action.destructive);
        assert!(action.parameters.is_empty());
    }
}
