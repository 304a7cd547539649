//! Custom error types for Warden
//!
//! Provides a unified error handling system across all modules. The
//! execution-related variants mirror the failure taxonomy the task loop
//! branches on: transient, structural, oracle, budget and fatal errors.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Warden operations
#[derive(Error, Debug)]
pub enum WardenError {
    /// Retryable execution failure (element not yet rendered, navigation timeout)
    #[error("Transient execution error: {0}")]
    TransientExecution(String),

    /// Execution failure that needs a different action (element gone, stale ref)
    #[error("Structural execution error: {0}")]
    StructuralExecution(String),

    /// Model unavailable or produced unusable output
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// Step or wall-clock budget exhausted
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(BudgetKind),

    /// Non-recoverable failure (browser crashed, session invalidated)
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// Model provider errors (transport, unexpected status)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Model not available
    #[error("Model '{0}' not available in Ollama. Run: ollama pull {0}")]
    ModelNotFound(String),

    /// Illegal task status change
    #[error("Invalid task transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Generic error for other cases
    #[error("{0}")]
    Other(String),
}

/// Convenience Result type for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

impl WardenError {
    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a fatal error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }
}

/// Failure modes of the model oracle.
///
/// Rate limiting is kept apart from malformed output so that the recovery
/// policy can back off on the former and re-prompt on the latter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("rate limited by model provider: {0}")]
    RateLimited(String),

    #[error("model request timed out")]
    Timeout,

    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("malformed model output: {0}")]
    Malformed(String),
}

/// Which budget a task exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetKind {
    /// Hard limit on loop iterations
    Steps,
    /// Hard limit on total task duration
    WallClock,
}

impl fmt::Display for BudgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetKind::Steps => write!(f, "step budget"),
            BudgetKind::WallClock => write!(f, "maximum task duration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_error_conversion() {
        let err: WardenError = OracleError::Malformed("no JSON".into()).into();
        assert!(matches!(err, WardenError::Oracle(OracleError::Malformed(_))));
        assert_eq!(err.to_string(), "Oracle error: malformed model output: no JSON");
    }

    #[test]
    fn test_budget_display() {
        let err = WardenError::BudgetExceeded(BudgetKind::Steps);
        assert_eq!(err.to_string(), "Budget exceeded: step budget");
    }
}
