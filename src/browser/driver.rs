//! Browser driver contract
//!
//! The task loop only sees this trait; the live browser sits behind it.

use async_trait::async_trait;
use thiserror::Error;

use crate::browser::snapshot::PageSnapshot;
use crate::core::{Action, Failure, FailureKind, Outcome, WardenError};

/// Errors reported by a browser driver.
///
/// Structural errors (the element is gone) must be kept apart from
/// transient ones (the page is slow) so recovery can branch correctly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("transient browser failure: {0}")]
    Transient(String),

    #[error("structural browser failure: {0}")]
    Structural(String),

    #[error("authentication required: {0}")]
    AuthRequired(String),

    #[error("fatal browser failure: {0}")]
    Fatal(String),
}

impl From<DriverError> for Failure {
    fn from(err: DriverError) -> Self {
        let kind = match &err {
            DriverError::Transient(_) => FailureKind::Transient,
            DriverError::Structural(_) => FailureKind::Structural,
            DriverError::AuthRequired(_) => FailureKind::AuthRequired,
            DriverError::Fatal(_) => FailureKind::Fatal,
        };
        Failure::new(kind, err.to_string())
    }
}

impl From<DriverError> for WardenError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Transient(msg) => WardenError::TransientExecution(msg),
            DriverError::Structural(msg) => WardenError::StructuralExecution(msg),
            DriverError::AuthRequired(msg) | DriverError::Fatal(msg) => WardenError::Fatal(msg),
        }
    }
}

/// Live browser session owned by one task
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Capture the current page state
    async fn capture_snapshot(&self) -> Result<PageSnapshot, DriverError>;

    /// Perform one action against the live page
    async fn execute(&self, action: &Action) -> Result<Outcome, DriverError>;

    /// Release the session; errors are ignored by callers
    async fn close(&self) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Classify a driver's error text into a [`DriverError`]
pub fn classify_driver_message(message: &str) -> DriverError {
    let lower = message.to_lowercase();

    let fatal = [
        "browser has been closed",
        "target closed",
        "crashed",
        "session not found",
        "invalid session",
        "connection refused",
    ];
    let auth = [
        "login required",
        "sign in to continue",
        "authentication required",
        "status 401",
        "http 401",
        "401 unauthorized",
    ];
    let structural = [
        "not found",
        "no element",
        "unknown ref",
        "stale",
        "detached",
        "not attached",
        "no node",
    ];
    let transient = ["timeout", "timed out", "not visible", "not interactable", "navigation"];

    // Refs like @e401 must not read as status codes
    let names_ref = lower.contains("@e");

    if fatal.iter().any(|p| lower.contains(p)) {
        DriverError::Fatal(message.trim().to_string())
    } else if names_ref && structural.iter().any(|p| lower.contains(p)) {
        DriverError::Structural(message.trim().to_string())
    } else if auth.iter().any(|p| lower.contains(p)) {
        DriverError::AuthRequired(message.trim().to_string())
    } else if structural.iter().any(|p| lower.contains(p)) {
        DriverError::Structural(message.trim().to_string())
    } else if transient.iter().any(|p| lower.contains(p)) {
        DriverError::Transient(message.trim().to_string())
    } else {
        // Unknown driver complaints are retried rather than aborting the task
        DriverError::Transient(message.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_driver_message() {
        assert!(matches!(
            classify_driver_message("Element @e4 not found"),
            DriverError::Structural(_)
        ));
        assert!(matches!(
            classify_driver_message("Timeout 30000ms exceeded"),
            DriverError::Transient(_)
        ));
        assert!(matches!(
            classify_driver_message("Target closed"),
            DriverError::Fatal(_)
        ));
        assert!(matches!(
            classify_driver_message("Authentication required"),
            DriverError::AuthRequired(_)
        ));
    }

    #[test]
    fn test_high_numbered_ref_is_structural() {
        assert_eq!(
            classify_driver_message("Element @e401 not found"),
            DriverError::Structural("Element @e401 not found".into())
        );
        assert!(matches!(
            classify_driver_message("Request failed with HTTP 401"),
            DriverError::AuthRequired(_)
        ));
    }

    #[test]
    fn test_failure_conversion() {
        let failure = Failure::from(DriverError::Structural("gone".into()));
        assert_eq!(failure.kind, FailureKind::Structural);
        assert!(failure.message.contains("gone"));
    }
}
