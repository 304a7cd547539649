//! Confirmation gate
//!
//! Suspends a task until an external approver answers, the confirmation
//! timeout elapses, the task deadline passes or the task is cancelled.
//! Every call yields exactly one [`ConfirmationRecord`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::core::{
    Action, ConfirmationRecord, ConfirmationResponse, RiskAssessment, RiskTier,
};
use crate::safety::audit::{record_or_warn, AuditEntry, AuditSink};

/// What the approver is asked to decide on
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub task_id: Uuid,
    pub action: Action,
    pub assessment: RiskAssessment,
    /// Text shown to the approver
    pub prompt: String,
    /// How long the gate will wait
    pub timeout: Duration,
}

/// An approver's answer to a confirmation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied,
}

/// Raised when the loop cannot make progress without the user
#[derive(Debug, Clone)]
pub struct EscalationRequest {
    pub task_id: Uuid,
    pub goal: String,
    /// Why the loop is stuck
    pub reason: String,
    /// Summaries of what was already attempted for this step
    pub tried: Vec<String>,
}

/// The user's answer to an escalation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationResponse {
    /// Continue, optionally with an instruction passed on to the model
    Resume { guidance: Option<String> },
    /// Give up on the task
    Abort { reason: String },
}

/// External party that approves risky actions and resolves escalations
#[async_trait]
pub trait Approver: Send + Sync {
    /// Approve or deny one action. May block for as long as it likes; the
    /// gate enforces the timeout.
    async fn confirm(&self, request: &ConfirmationRequest) -> ApprovalDecision;

    /// Ask for an instruction after the loop escalated
    async fn escalate(&self, request: &EscalationRequest) -> EscalationResponse;
}

/// Non-interactive approver driven by a fixed policy
#[derive(Debug, Clone, Copy)]
pub struct PolicyApprover {
    /// Highest tier approved without asking; `None` denies everything
    auto_approve_up_to: Option<RiskTier>,
}

impl PolicyApprover {
    /// Approve actions up to and including `tier`
    pub fn auto_approve_up_to(tier: RiskTier) -> Self {
        Self {
            auto_approve_up_to: Some(tier),
        }
    }

    /// Deny every confirmation request
    pub fn deny_all() -> Self {
        Self {
            auto_approve_up_to: None,
        }
    }
}

#[async_trait]
impl Approver for PolicyApprover {
    async fn confirm(&self, request: &ConfirmationRequest) -> ApprovalDecision {
        match self.auto_approve_up_to {
            Some(max) if request.assessment.tier <= max => ApprovalDecision::Approved,
            _ => ApprovalDecision::Denied,
        }
    }

    async fn escalate(&self, request: &EscalationRequest) -> EscalationResponse {
        EscalationResponse::Abort {
            reason: format!("no user available to resolve: {}", request.reason),
        }
    }
}

/// Per-task confirmation gate. Holding it by `&mut` guarantees at most one
/// outstanding request per task.
pub struct ConfirmationGate {
    approver: Arc<dyn Approver>,
    audit: Arc<dyn AuditSink>,
    timeout: Duration,
    next_seq: u64,
}

impl ConfirmationGate {
    pub fn new(approver: Arc<dyn Approver>, audit: Arc<dyn AuditSink>, timeout: Duration) -> Self {
        Self {
            approver,
            audit,
            timeout,
            next_seq: 0,
        }
    }

    /// Build the text shown to the approver
    pub fn prompt_for(action: &Action, assessment: &RiskAssessment) -> String {
        format!(
            "{} risk: {}\nWhy: {}",
            assessment.tier,
            action.summary(),
            assessment.rationale
        )
    }

    /// Ask for approval and wait for the answer.
    ///
    /// The wait ends at the earliest of the approver's answer, the
    /// confirmation timeout, `deadline`, or cancellation of `cancel`.
    /// Timeouts are recorded as [`ConfirmationResponse::TimedOut`] and
    /// cancellation as [`ConfirmationResponse::Cancelled`]; neither is
    /// affirmative.
    pub async fn request(
        &mut self,
        task_id: Uuid,
        action: &Action,
        assessment: &RiskAssessment,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> ConfirmationRecord {
        let seq = self.next_seq;
        self.next_seq += 1;

        let prompt = Self::prompt_for(action, assessment);
        let request = ConfirmationRequest {
            task_id,
            action: action.clone(),
            assessment: assessment.clone(),
            prompt: prompt.clone(),
            timeout: self.timeout,
        };

        let started = Instant::now();
        let wait_until = (started + self.timeout).min(deadline);

        info!(%task_id, seq, tier = %assessment.tier, action = %action.summary(), "awaiting confirmation");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => ConfirmationResponse::Cancelled,
            answer = tokio::time::timeout_at(wait_until, self.approver.confirm(&request)) => {
                match answer {
                    Ok(ApprovalDecision::Approved) => ConfirmationResponse::Approved,
                    Ok(ApprovalDecision::Denied) => ConfirmationResponse::Denied,
                    Err(_) => ConfirmationResponse::TimedOut,
                }
            }
        };

        let latency = started.elapsed();
        info!(%task_id, seq, ?response, latency_ms = latency.as_millis() as u64, "confirmation answered");

        let record = ConfirmationRecord {
            seq,
            task_id,
            action_id: action.id,
            tier: assessment.tier,
            prompt,
            response,
            latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            timestamp: Utc::now(),
        };

        record_or_warn(self.audit.as_ref(), AuditEntry::Confirmation(record.clone())).await;
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RiskCategory;
    use crate::safety::audit::MemoryAuditSink;

    fn critical() -> RiskAssessment {
        RiskAssessment {
            tier: RiskTier::Critical,
            categories: vec![RiskCategory::Financial],
            rationale: "payment".to_string(),
            requires_confirmation: true,
        }
    }

    /// Approver that never answers
    struct Silent;

    #[async_trait]
    impl Approver for Silent {
        async fn confirm(&self, _request: &ConfirmationRequest) -> ApprovalDecision {
            std::future::pending().await
        }

        async fn escalate(&self, _request: &EscalationRequest) -> EscalationResponse {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_policy_approver() {
        let audit = Arc::new(MemoryAuditSink::new());
        let mut gate = ConfirmationGate::new(
            Arc::new(PolicyApprover::auto_approve_up_to(RiskTier::High)),
            audit.clone(),
            Duration::from_secs(5),
        );
        let action = Action::click("e1");
        let far = Instant::now() + Duration::from_secs(60);
        let cancel = CancellationToken::new();

        let record = gate.request(Uuid::new_v4(), &action, &critical(), far, &cancel).await;
        assert_eq!(record.response, ConfirmationResponse::Denied);
        assert_eq!(record.action_id, action.id);

        let mut high = critical();
        high.tier = RiskTier::High;
        let record = gate.request(Uuid::new_v4(), &action, &high, far, &cancel).await;
        assert_eq!(record.response, ConfirmationResponse::Approved);
        assert_eq!(record.seq, 1);
        assert_eq!(audit.confirmations().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_recorded() {
        let audit = Arc::new(MemoryAuditSink::new());
        let mut gate = ConfirmationGate::new(Arc::new(Silent), audit.clone(), Duration::from_secs(300));
        let deadline = Instant::now() + Duration::from_secs(3600);

        let record = gate
            .request(Uuid::new_v4(), &Action::click("e1"), &critical(), deadline, &CancellationToken::new())
            .await;
        assert_eq!(record.response, ConfirmationResponse::TimedOut);
        assert!(record.latency_ms >= 300_000);
        assert_eq!(audit.confirmations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_wait() {
        let mut gate = ConfirmationGate::new(
            Arc::new(Silent),
            Arc::new(MemoryAuditSink::new()),
            Duration::from_secs(300),
        );
        let start = Instant::now();
        let deadline = start + Duration::from_secs(10);
        let record = gate
            .request(Uuid::new_v4(), &Action::click("e1"), &critical(), deadline, &CancellationToken::new())
            .await;
        assert_eq!(record.response, ConfirmationResponse::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_cancellation_while_waiting() {
        let mut gate = ConfirmationGate::new(
            Arc::new(Silent),
            Arc::new(MemoryAuditSink::new()),
            Duration::from_secs(300),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let record = gate
            .request(
                Uuid::new_v4(),
                &Action::click("e1"),
                &critical(),
                Instant::now() + Duration::from_secs(60),
                &cancel,
            )
            .await;
        assert_eq!(record.response, ConfirmationResponse::Cancelled);
        assert!(!record.response.is_affirmative());
    }
}
