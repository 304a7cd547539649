//! Safety module - risk classification, confirmation and audit
//!
//! Nothing with `requires_confirmation` set reaches the browser without an
//! affirmative record from the confirmation gate.

pub mod audit;
pub mod confirmation;
pub mod risk;

pub use audit::{
    record_or_warn, AuditEntry, AuditSink, JsonlAuditSink, MemoryAuditSink, NullAuditSink,
    TaskOutcomeRecord,
};
pub use confirmation::{
    ApprovalDecision, Approver, ConfirmationGate, ConfirmationRequest, EscalationRequest,
    EscalationResponse, PolicyApprover,
};
pub use risk::{RiskClassifier, RiskContext};
