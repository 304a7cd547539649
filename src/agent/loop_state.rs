//! Task loop state management
//!
//! Tracks the per-task bookkeeping of the control loop: iteration budget,
//! attempts for the current step, refused or failed proposals, and the
//! records collected for the final report.

use std::collections::HashSet;

use crate::agent::recovery::AttemptLog;
use crate::core::{Action, ActionSignature, ConfirmationRecord, RecoveryDecision};

/// An action queued for re-execution after a transient failure
#[derive(Debug, Clone)]
pub struct PendingRetry {
    pub action: Action,
    /// Candidates the oracle proposed alongside it
    pub candidates: Vec<Action>,
    /// Approval already obtained for this exact instance
    pub confirmation: Option<ConfirmationRecord>,
}

/// State of one task's control loop
#[derive(Debug, Clone)]
pub struct LoopState {
    /// Iterations started so far
    pub iteration: usize,
    /// Maximum allowed iterations
    pub max_iterations: usize,
    /// Attempts for the step in progress
    pub attempts: AttemptLog,
    /// Proposals refused or structurally failed during this step
    pub excluded: HashSet<ActionSignature>,
    /// Denied confirmations during this step
    pub denials: u32,
    pub pending_retry: Option<PendingRetry>,
    /// Told to the model on the next proposal
    pub last_failure: Option<String>,
    pub confirmations: Vec<ConfirmationRecord>,
    pub decisions: Vec<RecoveryDecision>,
}

impl LoopState {
    /// Create a new loop state with the given iteration budget
    pub fn new(max_iterations: usize) -> Self {
        Self {
            iteration: 0,
            max_iterations,
            attempts: AttemptLog::new(0),
            excluded: HashSet::new(),
            denials: 0,
            pending_retry: None,
            last_failure: None,
            confirmations: Vec::new(),
            decisions: Vec::new(),
        }
    }

    /// Check if the iteration budget allows another pass
    pub fn should_continue(&self) -> bool {
        self.iteration < self.max_iterations
    }

    /// Increment the iteration counter
    pub fn next_iteration(&mut self) {
        self.iteration += 1;
    }

    pub fn is_excluded(&self, action: &Action) -> bool {
        self.excluded.contains(&action.signature())
    }

    pub fn exclude(&mut self, action: &Action) {
        self.excluded.insert(action.signature());
    }

    /// A step was appended; start fresh for the next one
    pub fn step_succeeded(&mut self, next_seq: usize) {
        self.attempts.reset_for_step(next_seq);
        self.clear_step();
    }

    /// The user resolved an escalation
    pub fn resume_after_escalation(&mut self) {
        self.attempts.resolve_escalation();
        self.clear_step();
    }

    fn clear_step(&mut self) {
        self.excluded.clear();
        self.denials = 0;
        self.pending_retry = None;
        self.last_failure = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Failure, FailureKind, RecoveryStrategy};

    #[test]
    fn test_loop_state_new() {
        let state = LoopState::new(10);
        assert_eq!(state.iteration, 0);
        assert_eq!(state.max_iterations, 10);
        assert!(state.excluded.is_empty());
        assert!(state.pending_retry.is_none());
    }

    #[test]
    fn test_should_continue() {
        let mut state = LoopState::new(2);
        assert!(state.should_continue());

        state.next_iteration();
        assert!(state.should_continue());

        state.next_iteration();
        assert!(!state.should_continue()); // Reached max iterations
    }

    #[test]
    fn test_step_success_clears_step_state() {
        let mut state = LoopState::new(10);
        let action = Action::click("e1");
        state.exclude(&action);
        state.denials = 2;
        state.last_failure = Some("denied".to_string());
        state.attempts.empty_candidates = 1;

        let failure = Failure::new(FailureKind::Structural, "gone");
        let decision = crate::agent::recovery::RecoveryPolicy::default()
            .decide(&failure, &state.attempts);
        assert_eq!(decision.strategy, RecoveryStrategy::RetryAlternate);
        state.attempts.record(&failure, &decision);

        state.step_succeeded(1);
        assert!(!state.is_excluded(&action));
        assert_eq!(state.denials, 0);
        assert_eq!(state.attempts.alternates, 0);
        assert_eq!(state.attempts.step_seq, 1);
        // survives the reset
        assert_eq!(state.attempts.empty_candidates, 1);

        state.resume_after_escalation();
        assert_eq!(state.attempts.empty_candidates, 0);
    }
}
