//! Recovery policy
//!
//! Deterministic triage of a failed iteration: retry the same action,
//! ask the model for an alternate, escalate to the user, or abort.

use serde::{Deserialize, Serialize};

use crate::core::config::RecoveryConfig;
use crate::core::{Failure, FailureKind, RecoveryDecision, RecoveryStrategy};

/// What has already been tried for the current step.
///
/// Counters reset when a step succeeds, except `empty_candidates`, which is
/// only cleared when the user resolves an escalation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptLog {
    /// Sequence number of the step being attempted
    pub step_seq: usize,
    /// Retry-same attempts after transient failures
    pub same_attempts: u32,
    /// Alternates requested after structural failures
    pub alternates: u32,
    /// Oracle failures for this step
    pub oracle_failures: u32,
    /// Empty or entirely invalid candidate lists seen since the last escalation
    pub empty_candidates: u32,
    /// Short descriptions of failed attempts, for the escalation message
    pub tried: Vec<String>,
}

impl AttemptLog {
    pub fn new(step_seq: usize) -> Self {
        Self {
            step_seq,
            ..Self::default()
        }
    }

    /// Attempts already made for this step
    pub fn total(&self) -> u32 {
        self.same_attempts + self.alternates + self.oracle_failures
    }

    /// Start a new step after a success
    pub fn reset_for_step(&mut self, step_seq: usize) {
        let empty_candidates = self.empty_candidates;
        *self = Self {
            step_seq,
            empty_candidates,
            ..Self::default()
        };
    }

    /// The user answered an escalation; start over with a clean slate
    pub fn resolve_escalation(&mut self) {
        *self = Self::new(self.step_seq);
    }

    /// Fold a decision back into the log
    pub fn record(&mut self, failure: &Failure, decision: &RecoveryDecision) {
        self.tried.push(failure.to_string());
        match (decision.strategy, failure.kind) {
            (RecoveryStrategy::RetrySame, FailureKind::Transient) => self.same_attempts += 1,
            (RecoveryStrategy::RetryAlternate, FailureKind::Structural) => self.alternates += 1,
            (RecoveryStrategy::RetryAlternate, FailureKind::NoValidCandidate) => {
                self.empty_candidates += 1
            }
            (RecoveryStrategy::RetrySame | RecoveryStrategy::RetryAlternate, kind)
                if kind.is_oracle() =>
            {
                self.oracle_failures += 1
            }
            _ => {}
        }
    }
}

/// Failure triage, configured once per installation
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryPolicy {
    config: RecoveryConfig,
}

impl RecoveryPolicy {
    pub fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Exponential backoff before retry number `attempt` (0-based)
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.config.base_delay_ms as f64 * self.config.backoff_multiplier.powi(exponent);
        if delay.is_finite() {
            delay.min(self.config.max_delay_ms as f64) as u64
        } else {
            self.config.max_delay_ms
        }
    }

    /// Decide what to do about `failure`. Pure: identical inputs give
    /// identical decisions.
    pub fn decide(&self, failure: &Failure, log: &AttemptLog) -> RecoveryDecision {
        let cfg = &self.config;
        let (strategy, backoff_ms, reason) = match failure.kind {
            FailureKind::Fatal => (
                RecoveryStrategy::Abort,
                None,
                format!("fatal failure: {}", failure.message),
            ),
            FailureKind::AuthRequired => (
                RecoveryStrategy::Abort,
                None,
                format!("authentication must be completed manually: {}", failure.message),
            ),
            FailureKind::DegradedContext => (
                RecoveryStrategy::Escalate,
                None,
                format!("page cannot be described within the token budget: {}", failure.message),
            ),
            FailureKind::NoValidCandidate => {
                if log.empty_candidates == 0 {
                    (
                        RecoveryStrategy::RetryAlternate,
                        None,
                        "model proposed no usable action; asking again".to_string(),
                    )
                } else {
                    (
                        RecoveryStrategy::Escalate,
                        None,
                        format!(
                            "model repeatedly proposed no usable action ({})",
                            failure.message
                        ),
                    )
                }
            }
            FailureKind::Structural => {
                if log.alternates <= cfg.alternate_ceiling {
                    (
                        RecoveryStrategy::RetryAlternate,
                        None,
                        format!("target unavailable, requesting alternate: {}", failure.message),
                    )
                } else {
                    (
                        RecoveryStrategy::Escalate,
                        None,
                        format!(
                            "{} alternates failed (ceiling {}): {}",
                            log.alternates, cfg.alternate_ceiling, failure.message
                        ),
                    )
                }
            }
            FailureKind::Transient => {
                if log.same_attempts < cfg.max_attempts {
                    (
                        RecoveryStrategy::RetrySame,
                        Some(self.backoff_ms(log.same_attempts)),
                        format!(
                            "transient failure, retry {} of {}: {}",
                            log.same_attempts + 1,
                            cfg.max_attempts,
                            failure.message
                        ),
                    )
                } else {
                    (
                        RecoveryStrategy::Escalate,
                        None,
                        format!(
                            "still failing after {} retries: {}",
                            log.same_attempts, failure.message
                        ),
                    )
                }
            }
            kind if kind.is_oracle() => {
                if log.oracle_failures >= cfg.oracle_retry_limit {
                    (
                        RecoveryStrategy::Escalate,
                        None,
                        format!(
                            "model unavailable after {} attempts: {}",
                            log.oracle_failures, failure.message
                        ),
                    )
                } else if kind == FailureKind::OracleMalformed {
                    (
                        RecoveryStrategy::RetryAlternate,
                        None,
                        format!("unusable model output, asking again: {}", failure.message),
                    )
                } else {
                    (
                        RecoveryStrategy::RetrySame,
                        Some(self.backoff_ms(log.oracle_failures)),
                        format!("model call failed, backing off: {}", failure.message),
                    )
                }
            }
            _ => (
                RecoveryStrategy::Escalate,
                None,
                format!("unhandled failure: {}", failure.message),
            ),
        };

        RecoveryDecision {
            step_seq: log.step_seq,
            failed_action: failure.action_id,
            failure: failure.kind,
            strategy,
            attempt: log.total(),
            backoff_ms,
            reason,
        }
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail(kind: FailureKind) -> Failure {
        Failure::new(kind, "boom")
    }

    /// Feed the same failure repeatedly and collect the strategies
    fn run(policy: &RecoveryPolicy, kind: FailureKind, times: usize) -> Vec<RecoveryStrategy> {
        let mut log = AttemptLog::new(0);
        (0..times)
            .map(|_| {
                let failure = fail(kind);
                let decision = policy.decide(&failure, &log);
                log.record(&failure, &decision);
                decision.strategy
            })
            .collect()
    }

    #[test]
    fn test_structural_uses_alternates_then_escalates() {
        use RecoveryStrategy::*;
        let strategies = run(&RecoveryPolicy::default(), FailureKind::Structural, 4);
        assert_eq!(strategies, vec![RetryAlternate, RetryAlternate, RetryAlternate, Escalate]);
    }

    #[test]
    fn test_transient_backs_off_then_escalates() {
        use RecoveryStrategy::*;
        let policy = RecoveryPolicy::default();
        let strategies = run(&policy, FailureKind::Transient, 4);
        assert_eq!(strategies, vec![RetrySame, RetrySame, RetrySame, Escalate]);
        assert_eq!(policy.backoff_ms(0), 1_000);
        assert_eq!(policy.backoff_ms(2), 4_000);
        assert_eq!(policy.backoff_ms(10), 30_000);
    }

    #[test]
    fn test_fatal_aborts_immediately() {
        let policy = RecoveryPolicy::default();
        let decision = policy.decide(&fail(FailureKind::Fatal), &AttemptLog::new(3));
        assert_eq!(decision.strategy, RecoveryStrategy::Abort);
        assert_eq!(decision.step_seq, 3);
        let decision = policy.decide(&fail(FailureKind::AuthRequired), &AttemptLog::new(0));
        assert_eq!(decision.strategy, RecoveryStrategy::Abort);
    }

    #[test]
    fn test_second_empty_list_escalates_after_step_reset() {
        let policy = RecoveryPolicy::default();
        let mut log = AttemptLog::new(0);

        let failure = fail(FailureKind::NoValidCandidate);
        let first = policy.decide(&failure, &log);
        assert_eq!(first.strategy, RecoveryStrategy::RetryAlternate);
        log.record(&failure, &first);

        log.reset_for_step(1);
        let second = policy.decide(&failure, &log);
        assert_eq!(second.strategy, RecoveryStrategy::Escalate);

        log.resolve_escalation();
        assert_eq!(
            policy.decide(&failure, &log).strategy,
            RecoveryStrategy::RetryAlternate
        );
    }

    #[test]
    fn test_oracle_errors() {
        use RecoveryStrategy::*;
        let policy = RecoveryPolicy::default();
        assert_eq!(
            run(&policy, FailureKind::OracleRateLimited, 4),
            vec![RetrySame, RetrySame, RetrySame, Escalate]
        );
        assert_eq!(
            run(&policy, FailureKind::OracleMalformed, 4),
            vec![RetryAlternate, RetryAlternate, RetryAlternate, Escalate]
        );
    }

    #[test]
    fn test_degraded_context_escalates() {
        let decision = RecoveryPolicy::default()
            .decide(&fail(FailureKind::DegradedContext), &AttemptLog::new(0));
        assert_eq!(decision.strategy, RecoveryStrategy::Escalate);
    }
}
