//! Recovery policy replay tests
//!
//! Decisions depend only on the failure and the attempt log, so replaying a
//! recorded failure sequence must reproduce the recorded decisions exactly.

use warden::agent::{AttemptLog, RecoveryPolicy};
use warden::core::config::RecoveryConfig;
use warden::core::{Failure, FailureKind, RecoveryDecision, RecoveryStrategy};

fn replay(policy: &RecoveryPolicy, failures: &[Failure]) -> Vec<RecoveryDecision> {
    let mut log = AttemptLog::new(0);
    let mut decisions = Vec::new();
    for failure in failures {
        let decision = policy.decide(failure, &log);
        log.record(failure, &decision);
        if decision.strategy == RecoveryStrategy::Escalate {
            log.resolve_escalation();
        }
        decisions.push(decision);
    }
    decisions
}

fn mixed_failures() -> Vec<Failure> {
    vec![
        Failure::new(FailureKind::Transient, "navigation timeout"),
        Failure::new(FailureKind::Transient, "navigation timeout"),
        Failure::new(FailureKind::Structural, "element e4 missing"),
        Failure::new(FailureKind::OracleMalformed, "no JSON in reply"),
        Failure::new(FailureKind::NoValidCandidate, "model returned no candidates"),
        Failure::new(FailureKind::NoValidCandidate, "model returned no candidates"),
        Failure::new(FailureKind::Structural, "element e9 missing"),
        Failure::new(FailureKind::Fatal, "browser has been closed"),
    ]
}

#[test]
fn test_replay_is_deterministic() {
    let policy = RecoveryPolicy::default();
    let failures = mixed_failures();

    let first = replay(&policy, &failures);
    let second = replay(&policy, &failures);
    assert_eq!(first, second);

    // serialized decisions are byte-identical too
    let a = serde_json::to_string(&first).unwrap();
    let b = serde_json::to_string(&second).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_replay_matches_expected_strategies() {
    use RecoveryStrategy::*;
    let decisions = replay(&RecoveryPolicy::default(), &mixed_failures());
    let strategies: Vec<_> = decisions.iter().map(|d| d.strategy).collect();
    assert_eq!(
        strategies,
        vec![
            RetrySame,
            RetrySame,
            RetryAlternate,
            RetryAlternate,
            RetryAlternate,
            Escalate,
            RetryAlternate,
            Abort,
        ]
    );
    assert_eq!(decisions[0].backoff_ms, Some(1_000));
    assert_eq!(decisions[1].backoff_ms, Some(2_000));
    assert_eq!(decisions[1].attempt, 1);
}

#[test]
fn test_custom_ceiling_changes_decisions() {
    let policy = RecoveryPolicy::new(RecoveryConfig {
        alternate_ceiling: 0,
        ..RecoveryConfig::default()
    });
    let structural = Failure::new(FailureKind::Structural, "gone");
    let decisions = replay(&policy, &[structural.clone(), structural]);
    assert_eq!(decisions[0].strategy, RecoveryStrategy::RetryAlternate);
    assert_eq!(decisions[1].strategy, RecoveryStrategy::Escalate);
}
