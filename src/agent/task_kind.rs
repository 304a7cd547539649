//! Task-type strategies
//!
//! Chosen once when a task is created. Supplies the goal text and decides,
//! after every successful step, whether the goal is satisfied.

use crate::agent::task::Step;
use crate::core::ActionKind;

/// Task-type collaborator
pub trait TaskKind: Send + Sync {
    /// Goal text handed to the model
    fn goal(&self) -> &str;

    /// Called after each successful step with the full history
    fn is_goal_satisfied(&self, steps: &[Step]) -> bool;
}

/// Free-form goal; done when the model declares it done
#[derive(Debug, Clone)]
pub struct GenericTask {
    goal: String,
}

impl GenericTask {
    pub fn new(goal: impl Into<String>) -> Self {
        Self { goal: goal.into() }
    }
}

impl TaskKind for GenericTask {
    fn goal(&self) -> &str {
        &self.goal
    }

    fn is_goal_satisfied(&self, steps: &[Step]) -> bool {
        steps
            .last()
            .is_some_and(|step| step.action.kind == ActionKind::Done)
    }
}

/// Reach a page on a given host
#[derive(Debug, Clone)]
pub struct NavigationTask {
    goal: String,
    host: String,
}

impl NavigationTask {
    /// `target` may be a full URL or a bare host
    pub fn new(goal: impl Into<String>, target: &str) -> Self {
        Self {
            goal: goal.into(),
            host: host_of(target).unwrap_or_else(|| target.trim().to_lowercase()),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

fn host_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url)
        .or_else(|_| url::Url::parse(&format!("https://{}", url.trim())))
        .ok()?;
    parsed.host_str().map(|h| h.trim_start_matches("www.").to_lowercase())
}

impl TaskKind for NavigationTask {
    fn goal(&self) -> &str {
        &self.goal
    }

    fn is_goal_satisfied(&self, steps: &[Step]) -> bool {
        let Some(step) = steps.last() else {
            return false;
        };
        if step.action.kind == ActionKind::Done {
            return true;
        }
        let landed = step
            .outcome
            .url
            .as_deref()
            .or_else(|| step.action.get_string("url"));
        step.action.kind == ActionKind::Navigate
            && landed.and_then(host_of).is_some_and(|h| h == self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::task::SnapshotRef;
    use crate::browser::PageSnapshot;
    use crate::core::{Action, Outcome, RiskAssessment};

    fn step(action: Action, outcome: Outcome) -> Step {
        Step {
            seq: 0,
            snapshot: SnapshotRef::from(&PageSnapshot::new("about:blank", "")),
            candidates: Vec::new(),
            action,
            outcome,
            risk: RiskAssessment::low(),
            confirmation: None,
            retry_count: 0,
        }
    }

    #[test]
    fn test_generic_task_waits_for_done() {
        let task = GenericTask::new("read the news");
        assert!(!task.is_goal_satisfied(&[]));
        let scroll = step(Action::new(ActionKind::Scroll), Outcome::new("scrolled"));
        assert!(!task.is_goal_satisfied(&[scroll.clone()]));
        let done = step(Action::new(ActionKind::Done), Outcome::new("done"));
        assert!(task.is_goal_satisfied(&[scroll, done]));
    }

    #[test]
    fn test_navigation_task_matches_host() {
        let task = NavigationTask::new("navigate to example.com", "example.com");
        assert_eq!(task.host(), "example.com");

        let elsewhere = step(
            Action::navigate("https://other.org"),
            Outcome::new("ok").with_url("https://other.org/"),
        );
        assert!(!task.is_goal_satisfied(&[elsewhere]));

        let arrived = step(
            Action::navigate("https://example.com"),
            Outcome::new("ok").with_url("https://www.example.com/"),
        );
        assert!(task.is_goal_satisfied(&[arrived]));
    }
}
