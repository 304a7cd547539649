//! Task and step records
//!
//! A [`Task`] is owned and mutated only by the task loop. Its step history is
//! append-only and strictly ordered by sequence number.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::browser::PageSnapshot;
use crate::core::{Action, ConfirmationRecord, Outcome, Result, RiskAssessment, WardenError};

/// Lifecycle of a task.
///
/// `Pending -> InProgress -> {Completed, Failed}`, with
/// `InProgress <-> RequiresInput` as the only cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    RequiresInput,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Failed)
                | (InProgress, RequiresInput)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (RequiresInput, InProgress)
                | (RequiresInput, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::RequiresInput => "REQUIRES_INPUT",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

/// Compact reference to the snapshot a step acted on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub url: String,
    pub title: String,
    pub element_count: usize,
    pub captured_at: DateTime<Utc>,
}

impl From<&PageSnapshot> for SnapshotRef {
    fn from(snapshot: &PageSnapshot) -> Self {
        Self {
            url: snapshot.url.clone(),
            title: snapshot.title.clone(),
            element_count: snapshot.elements.len(),
            captured_at: snapshot.captured_at,
        }
    }
}

/// One executed iteration of the loop. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub seq: usize,
    pub snapshot: SnapshotRef,
    /// Candidates the oracle proposed for the executed attempt
    pub candidates: Vec<Action>,
    pub action: Action,
    pub outcome: Outcome,
    pub risk: RiskAssessment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<ConfirmationRecord>,
    /// Failed attempts before this step succeeded
    pub retry_count: u32,
}

impl Step {
    /// One-line summary used in model context and reports
    pub fn summary(&self) -> String {
        let mut line = format!("#{} {} -> {}", self.seq, self.action.summary(), self.outcome.detail);
        if let Some(extracted) = &self.outcome.extracted {
            let preview: String = extracted.chars().take(200).collect();
            line.push_str(&format!(" [extracted: {}]", preview));
        }
        line
    }
}

/// One user goal and its full execution history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub goal: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub steps: Vec<Step>,
    /// Notes carried between steps (user guidance, denials)
    pub context: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Task {
    pub fn new(goal: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            steps: Vec::new(),
            context: Vec::new(),
            result: None,
            failure_reason: None,
        }
    }

    /// Move to `next`, rejecting transitions the state machine forbids
    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(WardenError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Sequence number the next appended step must carry
    pub fn next_seq(&self) -> usize {
        self.steps.len()
    }

    /// Append a step; its sequence number must be the next one
    pub fn push_step(&mut self, step: Step) -> Result<()> {
        if step.seq != self.next_seq() {
            return Err(WardenError::Other(format!(
                "step {} appended out of order, expected {}",
                step.seq,
                self.next_seq()
            )));
        }
        self.steps.push(step);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn complete(&mut self, summary: impl Into<String>) -> Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(summary.into());
        Ok(())
    }

    /// Terminate as FAILED from any non-terminal state
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Summaries of the last `n` steps, oldest first
    pub fn recent_history(&self, n: usize) -> Vec<String> {
        let skip = self.steps.len().saturating_sub(n);
        self.steps.iter().skip(skip).map(Step::summary).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(seq: usize) -> Step {
        Step {
            seq,
            snapshot: SnapshotRef::from(&PageSnapshot::new("https://example.com", "Example")),
            candidates: Vec::new(),
            action: Action::navigate("https://example.com"),
            outcome: Outcome::new("ok"),
            risk: RiskAssessment::low(),
            confirmation: None,
            retry_count: 0,
        }
    }

    #[test]
    fn test_state_machine() {
        let mut task = Task::new("do something");
        assert!(task.transition(TaskStatus::Completed).is_err());
        task.transition(TaskStatus::InProgress).unwrap();
        task.transition(TaskStatus::RequiresInput).unwrap();
        task.transition(TaskStatus::InProgress).unwrap();
        task.complete("done").unwrap();
        assert!(task.is_terminal());
        assert!(task.transition(TaskStatus::InProgress).is_err());
        assert!(task.fail("late").is_err());
    }

    #[test]
    fn test_requires_input_can_fail() {
        let mut task = Task::new("x");
        task.transition(TaskStatus::InProgress).unwrap();
        task.transition(TaskStatus::RequiresInput).unwrap();
        task.fail("maximum task duration exceeded").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.failure_reason.is_some());
    }

    #[test]
    fn test_steps_are_contiguous() {
        let mut task = Task::new("x");
        task.push_step(step(0)).unwrap();
        assert!(task.push_step(step(2)).is_err());
        task.push_step(step(1)).unwrap();
        assert_eq!(task.next_seq(), 2);
    }

    #[test]
    fn test_recent_history_window() {
        let mut task = Task::new("x");
        for seq in 0..4 {
            task.push_step(step(seq)).unwrap();
        }
        let history = task.recent_history(2);
        assert_eq!(history.len(), 2);
        assert!(history[0].starts_with("#2"));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&TaskStatus::RequiresInput).unwrap();
        assert_eq!(json, "\"REQUIRES_INPUT\"");
    }
}
