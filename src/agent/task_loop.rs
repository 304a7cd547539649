//! Task loop orchestrator
//!
//! Drives one task through capture -> decide -> (confirm) -> execute until
//! the goal is satisfied, the user gives up, or a budget runs out.
//!
//! Every external call is a suspension point bounded by the per-call
//! timeout, the task deadline and the task's cancellation token. There is
//! never more than one such call in flight for a task.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::loop_state::{LoopState, PendingRetry};
use crate::agent::optimizer::{ContentOptimizer, OptimizerInput};
use crate::agent::recovery::RecoveryPolicy;
use crate::agent::task::{SnapshotRef, Step, Task, TaskStatus};
use crate::agent::task_kind::TaskKind;
use crate::browser::{BrowserDriver, PageSnapshot};
use crate::core::{
    Action, BudgetKind, Config, ConfirmationRecord, ConfirmationResponse, Failure, FailureKind,
    OracleError, RecoveryDecision, RecoveryStrategy, Result, WardenError,
};
use crate::llm::ModelOracle;
use crate::safety::{
    record_or_warn, Approver, AuditEntry, AuditSink, ConfirmationGate, EscalationRequest,
    EscalationResponse, RiskClassifier, RiskContext, TaskOutcomeRecord,
};

/// Limits the loop enforces
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Hard cap on loop iterations
    pub max_steps: usize,
    /// Hard cap on wall-clock time
    pub max_duration: Duration,
    /// Recent steps shown to the model
    pub history_window: usize,
    /// Denials tolerated in one step before escalating
    pub max_alternatives_per_step: u32,
    /// Bound on each snapshot, model and execute call
    pub call_timeout: Duration,
    pub confirmation_timeout: Duration,
    /// Tokens the model may spend answering
    pub response_budget: usize,
}

impl LoopSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_steps: config.agent.max_steps,
            max_duration: config.agent.max_duration(),
            history_window: config.agent.history_window,
            max_alternatives_per_step: config.agent.max_alternatives_per_step,
            call_timeout: config.agent.call_timeout(),
            confirmation_timeout: config.safety.confirmation_timeout(),
            response_budget: config.optimizer.response_budget,
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Final result of running a task
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: Task,
    /// Every confirmation requested, in order
    pub confirmations: Vec<ConfirmationRecord>,
    /// Every recovery decision taken, in order
    pub decisions: Vec<RecoveryDecision>,
    pub iterations: usize,
    pub elapsed: Duration,
}

impl TaskReport {
    pub fn status(&self) -> TaskStatus {
        self.task.status
    }

    pub fn is_success(&self) -> bool {
        self.task.status == TaskStatus::Completed
    }

    /// Human-readable result: the step summary or the failure reason
    pub fn summary(&self) -> String {
        match self.task.status {
            TaskStatus::Completed => self.task.result.clone().unwrap_or_default(),
            _ => self
                .task
                .failure_reason
                .clone()
                .unwrap_or_else(|| format!("task ended in {}", self.task.status)),
        }
    }
}

/// How the loop ended
#[derive(Debug, Clone, PartialEq)]
enum Termination {
    Completed(String),
    Failed(String),
}

impl Termination {
    fn budget(kind: BudgetKind) -> Self {
        Termination::Failed(WardenError::BudgetExceeded(kind).to_string())
    }

    fn cancelled() -> Self {
        Termination::Failed("cancelled".to_string())
    }
}

/// Result of one pass through the loop
enum Iteration {
    /// Step executed or proposal refused; go around again
    Continue,
    Completed(String),
    /// Route through the recovery policy
    Failure(Failure),
    /// Ask the user without consulting the recovery policy
    Escalate(String),
    Terminate(Termination),
}

/// Outcome of a bounded external call
enum Bounded<T> {
    Done(T),
    CallTimeout,
    Deadline,
    Cancelled,
}

/// Per-task control loop
pub struct TaskLoop {
    driver: Arc<dyn BrowserDriver>,
    oracle: Arc<dyn ModelOracle>,
    approver: Arc<dyn Approver>,
    audit: Arc<dyn AuditSink>,
    classifier: RiskClassifier,
    optimizer: ContentOptimizer,
    recovery: RecoveryPolicy,
    settings: LoopSettings,
}

impl TaskLoop {
    /// Build a loop from configuration and its collaborators
    pub fn new(
        config: &Config,
        driver: Arc<dyn BrowserDriver>,
        oracle: Arc<dyn ModelOracle>,
        approver: Arc<dyn Approver>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        Ok(Self {
            driver,
            oracle,
            approver,
            audit,
            classifier: RiskClassifier::new(&config.safety)?,
            optimizer: ContentOptimizer::new(config.optimizer.token_budget),
            recovery: RecoveryPolicy::new(config.recovery.clone()),
            settings: LoopSettings::from_config(config),
        })
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_optimizer(mut self, optimizer: ContentOptimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Run a task to a terminal state
    pub async fn run(&self, kind: &dyn TaskKind, cancel: CancellationToken) -> TaskReport {
        let started = Instant::now();
        let deadline = started + self.settings.max_duration;

        let mut task = Task::new(kind.goal());
        let mut state = LoopState::new(self.settings.max_steps);
        let mut gate = ConfirmationGate::new(
            self.approver.clone(),
            self.audit.clone(),
            self.settings.confirmation_timeout,
        );

        info!(task_id = %task.id, goal = %task.goal, "task started");

        let termination = match task.transition(TaskStatus::InProgress) {
            Ok(()) => {
                self.drive(&mut task, &mut state, &mut gate, kind, deadline, &cancel)
                    .await
            }
            Err(e) => Termination::Failed(e.to_string()),
        };

        let applied = match &termination {
            Termination::Completed(summary) => task.complete(summary.clone()),
            Termination::Failed(reason) => task.fail(reason.clone()),
        };
        if let Err(e) = applied {
            warn!(task_id = %task.id, error = %e, "could not record final status");
        }

        let elapsed = started.elapsed();
        match task.status {
            TaskStatus::Completed => {
                info!(task_id = %task.id, steps = task.steps.len(), ?elapsed, "task completed")
            }
            _ => info!(
                task_id = %task.id,
                reason = task.failure_reason.as_deref().unwrap_or(""),
                ?elapsed,
                "task failed"
            ),
        }

        let outcome = TaskOutcomeRecord {
            task_id: task.id,
            goal: task.goal.clone(),
            status: task.status,
            steps: task.steps.len(),
            summary: task.result.clone(),
            reason: task.failure_reason.clone(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            timestamp: chrono::Utc::now(),
        };
        record_or_warn(self.audit.as_ref(), AuditEntry::Outcome(outcome)).await;

        match tokio::time::timeout(self.settings.call_timeout, self.driver.close()).await {
            Ok(Err(e)) => debug!(error = %e, "browser close failed"),
            Err(_) => debug!("browser close timed out"),
            Ok(Ok(())) => {}
        }

        TaskReport {
            task,
            confirmations: state.confirmations,
            decisions: state.decisions,
            iterations: state.iteration,
            elapsed,
        }
    }

    async fn drive(
        &self,
        task: &mut Task,
        state: &mut LoopState,
        gate: &mut ConfirmationGate,
        kind: &dyn TaskKind,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Termination {
        loop {
            if cancel.is_cancelled() {
                return Termination::cancelled();
            }
            if Instant::now() >= deadline {
                return Termination::budget(BudgetKind::WallClock);
            }
            if !state.should_continue() {
                return Termination::budget(BudgetKind::Steps);
            }
            state.next_iteration();

            let escalation = match self.iterate(task, state, gate, kind, deadline, cancel).await {
                Iteration::Continue => continue,
                Iteration::Completed(summary) => return Termination::Completed(summary),
                Iteration::Terminate(termination) => return termination,
                Iteration::Escalate(reason) => reason,
                Iteration::Failure(failure) => {
                    let decision = self.recovery.decide(&failure, &state.attempts);
                    state.attempts.record(&failure, &decision);
                    state.decisions.push(decision.clone());
                    info!(
                        task_id = %task.id,
                        seq = decision.step_seq,
                        failure = ?decision.failure,
                        strategy = %decision.strategy,
                        attempt = decision.attempt,
                        "recovery decision"
                    );
                    record_or_warn(
                        self.audit.as_ref(),
                        AuditEntry::recovery(task.id, decision.clone()),
                    )
                    .await;

                    match decision.strategy {
                        RecoveryStrategy::RetrySame => {
                            let backoff = Duration::from_millis(decision.backoff_ms.unwrap_or(0));
                            let wake = (Instant::now() + backoff).min(deadline);
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => return Termination::cancelled(),
                                _ = tokio::time::sleep_until(wake) => {}
                            }
                            continue;
                        }
                        RecoveryStrategy::RetryAlternate => {
                            state.pending_retry = None;
                            state.last_failure = Some(failure.message.clone());
                            continue;
                        }
                        RecoveryStrategy::Escalate => {
                            state.pending_retry = None;
                            decision.reason
                        }
                        RecoveryStrategy::Abort => return Termination::Failed(decision.reason),
                    }
                }
            };

            if let Err(termination) = self.escalate(task, state, escalation, deadline, cancel).await {
                return termination;
            }
        }
    }

    /// One capture -> decide -> confirm -> execute pass
    async fn iterate(
        &self,
        task: &mut Task,
        state: &mut LoopState,
        gate: &mut ConfirmationGate,
        kind: &dyn TaskKind,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Iteration {
        let snapshot = match self
            .bounded(deadline, cancel, self.driver.capture_snapshot())
            .await
        {
            Bounded::Done(Ok(snapshot)) => snapshot,
            Bounded::Done(Err(e)) => return Iteration::Failure(Failure::from(e)),
            Bounded::CallTimeout => {
                return Iteration::Failure(Failure::new(
                    FailureKind::Transient,
                    "page snapshot timed out",
                ))
            }
            Bounded::Deadline => {
                return Iteration::Terminate(Termination::budget(BudgetKind::WallClock))
            }
            Bounded::Cancelled => return Iteration::Terminate(Termination::cancelled()),
        };

        let retry = state
            .pending_retry
            .take()
            .filter(|p| snapshot.check_action(&p.action).is_ok());

        let (action, candidates, approved) = match retry {
            Some(PendingRetry {
                action,
                candidates,
                confirmation,
            }) => {
                debug!(task_id = %task.id, action = %action.summary(), "re-executing action");
                (action, candidates, confirmation)
            }
            None => match self.propose(task, state, &snapshot, deadline, cancel).await {
                Ok((action, candidates)) => (action, candidates, None),
                Err(iteration) => return iteration,
            },
        };

        let target_label = action
            .target
            .as_deref()
            .and_then(|t| snapshot.get_element(t))
            .map(|el| el.label.clone());
        let mut risk_context = RiskContext::new(snapshot.url.clone());
        risk_context.target_label = target_label;
        let risk = self.classifier.classify(&action, &risk_context);

        debug!(
            task_id = %task.id,
            action = %action.summary(),
            tier = %risk.tier,
            confirm = risk.requires_confirmation,
            "classified"
        );

        let confirmation = if risk.requires_confirmation {
            let prior = approved
                .filter(|r| r.action_id == action.id && r.response.is_affirmative());
            match prior {
                Some(record) => Some(record),
                None => {
                    if let Err(e) = task.transition(TaskStatus::RequiresInput) {
                        return Iteration::Terminate(Termination::Failed(e.to_string()));
                    }
                    let record = gate.request(task.id, &action, &risk, deadline, cancel).await;
                    state.confirmations.push(record.clone());

                    if record.response == ConfirmationResponse::Cancelled || cancel.is_cancelled() {
                        return Iteration::Terminate(Termination::cancelled());
                    }
                    if Instant::now() >= deadline {
                        return Iteration::Terminate(Termination::budget(BudgetKind::WallClock));
                    }
                    if let Err(e) = task.transition(TaskStatus::InProgress) {
                        return Iteration::Terminate(Termination::Failed(e.to_string()));
                    }

                    if !record.response.is_affirmative() {
                        return self.refused(state, &action, &record);
                    }
                    Some(record)
                }
            }
        } else {
            None
        };

        let executed = self
            .bounded(deadline, cancel, self.driver.execute(&action))
            .await;
        match executed {
            Bounded::Done(Ok(outcome)) => {
                let seq = task.next_seq();
                info!(task_id = %task.id, seq, action = %action.summary(), "step executed");
                let step = Step {
                    seq,
                    snapshot: SnapshotRef::from(&snapshot),
                    candidates,
                    action,
                    outcome,
                    risk,
                    confirmation,
                    retry_count: state.attempts.total(),
                };
                if let Err(e) = task.push_step(step) {
                    return Iteration::Terminate(Termination::Failed(e.to_string()));
                }
                state.step_succeeded(task.next_seq());

                if kind.is_goal_satisfied(&task.steps) {
                    return Iteration::Completed(completion_summary(task));
                }
                Iteration::Continue
            }
            Bounded::Done(Err(e)) => {
                let failure = Failure::from(e).for_action(action.id);
                match failure.kind {
                    FailureKind::Transient => {
                        state.pending_retry = Some(PendingRetry {
                            action,
                            candidates,
                            confirmation,
                        });
                    }
                    FailureKind::Structural => state.exclude(&action),
                    _ => {}
                }
                Iteration::Failure(failure)
            }
            Bounded::CallTimeout => {
                let failure = Failure::new(
                    FailureKind::Transient,
                    format!("{} timed out", action.summary()),
                )
                .for_action(action.id);
                state.pending_retry = Some(PendingRetry {
                    action,
                    candidates,
                    confirmation,
                });
                Iteration::Failure(failure)
            }
            Bounded::Deadline => Iteration::Terminate(Termination::budget(BudgetKind::WallClock)),
            Bounded::Cancelled => Iteration::Terminate(Termination::cancelled()),
        }
    }

    /// Build context, ask the oracle and pick the best valid candidate
    async fn propose(
        &self,
        task: &Task,
        state: &LoopState,
        snapshot: &PageSnapshot,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> std::result::Result<(Action, Vec<Action>), Iteration> {
        let history = task.recent_history(self.settings.history_window);
        let input = OptimizerInput {
            goal: &task.goal,
            snapshot,
            history: &history,
            last_failure: state.last_failure.as_deref(),
            notes: &task.context,
        };
        let context = self.optimizer.optimize(&input).map_err(|e| {
            Iteration::Failure(Failure::new(FailureKind::DegradedContext, e.to_string()))
        })?;

        debug!(
            task_id = %task.id,
            tokens = context.tokens,
            elements = context.elements_included,
            of = context.elements_total,
            "context built"
        );

        let proposals = match self
            .bounded(
                deadline,
                cancel,
                self.oracle
                    .propose_actions(&context.text, self.settings.response_budget),
            )
            .await
        {
            Bounded::Done(Ok(actions)) => actions,
            Bounded::Done(Err(e)) => {
                return Err(Iteration::Failure(Failure::new(
                    oracle_failure_kind(&e),
                    e.to_string(),
                )))
            }
            Bounded::CallTimeout => {
                return Err(Iteration::Failure(Failure::new(
                    FailureKind::OracleTimeout,
                    OracleError::Timeout.to_string(),
                )))
            }
            Bounded::Deadline => {
                return Err(Iteration::Terminate(Termination::budget(BudgetKind::WallClock)))
            }
            Bounded::Cancelled => return Err(Iteration::Terminate(Termination::cancelled())),
        };

        match select_candidate(&proposals, snapshot, state) {
            Some(action) => Ok((action, proposals)),
            None => {
                let message = if proposals.is_empty() {
                    "model returned no candidates".to_string()
                } else {
                    format!("none of {} candidates is valid on this page", proposals.len())
                };
                Err(Iteration::Failure(Failure::new(
                    FailureKind::NoValidCandidate,
                    message,
                )))
            }
        }
    }

    /// A confirmation was denied or timed out
    fn refused(&self, state: &mut LoopState, action: &Action, record: &ConfirmationRecord) -> Iteration {
        state.denials += 1;
        state.exclude(action);
        let verdict = match record.response {
            ConfirmationResponse::TimedOut => "was not confirmed in time",
            _ => "was refused by the user",
        };
        state.last_failure = Some(format!("{} {}; propose something else", action.summary(), verdict));

        if state.denials > self.settings.max_alternatives_per_step {
            Iteration::Escalate(format!(
                "{} proposals refused for this step, last: {}",
                state.denials,
                action.summary()
            ))
        } else {
            Iteration::Continue
        }
    }

    /// Suspend in REQUIRES_INPUT until the user answers
    async fn escalate(
        &self,
        task: &mut Task,
        state: &mut LoopState,
        reason: String,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), Termination> {
        task.transition(TaskStatus::RequiresInput)
            .map_err(|e| Termination::Failed(e.to_string()))?;

        warn!(task_id = %task.id, %reason, "escalating to user");
        let request = EscalationRequest {
            task_id: task.id,
            goal: task.goal.clone(),
            reason: reason.clone(),
            tried: state.attempts.tried.clone(),
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Termination::cancelled()),
            answer = tokio::time::timeout_at(deadline, self.approver.escalate(&request)) => match answer {
                Ok(response) => response,
                Err(_) => {
                    return Err(Termination::Failed(format!(
                        "{} while waiting for user input ({})",
                        WardenError::BudgetExceeded(BudgetKind::WallClock),
                        reason
                    )))
                }
            },
        };

        match response {
            EscalationResponse::Resume { guidance } => {
                task.transition(TaskStatus::InProgress)
                    .map_err(|e| Termination::Failed(e.to_string()))?;
                if let Some(guidance) = guidance.filter(|g| !g.trim().is_empty()) {
                    info!(task_id = %task.id, %guidance, "resuming with user guidance");
                    task.context.push(format!("User instruction: {}", guidance.trim()));
                }
                state.resume_after_escalation();
                Ok(())
            }
            EscalationResponse::Abort { reason } => {
                Err(Termination::Failed(format!("stopped by user: {}", reason)))
            }
        }
    }

    /// Await `fut` bounded by the call timeout, the deadline and cancellation
    async fn bounded<F: Future>(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
        fut: F,
    ) -> Bounded<F::Output> {
        let call_deadline = Instant::now() + self.settings.call_timeout;
        let limit = call_deadline.min(deadline);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Bounded::Cancelled,
            result = tokio::time::timeout_at(limit, fut) => match result {
                Ok(value) => Bounded::Done(value),
                Err(_) if limit >= deadline => Bounded::Deadline,
                Err(_) => Bounded::CallTimeout,
            },
        }
    }
}

/// Highest-confidence candidate that is valid on the page and not excluded.
/// Candidates arrive ordered best first.
fn select_candidate(
    proposals: &[Action],
    snapshot: &PageSnapshot,
    state: &LoopState,
) -> Option<Action> {
    proposals
        .iter()
        .filter(|a| !state.is_excluded(a))
        .find(|a| match snapshot.check_action(a) {
            Ok(()) => true,
            Err(reason) => {
                debug!(action = %a.summary(), %reason, "candidate rejected");
                false
            }
        })
        .cloned()
}

fn oracle_failure_kind(err: &OracleError) -> FailureKind {
    match err {
        OracleError::RateLimited(_) => FailureKind::OracleRateLimited,
        OracleError::Timeout => FailureKind::OracleTimeout,
        OracleError::Unavailable(_) => FailureKind::OracleUnavailable,
        OracleError::Malformed(_) => FailureKind::OracleMalformed,
    }
}

fn completion_summary(task: &Task) -> String {
    let mut out = format!("Completed in {} step(s):", task.steps.len());
    for step in &task.steps {
        out.push_str("\n  ");
        out.push_str(&step.summary());
    }
    out
}
