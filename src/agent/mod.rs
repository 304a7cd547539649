//! Agent module - task loop and its pure collaborators
//!
//! Contains the control loop that drives one task from goal to a terminal
//! state, plus the optimizer, recovery policy and task model it relies on.

pub mod loop_state;
pub mod optimizer;
pub mod recovery;
pub mod task;
pub mod task_kind;
pub mod task_loop;

pub use loop_state::{LoopState, PendingRetry};
pub use optimizer::{
    estimate_tokens, ContentOptimizer, DegradedContext, ElementScorer, KeywordScorer,
    OptimizedContext, OptimizerInput,
};
pub use recovery::{AttemptLog, RecoveryPolicy};
pub use task::{SnapshotRef, Step, Task, TaskStatus};
pub use task_kind::{GenericTask, NavigationTask, TaskKind};
pub use task_loop::{LoopSettings, TaskLoop, TaskReport};
