//! Warden - Supervised AI Browser Agent
//!
//! Runs a natural-language goal against a live browser. Each step captures
//! the page, asks a model for candidate actions, classifies their risk,
//! waits for a human on anything sensitive, and executes one action.
//!
//! # Architecture
//!
//! - **Core**: Shared types, configuration, and error handling
//! - **Browser**: Page snapshots and the agent-browser driver
//! - **LLM**: Model providers and the action-proposing oracle
//! - **Safety**: Risk classification, confirmation gate, and audit log
//! - **Agent**: Task loop, content optimizer, and recovery policy
//! - **CLI**: Console approver and report rendering
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use warden::agent::{GenericTask, TaskLoop};
//! use warden::browser::AgentBrowserDriver;
//! use warden::llm::{create_provider, LlmOracle};
//! use warden::safety::{NullAuditSink, PolicyApprover};
//! use warden::Config;
//!
//! #[tokio::main]
//! async fn main() -> warden::Result<()> {
//!     let config = Config::load();
//!     let oracle = LlmOracle::new(create_provider(&config)?, config.models.orchestrator.clone());
//!     let task_loop = TaskLoop::new(
//!         &config,
//!         Arc::new(AgentBrowserDriver::for_task(&config.browser, "demo")),
//!         Arc::new(oracle),
//!         Arc::new(PolicyApprover::deny_all()),
//!         Arc::new(NullAuditSink),
//!     )?;
//!
//!     let report = task_loop
//!         .run(&GenericTask::new("Find the docs page"), CancellationToken::new())
//!         .await;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod browser;
pub mod cli;
pub mod core;
pub mod llm;
pub mod safety;

// Re-export commonly used items
pub use agent::{TaskLoop, TaskReport, TaskStatus};
pub use core::{Config, Result, WardenError};
