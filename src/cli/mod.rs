//! CLI module - terminal interaction
//!
//! Contains the console approver and report rendering.

pub mod approver;
pub mod report;

pub use approver::ConsoleApprover;
pub use report::render_report;
