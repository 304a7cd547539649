//! Browser module - page snapshots and action execution
//!
//! Wraps agent-browser CLI for web automation behind the [`BrowserDriver`] trait.

mod agent_browser;
mod driver;
mod snapshot;

pub use agent_browser::AgentBrowserDriver;
pub use driver::{classify_driver_message, BrowserDriver, DriverError};
pub use snapshot::{Bounds, FormSnapshot, InteractiveElement, PageSnapshot};
