//! Browser driver backed by the agent-browser CLI
//!
//! Each task gets its own named agent-browser session so that concurrent
//! tasks never share a page.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::browser::driver::{classify_driver_message, BrowserDriver, DriverError};
use crate::browser::snapshot::PageSnapshot;
use crate::core::config::BrowserConfig;
use crate::core::{Action, ActionKind, Outcome};

/// Driver for browser automation via agent-browser CLI
pub struct AgentBrowserDriver {
    /// Session name for isolation
    session_name: String,
    /// Whether to run in headed mode
    headed: bool,
    /// Per-command timeout
    timeout: Duration,
}

impl AgentBrowserDriver {
    /// Create a new driver for a session
    pub fn new(session_name: impl Into<String>) -> Self {
        Self {
            session_name: session_name.into(),
            headed: false,
            timeout: Duration::from_secs(30),
        }
    }

    /// Create a driver for one task, deriving a private session name
    pub fn for_task(config: &BrowserConfig, task_suffix: &str) -> Self {
        Self {
            session_name: format!("{}-{}", config.session_name, task_suffix),
            headed: config.headed,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Check if agent-browser is installed
    pub async fn is_available() -> bool {
        Command::new("agent-browser")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Run an agent-browser command
    async fn run_command(&self, args: &[&str]) -> Result<String, DriverError> {
        let mut cmd = Command::new("agent-browser");
        cmd.args(["--session", &self.session_name]);

        if self.headed {
            cmd.arg("--headed");
        }

        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(session = %self.session_name, ?args, "agent-browser");

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DriverError::Fatal(
                        "agent-browser not found. Install with: npm install -g agent-browser"
                            .to_string(),
                    )
                } else {
                    DriverError::Fatal(format!("Failed to run agent-browser: {}", e))
                }
            })?,
            Err(_) => {
                return Err(DriverError::Transient(format!(
                    "agent-browser {} timed out after {:?}",
                    args.first().copied().unwrap_or_default(),
                    self.timeout
                )))
            }
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(classify_driver_message(&stderr))
        }
    }

    /// Best-effort wait for the network to settle after navigation
    async fn wait_for_idle(&self) {
        if let Err(e) = self.run_command(&["wait", "--load", "networkidle"]).await {
            debug!(session = %self.session_name, error = %e, "network idle wait failed");
        }
    }

    /// Get current URL
    pub async fn get_url(&self) -> Result<String, DriverError> {
        self.run_command(&["get", "url"])
            .await
            .map(|s| s.trim().to_string())
    }

    /// Get page title
    pub async fn get_title(&self) -> Result<String, DriverError> {
        self.run_command(&["get", "title"])
            .await
            .map(|s| s.trim().to_string())
    }

    fn element_ref(action: &Action) -> Result<String, DriverError> {
        let target = action.target.as_deref().ok_or_else(|| {
            DriverError::Structural(format!("{} has no target element", action.kind))
        })?;
        Ok(if target.starts_with('@') {
            target.to_string()
        } else {
            format!("@{}", target)
        })
    }

    fn param<'a>(action: &'a Action, key: &str) -> Result<&'a str, DriverError> {
        action
            .get_string(key)
            .ok_or_else(|| DriverError::Structural(format!("missing parameter '{}'", key)))
    }
}

impl Default for AgentBrowserDriver {
    fn default() -> Self {
        Self::new("warden")
    }
}

#[async_trait]
impl BrowserDriver for AgentBrowserDriver {
    async fn capture_snapshot(&self) -> Result<PageSnapshot, DriverError> {
        let tree = self.run_command(&["snapshot", "-i", "--json"]).await?;
        let url = self.get_url().await?;
        let title = self.get_title().await.unwrap_or_default();
        // Body text is best effort; some pages refuse it while still usable
        let text = self
            .run_command(&["get", "text", "body"])
            .await
            .unwrap_or_default();

        PageSnapshot::from_agent_browser(&tree, url, title, text.trim())
            .map_err(|e| DriverError::Transient(format!("unreadable snapshot: {}", e)))
    }

    async fn execute(&self, action: &Action) -> Result<Outcome, DriverError> {
        let outcome = match action.kind {
            ActionKind::Navigate => {
                let url = Self::param(action, "url")?;
                self.run_command(&["open", url]).await?;
                self.wait_for_idle().await;
                Outcome::new(format!("Navigated to {}", url))
            }
            ActionKind::Click | ActionKind::Submit => {
                let target = Self::element_ref(action)?;
                self.run_command(&["click", &target]).await?;
                Outcome::new(format!("Clicked {}", target))
            }
            ActionKind::Type => {
                let target = Self::element_ref(action)?;
                let text = Self::param(action, "text")?;
                self.run_command(&["fill", &target, text]).await?;
                Outcome::new(format!("Filled {}", target))
            }
            ActionKind::Select => {
                let target = Self::element_ref(action)?;
                let value = Self::param(action, "value")?;
                self.run_command(&["select", &target, value]).await?;
                Outcome::new(format!("Selected '{}' in {}", value, target))
            }
            ActionKind::Hover => {
                let target = Self::element_ref(action)?;
                self.run_command(&["hover", &target]).await?;
                Outcome::new(format!("Hovered {}", target))
            }
            ActionKind::Scroll => {
                let direction = action.get_string("direction").unwrap_or("down");
                let pixels = action.get_u64("pixels").map(|px| px.to_string());
                let mut args = vec!["scroll", direction];
                if let Some(px) = pixels.as_deref() {
                    args.push(px);
                }
                self.run_command(&args).await?;
                Outcome::new(format!("Scrolled {}", direction))
            }
            ActionKind::Wait => {
                let ms = action.get_u64("duration_ms").unwrap_or(1_000);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Outcome::new(format!("Waited {} ms", ms))
            }
            ActionKind::Extract => {
                let target = match action.target {
                    Some(_) => Self::element_ref(action)?,
                    None => "body".to_string(),
                };
                let text = self.run_command(&["get", "text", &target]).await?;
                Outcome {
                    detail: format!("Extracted text from {}", target),
                    url: None,
                    extracted: Some(text.trim().to_string()),
                }
            }
            ActionKind::Back => {
                self.run_command(&["back"]).await?;
                Outcome::new("Went back")
            }
            ActionKind::Refresh => {
                self.run_command(&["reload"]).await?;
                Outcome::new("Reloaded page")
            }
            ActionKind::Done => Outcome::new("Task declared complete"),
        };

        let url = self.get_url().await.ok();
        Ok(Outcome { url, ..outcome })
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.run_command(&["close"]).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_creation() {
        let driver = AgentBrowserDriver::new("test-session");
        assert_eq!(driver.session_name, "test-session");
        assert!(!driver.headed);
    }

    #[tokio::test]
    async fn test_idle_wait_failure_does_not_propagate() {
        let mut driver = AgentBrowserDriver::new("warden-idle-wait-test");
        driver.timeout = Duration::from_millis(50);
        // Completes whether the binary is missing, slow or refuses the session
        driver.wait_for_idle().await;
    }

    #[test]
    fn test_session_per_task() {
        let config = BrowserConfig::default();
        let driver = AgentBrowserDriver::for_task(&config, "abc123");
        assert!(driver.session_name.ends_with("-abc123"));
    }

    #[test]
    fn test_element_ref_prefix() {
        let action = Action::click("e4");
        assert_eq!(AgentBrowserDriver::element_ref(&action).unwrap(), "@e4");
        let missing = Action::new(ActionKind::Click);
        assert!(matches!(
            AgentBrowserDriver::element_ref(&missing),
            Err(DriverError::Structural(_))
        ));
    }
}
