//! Terminal approver
//!
//! Asks the person at the terminal to approve risky actions and to resolve
//! escalations. Stdin is read on a dedicated thread and fed through a
//! channel, so a prompt abandoned on timeout does not keep a read pending.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::safety::{
    ApprovalDecision, Approver, ConfirmationRequest, EscalationRequest, EscalationResponse,
};

/// Approver backed by stdin/stdout
pub struct ConsoleApprover {
    lines: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl ConsoleApprover {
    /// Start reading stdin in the background
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self::from_receiver(rx)
    }

    /// Use an existing line source (tests, piped input)
    pub fn from_receiver(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            lines: Mutex::new(rx),
        }
    }

    /// Print `prompt` and wait for the next fresh line
    async fn ask(&self, prompt: &str) -> Option<String> {
        let mut lines = self.lines.lock().await;
        // Drop anything typed before the question was shown
        while lines.try_recv().is_ok() {}

        print!("{}", prompt);
        let _ = io::stdout().flush();
        lines.recv().await
    }
}

impl Default for ConsoleApprover {
    fn default() -> Self {
        Self::new()
    }
}

/// Interpret an answer to a confirmation prompt. Anything but an explicit
/// yes is a denial.
pub fn parse_confirmation(answer: &str) -> ApprovalDecision {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" | "approve" => ApprovalDecision::Approved,
        _ => ApprovalDecision::Denied,
    }
}

/// Interpret an answer to an escalation prompt.
///
/// Empty or `continue` resumes as-is, `abort`/`stop`/`q` gives up, and any
/// other text resumes with that text as guidance for the model.
pub fn parse_escalation(answer: &str) -> EscalationResponse {
    let trimmed = answer.trim();
    match trimmed.to_lowercase().as_str() {
        "" | "c" | "continue" | "retry" => EscalationResponse::Resume { guidance: None },
        "a" | "abort" | "stop" | "q" | "quit" => EscalationResponse::Abort {
            reason: "user chose to stop".to_string(),
        },
        _ => EscalationResponse::Resume {
            guidance: Some(trimmed.to_string()),
        },
    }
}

#[async_trait]
impl Approver for ConsoleApprover {
    async fn confirm(&self, request: &ConfirmationRequest) -> ApprovalDecision {
        println!();
        println!("⚠️  Confirmation required [{}]", request.assessment.tier);
        println!("   {}", request.prompt);
        if !request.assessment.rationale.is_empty() {
            println!("   Why: {}", request.assessment.rationale);
        }
        println!("   (times out in {}s)", request.timeout.as_secs());

        match self.ask("   Proceed? [y/N]: ").await {
            Some(answer) => parse_confirmation(&answer),
            None => ApprovalDecision::Denied,
        }
    }

    async fn escalate(&self, request: &EscalationRequest) -> EscalationResponse {
        println!();
        println!("🛑 Stuck on: {}", request.goal);
        println!("   {}", request.reason);
        if !request.tried.is_empty() {
            println!("   Already tried:");
            for attempt in &request.tried {
                println!("     - {}", attempt);
            }
        }
        println!("   Type an instruction, press Enter to retry, or 'abort' to stop.");

        match self.ask("   > ").await {
            Some(answer) => parse_escalation(&answer),
            None => EscalationResponse::Abort {
                reason: "input closed".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_confirmation() {
        assert_eq!(parse_confirmation("y"), ApprovalDecision::Approved);
        assert_eq!(parse_confirmation(" YES \n"), ApprovalDecision::Approved);
        assert_eq!(parse_confirmation(""), ApprovalDecision::Denied);
        assert_eq!(parse_confirmation("maybe"), ApprovalDecision::Denied);
    }

    #[test]
    fn test_parse_escalation() {
        assert_eq!(
            parse_escalation(""),
            EscalationResponse::Resume { guidance: None }
        );
        assert!(matches!(
            parse_escalation("abort"),
            EscalationResponse::Abort { .. }
        ));
        assert_eq!(
            parse_escalation("  use the search box  "),
            EscalationResponse::Resume {
                guidance: Some("use the search box".to_string())
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_backed_escalation() {
        let (tx, rx) = mpsc::unbounded_channel();
        let approver = ConsoleApprover::from_receiver(rx);
        let request = EscalationRequest {
            task_id: uuid::Uuid::new_v4(),
            goal: "find the docs".to_string(),
            reason: "no candidates".to_string(),
            tried: vec!["Structural: gone".to_string()],
        };

        let answer = tokio::spawn(async move { approver.escalate(&request).await });
        // let the prompt drain stale input before answering
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tx.send("stop".to_string()).unwrap();
        assert!(matches!(
            answer.await.unwrap(),
            EscalationResponse::Abort { .. }
        ));
    }
}
