//! Task report rendering

use crate::agent::{TaskReport, TaskStatus};
use crate::core::RecoveryStrategy;

/// Render a finished task for the terminal
pub fn render_report(report: &TaskReport) -> String {
    let task = &report.task;
    let icon = match task.status {
        TaskStatus::Completed => "✅",
        _ => "❌",
    };

    let mut out = format!(
        "{} {} after {} step(s) in {:.1}s\n",
        icon,
        task.status,
        task.steps.len(),
        report.elapsed.as_secs_f64()
    );
    out.push_str("─────────────────────────────\n");
    out.push_str(&format!("Goal: {}\n", task.goal));

    for step in &task.steps {
        let confirmed = if step.confirmation.is_some() { " (confirmed)" } else { "" };
        out.push_str(&format!("  {}{}\n", step.summary(), confirmed));
    }

    let escalations = report
        .decisions
        .iter()
        .filter(|d| d.strategy == RecoveryStrategy::Escalate)
        .count();
    out.push_str(&format!(
        "Confirmations: {}  Recoveries: {}  Escalations: {}\n",
        report.confirmations.len(),
        report.decisions.len(),
        escalations
    ));
    out.push_str(&report.summary());
    out
}
