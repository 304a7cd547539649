//! Warden - supervised browser task runner
//!
//! Main entry point for the CLI application.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use warden::agent::{GenericTask, NavigationTask, TaskKind, TaskLoop};
use warden::browser::AgentBrowserDriver;
use warden::cli::{render_report, ConsoleApprover};
use warden::core::config::ProviderType;
use warden::core::RiskTier;
use warden::llm::{create_provider, LlmOracle};
use warden::safety::{Approver, AuditSink, JsonlAuditSink, NullAuditSink, PolicyApprover};
use warden::Config;

/// Warden - run a browser task under risk-gated supervision
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// What to accomplish, in plain language
    goal: String,

    /// Finish as soon as a page on this host is reached
    #[arg(long, short = 't')]
    target_url: Option<String>,

    /// Approve actions up to this tier without asking (low, medium, high, critical)
    #[arg(long, conflicts_with = "deny_all")]
    auto_approve: Option<RiskTier>,

    /// Deny every confirmation and abort on escalation
    #[arg(long)]
    deny_all: bool,

    /// Model backend (ollama, openrouter)
    #[arg(long)]
    provider: Option<ProviderType>,

    /// Model used to propose actions
    #[arg(long, short = 'm')]
    model: Option<String>,

    /// Maximum loop iterations
    #[arg(long)]
    max_steps: Option<usize>,

    /// Maximum task duration in seconds
    #[arg(long)]
    max_duration: Option<u64>,

    /// Write the audit log here
    #[arg(long)]
    audit_log: Option<PathBuf>,

    /// Disable the audit log
    #[arg(long)]
    no_audit: bool,

    /// Enable debug output
    #[arg(long, short = 'd')]
    debug: bool,

    /// Run in headed browser mode (visible window)
    #[arg(long)]
    headed: bool,

    /// Print the default config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_config {
        println!("{}", Config::default_config_toml());
        return Ok(());
    }

    // Build configuration
    let mut config = Config::load();

    // Apply CLI overrides
    if let Some(provider) = args.provider {
        config.provider = provider;
    }
    if let Some(ref model) = args.model {
        config.models.orchestrator = model.clone();
    }
    if let Some(max_steps) = args.max_steps {
        config.agent.max_steps = max_steps;
    }
    if let Some(secs) = args.max_duration {
        config.agent.max_duration_secs = secs;
    }
    if let Some(ref path) = args.audit_log {
        config.audit.path = Some(path.clone());
    }
    if args.no_audit {
        config.audit.enabled = false;
    }
    if args.debug {
        config.agent.debug = true;
    }
    if args.headed {
        config.browser.headed = true;
    }

    init_tracing(config.agent.debug);

    if !AgentBrowserDriver::is_available().await {
        anyhow::bail!(
            "agent-browser not found. Install it with: npm install -g agent-browser && agent-browser install"
        );
    }

    let provider = create_provider(&config)?;
    let oracle = Arc::new(
        LlmOracle::new(provider, config.models.orchestrator.clone())
            .with_temperature(config.models.temperature),
    );

    let session_suffix = uuid::Uuid::new_v4().simple().to_string();
    let driver = Arc::new(AgentBrowserDriver::for_task(
        &config.browser,
        &session_suffix[..8],
    ));

    let approver: Arc<dyn Approver> = match (args.deny_all, args.auto_approve) {
        (true, _) => Arc::new(PolicyApprover::deny_all()),
        (false, Some(tier)) => Arc::new(PolicyApprover::auto_approve_up_to(tier)),
        (false, None) => Arc::new(ConsoleApprover::new()),
    };

    let jsonl = if config.audit.enabled {
        let path = config.audit_path();
        let sink = JsonlAuditSink::open(&path)
            .await
            .with_context(|| format!("opening audit log {}", path.display()))?;
        Some(Arc::new(sink))
    } else {
        None
    };
    let audit: Arc<dyn AuditSink> = match &jsonl {
        Some(sink) => sink.clone(),
        None => Arc::new(NullAuditSink),
    };

    let kind: Box<dyn TaskKind> = match args.target_url {
        Some(ref target) => Box::new(NavigationTask::new(args.goal.clone(), target)),
        None => Box::new(GenericTask::new(args.goal.clone())),
    };

    let task_loop = TaskLoop::new(&config, driver, oracle, approver, audit)?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            on_ctrl_c.cancel();
        }
    });

    let report = task_loop.run(kind.as_ref(), cancel).await;

    if let Some(sink) = jsonl {
        if let Err(e) = sink.close().await {
            tracing::warn!(error = %e, "failed to close audit log");
        }
    }

    println!("{}", render_report(&report));
    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(debug: bool) {
    let default = if debug { "warden=debug" } else { "warden=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
