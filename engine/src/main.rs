use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use forge_approval::ApprovalGate;
use forge_bus::AgentBus;
use forge_meeting::MeetingCoordinator;
use forge_observability::{init_process_logging, ProcessKind};
use forge_quality::{QualityGate, QualityGateConfig};
use forge_retry::{EscalationPayload, EscalationSink, RetryPolicy};
use forge_server::{AppState, serve};
use forge_store::PersistentStore;
use forge_tickets::TicketStore;
use forge_workflow::WorkflowEngine;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "forge-engine")]
#[command(about = "Headless Forge orchestration engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the OrchestratorAPI HTTP server.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 4000)]
        port: u16,
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// Submit one instruction and print the resulting workflow id, without
    /// starting a server.
    Run {
        instruction: String,
        #[arg(long, default_value = "default")]
        project_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match run().await {
        Ok(()) => Ok(()),
        Err(error) => {
            tracing::error!(%error, "forge-engine exited with an error");
            Err(error)
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { hostname, port, state_dir } => {
            let state_dir = resolve_state_dir(state_dir);
            let _log_guard = init_process_logging(ProcessKind::Engine, &state_dir.join("logs"), 30)
                .context("failed to initialize logging")?;
            let state = build_state(&state_dir).await?;
            state.engine.on_restart().await.context("failed to resume in-flight workflows")?;
            let addr: SocketAddr = format!("{hostname}:{port}").parse().context("invalid hostname or port")?;
            log_startup_paths(&state_dir, &addr);
            serve(addr, state).await?;
        }
        Command::Run { instruction, project_id } => {
            let state_dir = resolve_state_dir(None);
            let _log_guard = init_process_logging(ProcessKind::Engine, &state_dir.join("logs"), 30)
                .context("failed to initialize logging")?;
            let state = build_state(&state_dir).await?;
            let workflow_id = state.engine.start_workflow(&project_id, &instruction).await?;
            println!("{workflow_id}");
        }
    }

    Ok(())
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("FORGE_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".forge")
}

fn log_startup_paths(state_dir: &PathBuf, addr: &SocketAddr) {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    info!("starting forge-engine on http://{addr}");
    info!(
        "startup paths: exe={} cwd={} state_dir={}",
        exe.display(),
        cwd.display(),
        state_dir.display()
    );
}

/// Logs every escalation at warn level with its full payload; an operator
/// deployment wires a real paging/notification sink here instead.
struct LoggingEscalationSink;

#[async_trait]
impl EscalationSink for LoggingEscalationSink {
    async fn on_escalation(&self, payload: EscalationPayload) {
        tracing::warn!(
            run_id = %payload.run_id,
            agent_id = %payload.agent_id,
            category = ?payload.category,
            attempts = payload.attempts,
            reason = %payload.reason,
            "workflow escalated to a human"
        );
    }
}

async fn build_state(state_dir: &PathBuf) -> anyhow::Result<AppState> {
    let store = Arc::new(PersistentStore::new(state_dir.join("store")));
    let bus = Arc::new(AgentBus::file_backed(state_dir.join("bus"), store.clone()));
    let approvals = Arc::new(ApprovalGate::new(store.clone()));
    let tickets = Arc::new(TicketStore::new(store.clone()));
    let quality = Arc::new(QualityGate::new(store.clone()));
    let meetings = Arc::new(MeetingCoordinator::new(store.clone()));

    let config = forge_config::ConfigStore::load(state_dir.join("config.json"))
        .await
        .context("failed to load configuration")?;
    let effective = config.effective().await;

    let qa_config = QualityGateConfig {
        lint_command: Some(vec!["cargo".to_string(), "clippy".to_string(), "--quiet".to_string()]),
        test_command: Some(vec!["cargo".to_string(), "test".to_string(), "--quiet".to_string()]),
        test_probe_paths: vec![PathBuf::from("tests"), PathBuf::from("src")],
        process_timeout: Duration::from_secs(effective.default_timeout as u64),
    };

    let engine = Arc::new(WorkflowEngine::new(
        store,
        bus,
        approvals,
        tickets.clone(),
        quality,
        meetings,
        RetryPolicy::default(),
        Arc::new(LoggingEscalationSink),
        qa_config,
        state_dir.join("workspace"),
    ));

    Ok(AppState::new(engine, tickets, config))
}
