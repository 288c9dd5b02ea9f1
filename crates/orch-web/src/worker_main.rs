use anyhow::Context;
use clap::Parser;
use orch_agents::{AgentRunner, CommandProvider, RunOutcome, RunnerSettings};
use orch_core::{load_config, OrchConfig, TicketId, TicketRepository};
use orch_web::{init_tracing, HubClient, RemoteTicketStore};
use orchd::{ENV_COORDINATOR_URL, ENV_TICKET_ID, ENV_WORKER_ID};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Runs one ticket's agents. Launched by the coordinator with the ticket,
/// worker and hub url in its environment.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "orch-worker", about = "Runs one ticket's agents against the coordinator")]
struct Cli {
    #[arg(long, env = ENV_TICKET_ID)]
    ticket_id: String,
    #[arg(long, env = ENV_WORKER_ID)]
    worker_id: Option<String>,
    #[arg(long, env = ENV_COORDINATOR_URL)]
    coordinator_url: String,
    /// Program that answers one completion: request JSON on stdin,
    /// completion JSON on stdout.
    #[arg(long, env = "ORCH_COMPLETION_COMMAND")]
    completion_command: String,
    #[arg(long = "completion-arg", allow_hyphen_values = true)]
    completion_args: Vec<String>,
    /// TOML configuration for iteration limits and heartbeat timing.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
enum WorkerError {
    #[error("ticket id must not be empty")]
    EmptyTicketId,
    #[error("agent run ended on provider failure: {0}")]
    ProviderFailed(String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config at {}", path.display()))?,
        None => OrchConfig::default(),
    };
    let ticket_id = ticket_id(&cli.ticket_id)?;
    let settings = RunnerSettings::from(&config.orchestrator)
        .with_heartbeat_interval(heartbeat_interval(config.workers.heartbeat_timeout_secs));

    let repo: Arc<dyn TicketRepository> = Arc::new(
        RemoteTicketStore::for_coordinator(&cli.coordinator_url)
            .context("invalid coordinator url")?,
    );
    let mut hub = HubClient::connect(&cli.coordinator_url).await?;
    let provider = Arc::new(CommandProvider::new(
        cli.completion_command.clone(),
        cli.completion_args.clone(),
    ));

    let mut runner = AgentRunner::new(repo, ticket_id.clone(), provider, hub.link(), settings)?;
    if let Some(commands) = hub.take_commands() {
        runner = runner.with_commands(commands);
    }
    info!(
        %ticket_id,
        worker_id = cli.worker_id.as_deref().unwrap_or("-"),
        coordinator = %cli.coordinator_url,
        "worker starting"
    );

    let outcome = runner.run().await;
    hub.close().await;
    match outcome? {
        RunOutcome::ProviderFailed { message } => {
            error!(%ticket_id, error = %message, "worker exiting on provider failure");
            Err(WorkerError::ProviderFailed(message).into())
        }
        other => {
            info!(%ticket_id, outcome = ?other, "worker finished");
            Ok(())
        }
    }
}

fn ticket_id(raw: &str) -> Result<TicketId, WorkerError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(WorkerError::EmptyTicketId);
    }
    Ok(TicketId::new(trimmed))
}

/// Four beats per reaper timeout, never faster than once a second.
fn heartbeat_interval(timeout_secs: u64) -> Duration {
    Duration::from_secs((timeout_secs / 4).max(1))
}
