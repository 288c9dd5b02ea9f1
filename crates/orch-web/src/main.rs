use anyhow::Context;
use clap::Parser;
use orch_core::{
    load_config, MemoryTicketStore, OrchConfig, TicketRepository, Validate, ValidationIssue,
    ValidationLevel,
};
use orch_web::{build_state, init_tracing, run_web_server, spawn_reaper};
use orchd::{ProcessBackend, SqliteTicketStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = "config/orch.toml";
const REAP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "orch-web", about = "Ticket board, worker lifecycle and real-time hub")]
struct Cli {
    /// TOML configuration file. Defaults apply when the default path is absent.
    #[arg(long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
    /// Listen address, overriding `server.bind`.
    #[arg(long)]
    bind: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error("{0}")]
    Args(String),
    #[error("{0}")]
    InvalidConfig(String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let config = load_or_default(&cli.config)?;
    let issues = config.validate();
    for issue in issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Warning)
    {
        warn!(code = issue.code, "{}", issue.message);
    }
    validate_config(&issues)?;
    let bind = resolve_bind(cli.bind, &config.server.bind)?;

    let repo = open_repository(&config)?;
    let backend = Arc::new(ProcessBackend::from_config(&config.workers));
    let state = build_state(&config, repo, backend);
    let _reaper = spawn_reaper(state.clone(), REAP_INTERVAL);

    info!(%bind, public_url = %config.server.public_url, "starting orch-web");
    run_web_server(&bind, state).await?;
    Ok(())
}

fn load_or_default(path: &PathBuf) -> anyhow::Result<OrchConfig> {
    if path.as_path() == std::path::Path::new(DEFAULT_CONFIG) && !path.exists() {
        info!(path = %path.display(), "no config file; using defaults");
        return Ok(OrchConfig::default());
    }
    load_config(path).with_context(|| format!("failed to load config at {}", path.display()))
}

fn open_repository(config: &OrchConfig) -> anyhow::Result<Arc<dyn TicketRepository>> {
    match &config.storage.sqlite_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let store = SqliteTicketStore::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            store.migrate().context("failed to migrate ticket store")?;
            info!(path = %path.display(), "using sqlite ticket store");
            Ok(Arc::new(store))
        }
        None => {
            info!("using in-memory ticket store");
            Ok(Arc::new(MemoryTicketStore::new()))
        }
    }
}

fn resolve_bind(bind_override: Option<String>, config_bind: &str) -> Result<String, MainError> {
    let candidate = bind_override.unwrap_or_else(|| config_bind.to_string());
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return Err(MainError::Args(
            "bind address must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

fn validate_config(issues: &[ValidationIssue]) -> Result<(), MainError> {
    let errors = issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Error)
        .collect::<Vec<_>>();
    if errors.is_empty() {
        return Ok(());
    }

    let rendered = errors
        .iter()
        .map(|issue| format!("{}: {}", issue.code, issue.message))
        .collect::<Vec<_>>()
        .join("; ");
    Err(MainError::InvalidConfig(format!(
        "config validation failed ({rendered})"
    )))
}
