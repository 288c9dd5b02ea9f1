use axum::serve;
use chrono::{Duration, Utc};
use orch_core::{OrchConfig, TicketRepository};
use orchd::{ExecutionBackend, TicketService, WorkerLifecycleController};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::connection::ConnectionRegistry;
use crate::coordinator::RealtimeCoordinator;
use crate::error::WebError;
use crate::routes::router;
use crate::state::WebState;

pub const MAX_SEND_QUEUE: usize = 256;

/// Wire the ticket service, lifecycle controller and coordinator together.
pub fn build_state(
    config: &OrchConfig,
    repo: Arc<dyn TicketRepository>,
    backend: Arc<dyn ExecutionBackend>,
) -> WebState {
    let coordinator = Arc::new(
        RealtimeCoordinator::new(Arc::new(ConnectionRegistry::new(MAX_SEND_QUEUE)))
            .with_tickets(repo.clone()),
    );
    let lifecycle = Arc::new(WorkerLifecycleController::new(
        repo.clone(),
        backend,
        config.server.public_url.clone(),
    ));
    let service = Arc::new(TicketService::new(repo, lifecycle, coordinator.clone()));
    WebState::new(
        service,
        coordinator,
        heartbeat_timeout(config.workers.heartbeat_timeout_secs),
    )
}

pub fn heartbeat_timeout(secs: u64) -> Duration {
    Duration::from_std(std::time::Duration::from_secs(secs)).unwrap_or_else(|_| Duration::days(365))
}

/// Periodically stop workers whose ticket has gone quiet.
pub fn spawn_reaper(state: WebState, interval: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let heartbeats = state.coordinator.heartbeats();
            let reaped = state
                .service
                .reap_stale_workers(&heartbeats, Utc::now(), state.heartbeat_timeout)
                .await;
            if !reaped.is_empty() {
                warn!(count = reaped.len(), "reaped stale workers");
            }
        }
    })
}

pub async fn run_web_server(bind_addr: &str, state: WebState) -> Result<(), WebError> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(bind = %bind_addr, "orch-web listening");
    serve(listener, router(state))
        .await
        .map_err(|err| WebError::Internal {
            message: err.to_string(),
        })?;
    Ok(())
}
