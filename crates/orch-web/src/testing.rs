//! Test doubles shared by the crate's test modules.

use async_trait::async_trait;
use orchd::{EnsureOutcome, ExecutionBackend, LaunchSpec, LifecycleError, WorkerHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::routes::router;
use crate::state::WebState;

/// Launches nothing; every worker "starts" immediately.
pub(crate) struct InstantBackend;

#[async_trait]
impl ExecutionBackend for InstantBackend {
    async fn ensure_context(&self) -> Result<EnsureOutcome, LifecycleError> {
        Ok(EnsureOutcome::AlreadyExists)
    }

    async fn launch(&self, spec: LaunchSpec) -> Result<WorkerHandle, LifecycleError> {
        Ok(WorkerHandle {
            worker_id: spec.worker_id,
            ticket_id: spec.ticket_id,
            started_at: chrono::Utc::now(),
            pid: None,
        })
    }

    async fn terminate(&self, _handle: &WorkerHandle) -> Result<(), LifecycleError> {
        Ok(())
    }
}

/// Serve the full router on an ephemeral loopback port.
pub(crate) async fn serve_on_loopback(state: WebState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.expect("serve");
    });
    addr
}
