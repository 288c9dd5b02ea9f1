//! Worker registry: one ephemeral worker per active ticket.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use orch_core::{TicketId, TicketRepository, WorkerId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{EnsureOutcome, ExecutionBackend, LaunchSpec, WorkerHandle};
use crate::error::LifecycleError;

pub fn new_worker_id(ticket_id: &TicketId) -> WorkerId {
    let suffix = Uuid::new_v4().simple().to_string();
    WorkerId::new(format!("worker-{ticket_id}-{}", &suffix[..8]))
}

pub struct WorkerLifecycleController {
    repo: Arc<dyn TicketRepository>,
    backend: Arc<dyn ExecutionBackend>,
    coordinator_url: String,
    workers: DashMap<WorkerId, WorkerHandle>,
}

impl WorkerLifecycleController {
    pub fn new(
        repo: Arc<dyn TicketRepository>,
        backend: Arc<dyn ExecutionBackend>,
        coordinator_url: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            backend,
            coordinator_url: coordinator_url.into(),
            workers: DashMap::new(),
        }
    }

    pub fn coordinator_url(&self) -> &str {
        &self.coordinator_url
    }

    /// Launch a worker for `ticket_id` and assign it to the ticket.
    ///
    /// Does not dedupe concurrent calls for the same ticket; callers gate on
    /// the ticket status change instead.
    pub async fn start_worker(&self, ticket_id: &TicketId) -> Result<WorkerId, LifecycleError> {
        self.repo.get_ticket(ticket_id)?;

        match self.backend.ensure_context().await? {
            EnsureOutcome::Created => info!(%ticket_id, "worker context created"),
            EnsureOutcome::AlreadyExists => debug!(%ticket_id, "worker context already present"),
        }

        let worker_id = new_worker_id(ticket_id);
        let spec = LaunchSpec {
            ticket_id: ticket_id.clone(),
            worker_id: worker_id.clone(),
            coordinator_url: self.coordinator_url.clone(),
        };
        let handle = match self.backend.launch(spec).await {
            Ok(handle) => handle,
            Err(err) => {
                error!(%ticket_id, %worker_id, error = %err, "worker launch failed");
                return Err(err);
            }
        };
        self.workers.insert(worker_id.clone(), handle);

        if let Err(err) = self.repo.assign_worker(ticket_id, Some(worker_id.clone())) {
            // Ticket vanished between lookup and assignment.
            warn!(%ticket_id, %worker_id, error = %err, "could not assign worker; stopping it");
            self.stop_worker(&worker_id).await;
            return Err(err.into());
        }
        info!(%ticket_id, %worker_id, "worker started");
        Ok(worker_id)
    }

    /// Returns true only for the call that actually removed the entry.
    pub async fn stop_worker(&self, worker_id: &WorkerId) -> bool {
        let Some((_, handle)) = self.workers.remove(worker_id) else {
            return false;
        };

        if let Err(err) = self.backend.terminate(&handle).await {
            error!(%worker_id, error = %err, "worker termination failed");
        }
        self.release_assignment(&handle);
        info!(ticket_id = %handle.ticket_id, %worker_id, "worker stopped");
        true
    }

    pub async fn stop_workers_for_ticket(&self, ticket_id: &TicketId) -> Vec<WorkerId> {
        let ids = self
            .workers
            .iter()
            .filter(|entry| &entry.value().ticket_id == ticket_id)
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();

        let mut stopped = Vec::with_capacity(ids.len());
        for worker_id in ids {
            if self.stop_worker(&worker_id).await {
                stopped.push(worker_id);
            }
        }
        stopped
    }

    /// Point-in-time copy of the registry.
    pub fn active_workers(&self) -> HashMap<WorkerId, WorkerHandle> {
        self.workers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn worker_for_ticket(&self, ticket_id: &TicketId) -> Option<WorkerHandle> {
        self.workers
            .iter()
            .find(|entry| &entry.value().ticket_id == ticket_id)
            .map(|entry| entry.value().clone())
    }

    /// Stop every worker whose ticket has not been heard from within
    /// `timeout`. A heartbeat older than the worker itself belongs to an
    /// earlier worker and is ignored.
    pub async fn reap_stale(
        &self,
        heartbeats: &HashMap<TicketId, DateTime<Utc>>,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Vec<WorkerHandle> {
        let stale = self
            .workers
            .iter()
            .filter(|entry| {
                let handle = entry.value();
                let last_seen = heartbeats
                    .get(&handle.ticket_id)
                    .map_or(handle.started_at, |seen| (*seen).max(handle.started_at));
                now - last_seen > timeout
            })
            .map(|entry| entry.value().clone())
            .collect::<Vec<_>>();

        let mut reaped = Vec::with_capacity(stale.len());
        for handle in stale {
            if !self.stop_worker(&handle.worker_id).await {
                continue;
            }
            warn!(
                ticket_id = %handle.ticket_id,
                worker_id = %handle.worker_id,
                timeout_secs = timeout.num_seconds(),
                "reaped worker without heartbeat"
            );
            let entry = format!(
                "Worker {} stopped: no heartbeat for {}s",
                handle.worker_id,
                timeout.num_seconds()
            );
            if let Err(err) = self.repo.add_activity_log(&handle.ticket_id, &entry) {
                debug!(ticket_id = %handle.ticket_id, error = %err, "could not log reap");
            }
            reaped.push(handle);
        }
        reaped
    }

    fn release_assignment(&self, handle: &WorkerHandle) {
        let ticket = match self.repo.get_ticket(&handle.ticket_id) {
            Ok(ticket) => ticket,
            Err(err) => {
                debug!(ticket_id = %handle.ticket_id, error = %err, "ticket gone; nothing to release");
                return;
            }
        };
        // A newer worker may already own the ticket.
        if ticket.worker_id.as_ref() != Some(&handle.worker_id) {
            return;
        }
        if let Err(err) = self.repo.assign_worker(&handle.ticket_id, None) {
            warn!(ticket_id = %handle.ticket_id, error = %err, "could not release worker");
        }
    }
}
