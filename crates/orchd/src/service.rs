//! Ticket service: the single entry point for board mutations.
//!
//! Wraps a `TicketRepository`, starts and stops workers when a ticket moves
//! in or out of Active, and tells a `TicketNotifier` about every change.

use chrono::{DateTime, Duration, Utc};
use orch_core::{
    NewTask, SubtaskId, SubtaskStatus, SubtaskTransition, Task, TaskId, Ticket, TicketError,
    TicketId, TicketRepository, TicketStatus, WorkerDirective, WorkerId,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::WorkerHandle;
use crate::lifecycle::WorkerLifecycleController;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Ticket(#[from] TicketError),
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::Ticket(err) if err.is_not_found())
    }
}

/// Receives board changes after they are stored. Delivery is best effort.
pub trait TicketNotifier: Send + Sync {
    fn ticket_created(&self, ticket: &Ticket);
    fn ticket_updated(&self, ticket: &Ticket);
    fn ticket_deleted(&self, ticket_id: &TicketId);
    /// The ticket no longer has a running worker; its in-flight state is void.
    fn worker_stopped(&self, ticket_id: &TicketId);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl TicketNotifier for NoopNotifier {
    fn ticket_created(&self, _ticket: &Ticket) {}
    fn ticket_updated(&self, _ticket: &Ticket) {}
    fn ticket_deleted(&self, _ticket_id: &TicketId) {}
    fn worker_stopped(&self, _ticket_id: &TicketId) {}
}

pub struct TicketService {
    repo: Arc<dyn TicketRepository>,
    lifecycle: Arc<WorkerLifecycleController>,
    notifier: Arc<dyn TicketNotifier>,
}

impl TicketService {
    pub fn new(
        repo: Arc<dyn TicketRepository>,
        lifecycle: Arc<WorkerLifecycleController>,
        notifier: Arc<dyn TicketNotifier>,
    ) -> Self {
        Self {
            repo,
            lifecycle,
            notifier,
        }
    }

    pub fn repository(&self) -> Arc<dyn TicketRepository> {
        self.repo.clone()
    }

    pub fn lifecycle(&self) -> &WorkerLifecycleController {
        &self.lifecycle
    }

    pub fn create_ticket(&self, title: &str, description: &str) -> Result<Ticket, ServiceError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ServiceError::InvalidInput {
                message: "ticket title must not be empty".to_string(),
            });
        }
        let ticket = self.repo.create_ticket(title, description)?;
        info!(ticket_id = %ticket.id, "ticket created");
        self.notifier.ticket_created(&ticket);
        Ok(ticket)
    }

    pub fn get_ticket(&self, ticket_id: &TicketId) -> Result<Ticket, ServiceError> {
        Ok(self.repo.get_ticket(ticket_id)?)
    }

    pub fn list_tickets(&self) -> Result<Vec<Ticket>, ServiceError> {
        Ok(self.repo.list_tickets()?)
    }

    /// Stops the ticket's workers before removing it.
    pub async fn delete_ticket(&self, ticket_id: &TicketId) -> Result<bool, ServiceError> {
        if !self.lifecycle.stop_workers_for_ticket(ticket_id).await.is_empty() {
            self.notifier.worker_stopped(ticket_id);
        }
        let removed = self.repo.delete_ticket(ticket_id)?;
        if removed {
            info!(%ticket_id, "ticket deleted");
            self.notifier.ticket_deleted(ticket_id);
        }
        Ok(removed)
    }

    /// Move a ticket on the board and act on the resulting worker directive.
    /// A worker that fails to launch is logged and the ticket stays
    /// unassigned, so a later move into Active retries.
    pub async fn update_status(
        &self,
        ticket_id: &TicketId,
        status: TicketStatus,
    ) -> Result<Ticket, ServiceError> {
        let change = self.repo.update_status(ticket_id, status)?;
        match change.worker {
            WorkerDirective::None => {}
            WorkerDirective::Start => {
                if let Err(err) = self.lifecycle.start_worker(ticket_id).await {
                    warn!(%ticket_id, error = %err, "ticket is active without a worker");
                }
            }
            WorkerDirective::Stop(worker_id) => {
                if !self.lifecycle.stop_worker(&worker_id).await {
                    // Not tracked here, e.g. after a restart; drop the stale assignment.
                    self.repo.assign_worker(ticket_id, None)?;
                }
                self.notifier.worker_stopped(ticket_id);
            }
        }
        self.publish(ticket_id)
    }

    pub fn update_subtask_status(
        &self,
        ticket_id: &TicketId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
        status: SubtaskStatus,
        notes: Option<&str>,
    ) -> Result<(Ticket, SubtaskTransition), ServiceError> {
        let transition =
            self.repo
                .update_subtask_status(ticket_id, task_id, subtask_id, status, notes)?;
        if transition.escalated {
            warn!(
                %ticket_id,
                %subtask_id,
                rejections = transition.rejection_count,
                "subtask escalated"
            );
        }
        Ok((self.publish(ticket_id)?, transition))
    }

    pub fn reset_subtask(
        &self,
        ticket_id: &TicketId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
    ) -> Result<Ticket, ServiceError> {
        self.repo.reset_subtask(ticket_id, task_id, subtask_id)?;
        self.publish(ticket_id)
    }

    pub fn add_task(&self, ticket_id: &TicketId, task: NewTask) -> Result<Task, ServiceError> {
        if task.name.trim().is_empty() {
            return Err(ServiceError::InvalidInput {
                message: "task name must not be empty".to_string(),
            });
        }
        let task = self.repo.add_task(ticket_id, task)?;
        self.publish(ticket_id)?;
        Ok(task)
    }

    pub fn add_activity_log(&self, ticket_id: &TicketId, entry: &str) -> Result<(), ServiceError> {
        self.repo.add_activity_log(ticket_id, entry)?;
        self.publish(ticket_id)?;
        Ok(())
    }

    pub fn set_branch(&self, ticket_id: &TicketId, branch: &str) -> Result<Ticket, ServiceError> {
        self.repo.set_branch(ticket_id, branch)?;
        self.publish(ticket_id)
    }

    pub fn active_workers(&self) -> HashMap<WorkerId, WorkerHandle> {
        self.lifecycle.active_workers()
    }

    /// Stop workers that stopped reporting and publish their tickets.
    pub async fn reap_stale_workers(
        &self,
        heartbeats: &HashMap<TicketId, DateTime<Utc>>,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Vec<WorkerHandle> {
        let reaped = self.lifecycle.reap_stale(heartbeats, now, timeout).await;
        let tickets = reaped
            .iter()
            .map(|handle| handle.ticket_id.clone())
            .collect::<BTreeSet<_>>();
        for ticket_id in tickets {
            self.notifier.worker_stopped(&ticket_id);
            if let Err(err) = self.publish(&ticket_id) {
                warn!(%ticket_id, error = %err, "could not publish reaped ticket");
            }
        }
        reaped
    }

    fn publish(&self, ticket_id: &TicketId) -> Result<Ticket, ServiceError> {
        let ticket = self.repo.get_ticket(ticket_id)?;
        self.notifier.ticket_updated(&ticket);
        Ok(ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;
    use orch_core::{MemoryTicketStore, NewSubtask};
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl TicketNotifier for RecordingNotifier {
        fn ticket_created(&self, ticket: &Ticket) {
            self.events.lock().push(format!("created {}", ticket.id));
        }

        fn ticket_updated(&self, ticket: &Ticket) {
            self.events
                .lock()
                .push(format!("updated {} {}", ticket.id, ticket.status));
        }

        fn ticket_deleted(&self, ticket_id: &TicketId) {
            self.events.lock().push(format!("deleted {ticket_id}"));
        }

        fn worker_stopped(&self, ticket_id: &TicketId) {
            self.events.lock().push(format!("stopped {ticket_id}"));
        }
    }

    struct Fixture {
        service: TicketService,
        backend: Arc<FakeBackend>,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture_with(backend: FakeBackend) -> Fixture {
        let repo: Arc<dyn TicketRepository> = Arc::new(MemoryTicketStore::new());
        let backend = Arc::new(backend);
        let notifier = Arc::new(RecordingNotifier::default());
        let lifecycle = Arc::new(WorkerLifecycleController::new(
            repo.clone(),
            backend.clone(),
            "ws://127.0.0.1:9842/ws",
        ));
        Fixture {
            service: TicketService::new(repo, lifecycle, notifier.clone()),
            backend,
            notifier,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(FakeBackend::default())
    }

    #[test]
    fn create_ticket_rejects_blank_titles() {
        let fx = fixture();
        let err = fx.service.create_ticket("   ", "body").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput { .. }));

        let ticket = fx.service.create_ticket(" Login ", "").unwrap();
        assert_eq!(ticket.title, "Login");
        assert_eq!(fx.notifier.events(), vec![format!("created {}", ticket.id)]);
    }

    #[tokio::test]
    async fn activating_twice_starts_one_worker() {
        let fx = fixture();
        let ticket = fx.service.create_ticket("Search", "").unwrap();

        let active = fx
            .service
            .update_status(&ticket.id, TicketStatus::Active)
            .await
            .unwrap();
        assert!(active.worker_id.is_some());

        fx.service
            .update_status(&ticket.id, TicketStatus::Active)
            .await
            .unwrap();
        assert_eq!(fx.backend.launch_count(), 1);
        assert_eq!(fx.service.active_workers().len(), 1);
    }

    #[tokio::test]
    async fn moving_to_backlog_stops_and_releases_the_worker() {
        let fx = fixture();
        let ticket = fx.service.create_ticket("Search", "").unwrap();
        let active = fx
            .service
            .update_status(&ticket.id, TicketStatus::Active)
            .await
            .unwrap();
        let worker_id = active.worker_id.clone().unwrap();

        let parked = fx
            .service
            .update_status(&ticket.id, TicketStatus::Backlog)
            .await
            .unwrap();

        assert!(parked.worker_id.is_none());
        assert_eq!(fx.backend.terminated_ids(), vec![worker_id.to_string()]);
        assert!(fx
            .notifier
            .events()
            .contains(&format!("stopped {}", ticket.id)));
        assert!(fx.service.active_workers().is_empty());
        assert_eq!(
            fx.notifier.events().last().map(String::as_str),
            Some(format!("updated {} backlog", ticket.id).as_str())
        );
    }

    #[tokio::test]
    async fn launch_failure_keeps_the_ticket_active_and_unassigned() {
        let fx = fixture_with(FakeBackend::failing());
        let ticket = fx.service.create_ticket("Flaky", "").unwrap();

        let active = fx
            .service
            .update_status(&ticket.id, TicketStatus::Active)
            .await
            .unwrap();

        assert_eq!(active.status, TicketStatus::Active);
        assert!(active.worker_id.is_none());
        assert!(fx.service.active_workers().is_empty());
    }

    #[tokio::test]
    async fn update_status_on_missing_ticket_is_not_found() {
        let fx = fixture();
        let err = fx
            .service
            .update_status(&TicketId::new("TKT-404"), TicketStatus::Active)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(fx.backend.launch_count(), 0);
    }

    #[tokio::test]
    async fn delete_ticket_stops_its_worker_first() {
        let fx = fixture();
        let ticket = fx.service.create_ticket("Gone", "").unwrap();
        fx.service
            .update_status(&ticket.id, TicketStatus::Active)
            .await
            .unwrap();

        assert!(fx.service.delete_ticket(&ticket.id).await.unwrap());
        assert!(!fx.service.delete_ticket(&ticket.id).await.unwrap());

        assert_eq!(fx.backend.terminated_ids().len(), 1);
        assert_eq!(
            fx.notifier.events().last().map(String::as_str),
            Some(format!("deleted {}", ticket.id).as_str())
        );
    }

    #[test]
    fn subtask_updates_are_published() {
        let fx = fixture();
        let ticket = fx.service.create_ticket("Tasks", "").unwrap();
        let task = fx
            .service
            .add_task(
                &ticket.id,
                NewTask {
                    name: "API".to_string(),
                    description: String::new(),
                    subtasks: vec![NewSubtask {
                        name: "Route".to_string(),
                        description: String::new(),
                    }],
                },
            )
            .unwrap();

        let (updated, transition) = fx
            .service
            .update_subtask_status(
                &ticket.id,
                &task.id,
                &task.subtasks[0].id,
                SubtaskStatus::InProgress,
                None,
            )
            .unwrap();

        assert_eq!(transition.to, SubtaskStatus::InProgress);
        assert_eq!(updated.tasks[0].subtasks[0].status, SubtaskStatus::InProgress);
        assert_eq!(fx.notifier.events().len(), 3);
    }

    #[tokio::test]
    async fn reaping_publishes_affected_tickets() {
        let fx = fixture();
        let ticket = fx.service.create_ticket("Silent", "").unwrap();
        fx.service
            .update_status(&ticket.id, TicketStatus::Active)
            .await
            .unwrap();
        let before = fx.notifier.events().len();

        let reaped = fx
            .service
            .reap_stale_workers(
                &HashMap::new(),
                Utc::now() + Duration::seconds(600),
                Duration::seconds(120),
            )
            .await;

        assert_eq!(reaped.len(), 1);
        let events = fx.notifier.events();
        assert_eq!(
            &events[before..],
            &[
                format!("stopped {}", ticket.id),
                format!("updated {} active", ticket.id)
            ]
        );
        assert!(fx
            .service
            .get_ticket(&ticket.id)
            .unwrap()
            .worker_id
            .is_none());
    }
}
