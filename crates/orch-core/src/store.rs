//! Ticket persistence surface and the in-memory implementation.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{EntityKind, TicketError};
use crate::state::{SubtaskStatus, TicketStatus};
use crate::state_machine::{
    apply_subtask_status, apply_ticket_status, describe_transition, reset_subtask, StatusChange,
    SubtaskTransition,
};
use crate::types::{NewTask, SubtaskId, Task, TaskId, Ticket, TicketId, WorkerId};

/// Mutation surface the orchestrator, lifecycle controller and coordinator
/// share. Tickets are only ever changed through these operations.
pub trait TicketRepository: Send + Sync {
    fn create_ticket(&self, title: &str, description: &str) -> Result<Ticket, TicketError>;
    fn get_ticket(&self, ticket_id: &TicketId) -> Result<Ticket, TicketError>;
    fn list_tickets(&self) -> Result<Vec<Ticket>, TicketError>;
    fn delete_ticket(&self, ticket_id: &TicketId) -> Result<bool, TicketError>;
    fn update_status(
        &self,
        ticket_id: &TicketId,
        status: TicketStatus,
    ) -> Result<StatusChange, TicketError>;
    fn update_subtask_status(
        &self,
        ticket_id: &TicketId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
        status: SubtaskStatus,
        notes: Option<&str>,
    ) -> Result<SubtaskTransition, TicketError>;
    fn add_activity_log(&self, ticket_id: &TicketId, entry: &str) -> Result<(), TicketError>;
    fn add_task(&self, ticket_id: &TicketId, task: NewTask) -> Result<Task, TicketError>;
    fn assign_worker(
        &self,
        ticket_id: &TicketId,
        worker_id: Option<WorkerId>,
    ) -> Result<(), TicketError>;
    fn set_branch(&self, ticket_id: &TicketId, branch: &str) -> Result<(), TicketError>;
    fn reset_subtask(
        &self,
        ticket_id: &TicketId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
    ) -> Result<(), TicketError>;
}

/// Apply a subtask status and record it in the activity log.
pub fn record_subtask_status(
    ticket: &mut Ticket,
    task_id: &TaskId,
    subtask_id: &SubtaskId,
    status: SubtaskStatus,
    notes: Option<&str>,
) -> Result<SubtaskTransition, TicketError> {
    let subtask = ticket.subtask_mut(task_id, subtask_id)?;
    let transition = apply_subtask_status(subtask, status, notes)?;
    let line = describe_transition(&subtask.name, &transition, notes);
    ticket.push_activity(line);
    Ok(transition)
}

/// Reset a subtask and record the intervention in the activity log.
pub fn record_subtask_reset(
    ticket: &mut Ticket,
    task_id: &TaskId,
    subtask_id: &SubtaskId,
) -> Result<(), TicketError> {
    let subtask = ticket.subtask_mut(task_id, subtask_id)?;
    let from = reset_subtask(subtask);
    let line = format!("{}: {from} -> incomplete (reset)", subtask.name);
    ticket.push_activity(line);
    Ok(())
}

/// Record a worker assignment change.
pub fn record_worker_assignment(ticket: &mut Ticket, worker_id: Option<WorkerId>) {
    match (&ticket.worker_id, &worker_id) {
        (_, Some(worker)) => ticket.push_activity(format!("Worker assigned: {worker}")),
        (Some(previous), None) => ticket.push_activity(format!("Worker released: {previous}")),
        (None, None) => {}
    }
    ticket.worker_id = worker_id;
}

/// Process-local ticket store. Each ticket sits behind its own lock so
/// mutations on one ticket never wait on another.
#[derive(Debug, Default)]
pub struct MemoryTicketStore {
    tickets: RwLock<HashMap<TicketId, Arc<Mutex<Ticket>>>>,
    counter: AtomicU64,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed ticket, replacing any ticket with the same id.
    pub fn insert(&self, ticket: Ticket) {
        self.tickets
            .write()
            .insert(ticket.id.clone(), Arc::new(Mutex::new(ticket)));
    }

    fn slot(&self, ticket_id: &TicketId) -> Result<Arc<Mutex<Ticket>>, TicketError> {
        self.tickets
            .read()
            .get(ticket_id)
            .cloned()
            .ok_or_else(|| TicketError::ticket_not_found(ticket_id))
    }

    fn with_ticket_mut<R>(
        &self,
        ticket_id: &TicketId,
        f: impl FnOnce(&mut Ticket) -> Result<R, TicketError>,
    ) -> Result<R, TicketError> {
        let slot = self.slot(ticket_id)?;
        let mut ticket = slot.lock();
        f(&mut ticket)
    }

    fn next_ticket_id(&self) -> TicketId {
        let id = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        TicketId::new(format!("TKT-{id}"))
    }
}

impl TicketRepository for MemoryTicketStore {
    fn create_ticket(&self, title: &str, description: &str) -> Result<Ticket, TicketError> {
        let mut ticket = Ticket::new(self.next_ticket_id(), title, description);
        ticket.push_activity("Ticket created");
        self.insert(ticket.clone());
        Ok(ticket)
    }

    fn get_ticket(&self, ticket_id: &TicketId) -> Result<Ticket, TicketError> {
        let slot = self.slot(ticket_id)?;
        let ticket = slot.lock().clone();
        Ok(ticket)
    }

    fn list_tickets(&self) -> Result<Vec<Ticket>, TicketError> {
        let slots = self.tickets.read().values().cloned().collect::<Vec<_>>();
        let mut tickets = slots
            .iter()
            .map(|slot| slot.lock().clone())
            .collect::<Vec<_>>();
        tickets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tickets)
    }

    fn delete_ticket(&self, ticket_id: &TicketId) -> Result<bool, TicketError> {
        Ok(self.tickets.write().remove(ticket_id).is_some())
    }

    fn update_status(
        &self,
        ticket_id: &TicketId,
        status: TicketStatus,
    ) -> Result<StatusChange, TicketError> {
        self.with_ticket_mut(ticket_id, |ticket| Ok(apply_ticket_status(ticket, status)))
    }

    fn update_subtask_status(
        &self,
        ticket_id: &TicketId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
        status: SubtaskStatus,
        notes: Option<&str>,
    ) -> Result<SubtaskTransition, TicketError> {
        self.with_ticket_mut(ticket_id, |ticket| {
            record_subtask_status(ticket, task_id, subtask_id, status, notes)
        })
    }

    fn add_activity_log(&self, ticket_id: &TicketId, entry: &str) -> Result<(), TicketError> {
        self.with_ticket_mut(ticket_id, |ticket| {
            ticket.push_activity(entry);
            Ok(())
        })
    }

    fn add_task(&self, ticket_id: &TicketId, task: NewTask) -> Result<Task, TicketError> {
        self.with_ticket_mut(ticket_id, |ticket| Ok(ticket.add_task(task)))
    }

    fn assign_worker(
        &self,
        ticket_id: &TicketId,
        worker_id: Option<WorkerId>,
    ) -> Result<(), TicketError> {
        self.with_ticket_mut(ticket_id, |ticket| {
            record_worker_assignment(ticket, worker_id);
            Ok(())
        })
    }

    fn set_branch(&self, ticket_id: &TicketId, branch: &str) -> Result<(), TicketError> {
        self.with_ticket_mut(ticket_id, |ticket| {
            ticket.branch_name = Some(branch.to_string());
            ticket.push_activity(format!("Branch set: {branch}"));
            Ok(())
        })
    }

    fn reset_subtask(
        &self,
        ticket_id: &TicketId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
    ) -> Result<(), TicketError> {
        self.with_ticket_mut(ticket_id, |ticket| {
            record_subtask_reset(ticket, task_id, subtask_id)
        })
    }
}

/// Lookup helper for callers that only hold ids.
pub fn require_subtask<'a>(
    ticket: &'a Ticket,
    task_id: &TaskId,
    subtask_id: &SubtaskId,
) -> Result<&'a crate::types::Subtask, TicketError> {
    ticket
        .subtask(task_id, subtask_id)
        .ok_or_else(|| TicketError::NotFound {
            kind: EntityKind::Subtask,
            id: subtask_id.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::WorkerDirective;
    use crate::types::NewSubtask;

    fn store_with_ticket() -> (MemoryTicketStore, TicketId) {
        let store = MemoryTicketStore::new();
        let ticket = store.create_ticket("Checkout", "Add checkout flow").unwrap();
        store
            .add_task(
                &ticket.id,
                NewTask {
                    name: "Backend".to_string(),
                    description: String::new(),
                    subtasks: vec![NewSubtask {
                        name: "Cart endpoint".to_string(),
                        description: String::new(),
                    }],
                },
            )
            .unwrap();
        (store, ticket.id)
    }

    #[test]
    fn missing_ticket_is_not_found() {
        let store = MemoryTicketStore::new();
        let missing = TicketId::new("TKT-404");
        assert!(store.get_ticket(&missing).unwrap_err().is_not_found());
        assert!(store
            .update_status(&missing, TicketStatus::Active)
            .unwrap_err()
            .is_not_found());
        assert!(store.add_activity_log(&missing, "x").unwrap_err().is_not_found());
    }

    #[test]
    fn create_ticket_assigns_sequential_ids() {
        let store = MemoryTicketStore::new();
        let first = store.create_ticket("a", "").unwrap();
        let second = store.create_ticket("b", "").unwrap();
        assert_eq!(first.id, TicketId::new("TKT-1"));
        assert_eq!(second.id, TicketId::new("TKT-2"));
        assert_eq!(first.status, TicketStatus::Backlog);
        assert_eq!(store.list_tickets().unwrap().len(), 2);
    }

    #[test]
    fn update_subtask_status_logs_activity() {
        let (store, ticket_id) = store_with_ticket();
        let transition = store
            .update_subtask_status(
                &ticket_id,
                &TaskId::new("task-1"),
                &SubtaskId::new("sub-1"),
                SubtaskStatus::InProgress,
                None,
            )
            .unwrap();
        assert_eq!(transition.to, SubtaskStatus::InProgress);

        let ticket = store.get_ticket(&ticket_id).unwrap();
        assert!(ticket
            .activity_log
            .last()
            .unwrap()
            .ends_with("Cart endpoint: incomplete -> in_progress"));
    }

    #[test]
    fn invalid_subtask_transition_leaves_ticket_untouched() {
        let (store, ticket_id) = store_with_ticket();
        let before = store.get_ticket(&ticket_id).unwrap();
        let err = store
            .update_subtask_status(
                &ticket_id,
                &TaskId::new("task-1"),
                &SubtaskId::new("sub-1"),
                SubtaskStatus::Complete,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, TicketError::InvalidTransition { .. }));
        assert_eq!(store.get_ticket(&ticket_id).unwrap(), before);
    }

    #[test]
    fn update_status_signals_worker_directives() {
        let (store, ticket_id) = store_with_ticket();
        let change = store.update_status(&ticket_id, TicketStatus::Active).unwrap();
        assert_eq!(change.worker, WorkerDirective::Start);

        store
            .assign_worker(&ticket_id, Some(WorkerId::new("worker-1")))
            .unwrap();
        let change = store.update_status(&ticket_id, TicketStatus::Active).unwrap();
        assert_eq!(change.worker, WorkerDirective::None);

        let change = store.update_status(&ticket_id, TicketStatus::Backlog).unwrap();
        assert_eq!(change.worker, WorkerDirective::Stop(WorkerId::new("worker-1")));
    }

    #[test]
    fn assign_and_release_worker_are_logged() {
        let (store, ticket_id) = store_with_ticket();
        store
            .assign_worker(&ticket_id, Some(WorkerId::new("worker-1")))
            .unwrap();
        store.assign_worker(&ticket_id, None).unwrap();
        let ticket = store.get_ticket(&ticket_id).unwrap();
        assert_eq!(ticket.worker_id, None);
        let log = ticket.activity_log.join("\n");
        assert!(log.contains("Worker assigned: worker-1"));
        assert!(log.contains("Worker released: worker-1"));
    }

    #[test]
    fn reset_subtask_unblocks() {
        let (store, ticket_id) = store_with_ticket();
        let task_id = TaskId::new("task-1");
        let subtask_id = SubtaskId::new("sub-1");
        store
            .update_subtask_status(&ticket_id, &task_id, &subtask_id, SubtaskStatus::Blocked, None)
            .unwrap();
        store.reset_subtask(&ticket_id, &task_id, &subtask_id).unwrap();

        let ticket = store.get_ticket(&ticket_id).unwrap();
        let subtask = require_subtask(&ticket, &task_id, &subtask_id).unwrap();
        assert_eq!(subtask.status, SubtaskStatus::Incomplete);
    }

    #[test]
    fn delete_ticket_reports_presence() {
        let (store, ticket_id) = store_with_ticket();
        assert!(store.delete_ticket(&ticket_id).unwrap());
        assert!(!store.delete_ticket(&ticket_id).unwrap());
    }

    #[test]
    fn tickets_are_mutated_independently_across_threads() {
        let store = Arc::new(MemoryTicketStore::new());
        let ids = (0..8)
            .map(|n| store.create_ticket(&format!("t{n}"), "").unwrap().id)
            .collect::<Vec<_>>();

        let handles = ids
            .iter()
            .cloned()
            .map(|id| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for n in 0..50 {
                        store.add_activity_log(&id, &format!("entry {n}")).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        for id in ids {
            // "Ticket created" plus fifty entries.
            assert_eq!(store.get_ticket(&id).unwrap().activity_log.len(), 51);
        }
    }
}
