//! Ticket, task and subtask entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EntityKind, TicketError};
use crate::state::{SubtaskStatus, TicketStatus};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(TicketId);
string_id!(TaskId);
string_id!(SubtaskId);
string_id!(
    /// Identifier of an ephemeral worker launched for one ticket.
    WorkerId
);
string_id!(
    /// Unique within a ticket, not globally.
    ConversationId
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,
    pub name: String,
    pub description: String,
    pub status: SubtaskStatus,
    pub rejection_count: u32,
    pub last_rejection_notes: Option<String>,
}

impl Subtask {
    pub fn new(id: SubtaskId, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            status: SubtaskStatus::Incomplete,
            rejection_count: 0,
            last_rejection_notes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    pub subtasks: Vec<Subtask>,
}

/// Input for `TicketRepository::add_task`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub subtasks: Vec<NewSubtask>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewSubtask {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub branch_name: Option<String>,
    pub tasks: Vec<Task>,
    /// Append-only, oldest first.
    pub activity_log: Vec<String>,
    pub worker_id: Option<WorkerId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn new(id: TicketId, title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            description: description.into(),
            status: TicketStatus::Backlog,
            branch_name: None,
            tasks: Vec::new(),
            activity_log: Vec::new(),
            worker_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn task(&self, task_id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| &task.id == task_id)
    }

    pub fn subtask(&self, task_id: &TaskId, subtask_id: &SubtaskId) -> Option<&Subtask> {
        self.task(task_id)?
            .subtasks
            .iter()
            .find(|subtask| &subtask.id == subtask_id)
    }

    pub fn subtask_mut(
        &mut self,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
    ) -> Result<&mut Subtask, TicketError> {
        let task = self
            .tasks
            .iter_mut()
            .find(|task| &task.id == task_id)
            .ok_or_else(|| TicketError::NotFound {
                kind: EntityKind::Task,
                id: task_id.to_string(),
            })?;
        task.subtasks
            .iter_mut()
            .find(|subtask| &subtask.id == subtask_id)
            .ok_or_else(|| TicketError::NotFound {
                kind: EntityKind::Subtask,
                id: subtask_id.to_string(),
            })
    }

    /// Every subtask across every task, in board order.
    pub fn subtasks(&self) -> impl Iterator<Item = (&Task, &Subtask)> {
        self.tasks
            .iter()
            .flat_map(|task| task.subtasks.iter().map(move |subtask| (task, subtask)))
    }

    /// True iff every subtask is Complete. A ticket without subtasks is
    /// vacuously complete.
    pub fn all_subtasks_complete(&self) -> bool {
        self.subtasks()
            .all(|(_, subtask)| subtask.status == SubtaskStatus::Complete)
    }

    pub fn push_activity(&mut self, entry: impl AsRef<str>) {
        let now = Utc::now();
        self.activity_log.push(format!(
            "[{}] {}",
            now.format("%Y-%m-%d %H:%M:%S"),
            entry.as_ref()
        ));
        self.updated_at = now;
    }

    /// Appends a task built from `new_task`, numbering ids after the
    /// existing ones so they stay unique within the ticket.
    pub fn add_task(&mut self, new_task: NewTask) -> Task {
        let task_id = TaskId::new(format!("task-{}", self.tasks.len() + 1));
        let subtask_offset = self.subtasks().count();
        let subtasks = new_task
            .subtasks
            .into_iter()
            .enumerate()
            .map(|(idx, sub)| {
                Subtask::new(
                    SubtaskId::new(format!("sub-{}", subtask_offset + idx + 1)),
                    sub.name,
                    sub.description,
                )
            })
            .collect();
        let task = Task {
            id: task_id,
            name: new_task.name,
            description: new_task.description,
            subtasks,
        };
        self.push_activity(format!(
            "Task added: {} ({} subtasks)",
            task.name,
            task.subtasks.len()
        ));
        self.tasks.push(task.clone());
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket_with_subtasks(statuses: &[SubtaskStatus]) -> Ticket {
        let mut ticket = Ticket::new(TicketId::new("TKT-1"), "Login page", "Build it");
        ticket.add_task(NewTask {
            name: "UI".to_string(),
            description: String::new(),
            subtasks: statuses
                .iter()
                .map(|_| NewSubtask {
                    name: "step".to_string(),
                    description: String::new(),
                })
                .collect(),
        });
        for (subtask, status) in ticket.tasks[0].subtasks.iter_mut().zip(statuses) {
            subtask.status = *status;
        }
        ticket
    }

    #[test]
    fn ticket_without_subtasks_is_vacuously_complete() {
        let ticket = Ticket::new(TicketId::new("TKT-1"), "Empty", "");
        assert!(ticket.all_subtasks_complete());

        let ticket = ticket_with_subtasks(&[]);
        assert!(ticket.all_subtasks_complete());
    }

    #[test]
    fn any_unfinished_subtask_makes_ticket_incomplete() {
        let done = ticket_with_subtasks(&[SubtaskStatus::Complete, SubtaskStatus::Complete]);
        assert!(done.all_subtasks_complete());

        let blocked = ticket_with_subtasks(&[SubtaskStatus::Complete, SubtaskStatus::Blocked]);
        assert!(!blocked.all_subtasks_complete());

        let review = ticket_with_subtasks(&[SubtaskStatus::AwaitingReview]);
        assert!(!review.all_subtasks_complete());
    }

    #[test]
    fn add_task_numbers_subtasks_across_tasks() {
        let mut ticket = ticket_with_subtasks(&[SubtaskStatus::Incomplete, SubtaskStatus::Incomplete]);
        let task = ticket.add_task(NewTask {
            name: "API".to_string(),
            description: "endpoints".to_string(),
            subtasks: vec![NewSubtask {
                name: "route".to_string(),
                description: String::new(),
            }],
        });

        assert_eq!(task.id, TaskId::new("task-2"));
        assert_eq!(task.subtasks[0].id, SubtaskId::new("sub-3"));
        assert_eq!(ticket.tasks.len(), 2);
        assert!(ticket.activity_log.last().unwrap().contains("Task added: API"));
    }

    #[test]
    fn subtask_mut_reports_which_entity_is_missing() {
        let mut ticket = ticket_with_subtasks(&[SubtaskStatus::Incomplete]);

        let err = ticket
            .subtask_mut(&TaskId::new("task-9"), &SubtaskId::new("sub-1"))
            .unwrap_err();
        assert!(matches!(err, TicketError::NotFound { kind: EntityKind::Task, .. }));

        let err = ticket
            .subtask_mut(&TaskId::new("task-1"), &SubtaskId::new("sub-9"))
            .unwrap_err();
        assert!(matches!(err, TicketError::NotFound { kind: EntityKind::Subtask, .. }));
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&TicketId::new("TKT-7")).unwrap();
        assert_eq!(json, "\"TKT-7\"");
    }
}
