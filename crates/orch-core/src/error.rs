use serde::{Deserialize, Serialize};

use crate::state::SubtaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Ticket,
    Task,
    Subtask,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EntityKind::Ticket => "ticket",
            EntityKind::Task => "task",
            EntityKind::Subtask => "subtask",
        })
    }
}

/// Serializes as `{ "code": "not_found", ... }` so remote callers get the
/// same variant back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum TicketError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },
    #[error("invalid subtask transition: {from} -> {to}")]
    InvalidTransition {
        from: SubtaskStatus,
        to: SubtaskStatus,
    },
    #[error("ticket storage error: {message}")]
    Storage { message: String },
}

impl TicketError {
    pub fn ticket_not_found(id: impl std::fmt::Display) -> Self {
        TicketError::NotFound {
            kind: EntityKind::Ticket,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TicketError::NotFound { .. })
    }
}
