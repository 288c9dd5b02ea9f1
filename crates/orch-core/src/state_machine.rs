//! Subtask review cycle and ticket status changes.
//!
//! ```text
//! Incomplete -> InProgress -> AwaitingReview -> Complete
//!                   |   ^            |
//!                   |   +--------- Rejected --(3rd rejection)--> Blocked
//!                   +--------------------------------------------> Blocked
//! ```

use serde::{Deserialize, Serialize};

use crate::error::TicketError;
use crate::state::{SubtaskStatus, TicketStatus};
use crate::types::{Subtask, Ticket, WorkerId};

/// Rejections after which a subtask is forced to Blocked.
pub const MAX_REJECTIONS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskTransition {
    pub from: SubtaskStatus,
    pub requested: SubtaskStatus,
    /// Differs from `requested` only on escalation.
    pub to: SubtaskStatus,
    pub rejection_count: u32,
    pub escalated: bool,
}

/// What the caller of `update_status` must do about the ticket's worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "worker_id")]
pub enum WorkerDirective {
    None,
    Start,
    Stop(WorkerId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: TicketStatus,
    pub to: TicketStatus,
    pub worker: WorkerDirective,
}

/// Check whether `requested` may be applied to a subtask currently in `from`.
pub fn is_transition_allowed(from: SubtaskStatus, requested: SubtaskStatus) -> bool {
    use SubtaskStatus::*;

    // Rejected -> Rejected still counts as another rejection.
    if from == requested {
        return true;
    }

    match (from, requested) {
        (Incomplete, InProgress) => true,
        (Rejected, InProgress) => true,
        (InProgress, AwaitingReview) => true,
        (AwaitingReview, Complete) => true,
        (AwaitingReview, Rejected) => true,
        (Complete | Blocked, _) => false,
        (_, Blocked) => true,
        _ => false,
    }
}

/// Apply a requested status to a subtask, enforcing the rejection rule.
pub fn apply_subtask_status(
    subtask: &mut Subtask,
    requested: SubtaskStatus,
    notes: Option<&str>,
) -> Result<SubtaskTransition, TicketError> {
    let from = subtask.status;
    if !is_transition_allowed(from, requested) {
        return Err(TicketError::InvalidTransition {
            from,
            to: requested,
        });
    }

    let mut to = requested;
    let mut escalated = false;
    match requested {
        SubtaskStatus::Complete => {
            subtask.rejection_count = 0;
        }
        SubtaskStatus::Rejected => {
            subtask.rejection_count += 1;
            subtask.last_rejection_notes = notes
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string);
            if subtask.rejection_count >= MAX_REJECTIONS {
                to = SubtaskStatus::Blocked;
                escalated = true;
            }
        }
        _ => {}
    }
    subtask.status = to;

    Ok(SubtaskTransition {
        from,
        requested,
        to,
        rejection_count: subtask.rejection_count,
        escalated,
    })
}

/// Activity-log line for an applied subtask transition.
pub fn describe_transition(
    subtask_name: &str,
    transition: &SubtaskTransition,
    notes: Option<&str>,
) -> String {
    let mut line = if transition.escalated {
        format!(
            "ESCALATION {subtask_name}: {} -> {} after {} rejections",
            transition.from, transition.to, transition.rejection_count
        )
    } else {
        format!("{subtask_name}: {} -> {}", transition.from, transition.to)
    };
    if let Some(notes) = notes.map(str::trim).filter(|value| !value.is_empty()) {
        line.push_str(" - ");
        line.push_str(notes);
    }
    line
}

/// Apply a board status to a ticket and work out the worker directive.
///
/// Moving into Active while a worker is assigned changes nothing.
pub fn apply_ticket_status(ticket: &mut Ticket, to: TicketStatus) -> StatusChange {
    let from = ticket.status;
    let worker = match to {
        TicketStatus::Active if ticket.worker_id.is_some() => {
            return StatusChange {
                from,
                to: from,
                worker: WorkerDirective::None,
            };
        }
        TicketStatus::Active => WorkerDirective::Start,
        TicketStatus::Backlog => match &ticket.worker_id {
            Some(worker_id) => WorkerDirective::Stop(worker_id.clone()),
            None => WorkerDirective::None,
        },
        TicketStatus::Blocked | TicketStatus::Done => WorkerDirective::None,
    };

    ticket.status = to;
    if from != to {
        ticket.push_activity(format!("Status: {from} -> {to}"));
    }
    StatusChange { from, to, worker }
}

/// Human intervention: put a subtask back to Incomplete with a clean slate.
pub fn reset_subtask(subtask: &mut Subtask) -> SubtaskStatus {
    let from = subtask.status;
    subtask.status = SubtaskStatus::Incomplete;
    subtask.rejection_count = 0;
    subtask.last_rejection_notes = None;
    from
}
