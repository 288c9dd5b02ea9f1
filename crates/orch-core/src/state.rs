//! Ticket and subtask status values.

use serde::{Deserialize, Serialize};

/// Board-level lifecycle of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    Backlog,
    /// A worker is (or should be) running the orchestration loop.
    Active,
    /// Needs a human before anything else happens.
    Blocked,
    Done,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Backlog => "backlog",
            TicketStatus::Active => "active",
            TicketStatus::Blocked => "blocked",
            TicketStatus::Done => "done",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TicketStatus::Done)
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match normalize_tag(value).as_str() {
            "backlog" => Ok(TicketStatus::Backlog),
            "active" => Ok(TicketStatus::Active),
            "blocked" => Ok(TicketStatus::Blocked),
            "done" => Ok(TicketStatus::Done),
            other => Err(format!(
                "invalid ticket status '{other}'. valid values: backlog, active, blocked, done"
            )),
        }
    }
}

/// Per-subtask progress through the manager/developer review cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    #[default]
    Incomplete,
    InProgress,
    AwaitingReview,
    Complete,
    Rejected,
    /// Terminal until a human resets the subtask.
    Blocked,
}

impl SubtaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubtaskStatus::Incomplete => "incomplete",
            SubtaskStatus::InProgress => "in_progress",
            SubtaskStatus::AwaitingReview => "awaiting_review",
            SubtaskStatus::Complete => "complete",
            SubtaskStatus::Rejected => "rejected",
            SubtaskStatus::Blocked => "blocked",
        }
    }

    /// Whether the orchestrator may still pick this subtask up.
    pub fn is_actionable(self) -> bool {
        !matches!(self, SubtaskStatus::Complete | SubtaskStatus::Blocked)
    }
}

impl std::fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubtaskStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match normalize_tag(value).as_str() {
            "incomplete" => Ok(SubtaskStatus::Incomplete),
            "in_progress" | "inprogress" => Ok(SubtaskStatus::InProgress),
            "awaiting_review" | "awaitingreview" => Ok(SubtaskStatus::AwaitingReview),
            "complete" | "completed" | "approved" => Ok(SubtaskStatus::Complete),
            "rejected" => Ok(SubtaskStatus::Rejected),
            "blocked" => Ok(SubtaskStatus::Blocked),
            other => Err(format!(
                "invalid subtask status '{other}'. valid values: incomplete, in_progress, \
                 awaiting_review, complete, rejected, blocked"
            )),
        }
    }
}

fn normalize_tag(value: &str) -> String {
    value.trim().to_lowercase().replace(['-', ' '], "_")
}
