//! Per-ticket Manager/Developer state machine.
//!
//! Exactly one role is active at a time. The manager picks a subtask, hands it
//! to the developer, and reviews the result; the developer reports back and
//! control returns to the manager. All ticket mutations go through the
//! injected `TicketRepository`.

use orch_core::{
    SubtaskStatus, SubtaskTransition, TicketError, TicketId, TicketRepository, TicketStatus,
    ToolCall,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::AgentError;
use crate::types::{
    DeveloperMode, DeveloperResult, ManagerAssignment, ReportedStatus, RoleKind, SubtaskRef,
    ToolInvocation, ASSIGN_TO_DEVELOPER, COMPLETE_TICKET, SUBTASK_COMPLETE, UPDATE_SUBTASK,
};

/// The active role, carrying only what that role works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Manager {
        last_assignment: Option<ManagerAssignment>,
        last_result: Option<DeveloperResult>,
    },
    Developer {
        assignment: ManagerAssignment,
    },
}

impl Role {
    fn fresh_manager() -> Self {
        Self::Manager {
            last_assignment: None,
            last_result: None,
        }
    }

    pub fn kind(&self) -> RoleKind {
        match self {
            Self::Manager { .. } => RoleKind::Manager,
            Self::Developer { .. } => RoleKind::Developer,
        }
    }
}

/// Result of a tool call. Context and argument problems are reported here
/// rather than as errors so the run loop can feed them back to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Assigned {
        subtask: SubtaskRef,
        mode: DeveloperMode,
    },
    SubtaskUpdated(SubtaskTransition),
    ResultRecorded(SubtaskTransition),
    TicketCompleted,
    NoCurrentSubtask {
        tool: &'static str,
    },
    TransitionRefused {
        tool: &'static str,
        message: String,
    },
    MissingArgument {
        tool: &'static str,
        field: &'static str,
    },
    WrongRole {
        tool: &'static str,
        active: RoleKind,
    },
    UnknownTool {
        name: String,
    },
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        !matches!(
            self,
            Self::Assigned { .. }
                | Self::SubtaskUpdated(_)
                | Self::ResultRecorded(_)
                | Self::TicketCompleted
        )
    }

    pub fn switches_role(&self) -> bool {
        matches!(self, Self::Assigned { .. } | Self::ResultRecorded(_))
    }

    /// Text returned to the model as the tool result.
    pub fn describe(&self) -> String {
        match self {
            Self::Assigned { subtask, mode } => format!(
                "Subtask {} assigned to the developer ({mode}).",
                subtask.subtask_id
            ),
            Self::SubtaskUpdated(transition) if transition.escalated => format!(
                "Subtask rejected {} times and escalated to blocked; it needs human attention.",
                transition.rejection_count
            ),
            Self::SubtaskUpdated(transition) => {
                format!("Subtask is now {}.", transition.to)
            }
            Self::ResultRecorded(transition) => {
                format!("Result recorded; subtask is now {}.", transition.to)
            }
            Self::TicketCompleted => "Ticket marked done.".to_string(),
            Self::NoCurrentSubtask { tool } => {
                format!("{tool} ignored: there is no current subtask.")
            }
            Self::TransitionRefused { tool, message } => format!("{tool} refused: {message}"),
            Self::MissingArgument { tool, field } => {
                format!("{tool} needs a valid '{field}' argument.")
            }
            Self::WrongRole { tool, active } => {
                format!("{tool} is not available to the {active}.")
            }
            Self::UnknownTool { name } => format!("Unknown tool '{name}'."),
        }
    }
}

pub struct Orchestrator {
    repo: Arc<dyn TicketRepository>,
    ticket_id: TicketId,
    role: Role,
    current: Option<SubtaskRef>,
    iterations: u32,
    finished: bool,
}

impl Orchestrator {
    pub fn new(repo: Arc<dyn TicketRepository>, ticket_id: TicketId) -> Self {
        Self {
            repo,
            ticket_id,
            role: Role::fresh_manager(),
            current: None,
            iterations: 0,
            finished: false,
        }
    }

    pub fn ticket_id(&self) -> &TicketId {
        &self.ticket_id
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn current_agent(&self) -> RoleKind {
        self.role.kind()
    }

    pub fn current_subtask(&self) -> Option<&SubtaskRef> {
        self.current.as_ref()
    }

    /// Mode of the active assignment, or of the last one while the manager
    /// reviews it.
    pub fn current_developer_mode(&self) -> Option<DeveloperMode> {
        match &self.role {
            Role::Developer { assignment } => Some(assignment.mode),
            Role::Manager {
                last_assignment, ..
            } => last_assignment.as_ref().map(|assignment| assignment.mode),
        }
    }

    /// Turns spent on the current subtask.
    pub fn iteration_count(&self) -> u32 {
        self.iterations
    }

    pub fn record_iteration(&mut self) -> u32 {
        self.iterations += 1;
        self.iterations
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn all_subtasks_complete(&self) -> Result<bool, AgentError> {
        Ok(self.repo.get_ticket(&self.ticket_id)?.all_subtasks_complete())
    }

    /// Point at the first subtask in board order that is neither Complete
    /// nor Blocked. Leaves the selection alone while the developer works.
    pub fn select_next_subtask(&mut self) -> Result<Option<SubtaskRef>, AgentError> {
        if let Role::Developer { .. } = self.role {
            return Ok(self.current.clone());
        }

        let ticket = self.repo.get_ticket(&self.ticket_id)?;
        let next = ticket
            .subtasks()
            .find(|(_, subtask)| subtask.status.is_actionable())
            .map(|(task, subtask)| SubtaskRef {
                task_id: task.id.clone(),
                subtask_id: subtask.id.clone(),
            });

        if next != self.current {
            self.iterations = 0;
        }
        self.current = next.clone();
        Ok(next)
    }

    pub fn handle(&mut self, call: &ToolCall) -> Result<ToolOutcome, AgentError> {
        match ToolInvocation::decode(call) {
            Some(invocation) => self.dispatch(invocation),
            None => {
                warn!(ticket_id = %self.ticket_id, tool = %call.name, "unknown tool requested");
                Ok(ToolOutcome::UnknownTool {
                    name: call.name.clone(),
                })
            }
        }
    }

    pub fn dispatch(&mut self, invocation: ToolInvocation) -> Result<ToolOutcome, AgentError> {
        match invocation {
            ToolInvocation::AssignToDeveloper(assignment) => self.assign_to_developer(assignment),
            ToolInvocation::UpdateSubtask { status, notes } => {
                self.update_subtask(status, notes.as_deref())
            }
            ToolInvocation::CompleteTicket { summary } => self.complete_ticket(&summary),
            ToolInvocation::SubtaskComplete(result) => self.subtask_complete(result),
        }
    }

    pub fn assign_to_developer(
        &mut self,
        assignment: ManagerAssignment,
    ) -> Result<ToolOutcome, AgentError> {
        if !matches!(self.role, Role::Manager { .. }) {
            return Ok(self.wrong_role(ASSIGN_TO_DEVELOPER));
        }
        let Some(subtask) = self.current.clone() else {
            return Ok(self.no_current_subtask(ASSIGN_TO_DEVELOPER));
        };

        if let Err(err) = self.set_subtask_status(&subtask, SubtaskStatus::InProgress, None) {
            return self.refused(ASSIGN_TO_DEVELOPER, err);
        }

        let mode = assignment.mode;
        info!(
            ticket_id = %self.ticket_id,
            subtask_id = %subtask.subtask_id,
            mode = %mode,
            "subtask assigned to developer"
        );
        self.role = Role::Developer { assignment };
        Ok(ToolOutcome::Assigned { subtask, mode })
    }

    pub fn update_subtask(
        &mut self,
        status: Option<SubtaskStatus>,
        notes: Option<&str>,
    ) -> Result<ToolOutcome, AgentError> {
        if !matches!(self.role, Role::Manager { .. }) {
            return Ok(self.wrong_role(UPDATE_SUBTASK));
        }
        let Some(subtask) = self.current.clone() else {
            return Ok(self.no_current_subtask(UPDATE_SUBTASK));
        };
        let Some(status) = status else {
            return Ok(ToolOutcome::MissingArgument {
                tool: UPDATE_SUBTASK,
                field: "status",
            });
        };

        match self.set_subtask_status(&subtask, status, notes) {
            Ok(transition) => {
                if transition.escalated {
                    warn!(
                        ticket_id = %self.ticket_id,
                        subtask_id = %subtask.subtask_id,
                        rejections = transition.rejection_count,
                        "subtask escalated to blocked"
                    );
                }
                Ok(ToolOutcome::SubtaskUpdated(transition))
            }
            Err(err) => self.refused(UPDATE_SUBTASK, err),
        }
    }

    /// Does not check subtask completeness; the caller confirms it first.
    pub fn complete_ticket(&mut self, summary: &str) -> Result<ToolOutcome, AgentError> {
        if !matches!(self.role, Role::Manager { .. }) {
            return Ok(self.wrong_role(COMPLETE_TICKET));
        }

        self.repo.update_status(&self.ticket_id, TicketStatus::Done)?;
        self.repo
            .add_activity_log(&self.ticket_id, &format!("Ticket completed: {summary}"))?;
        self.finished = true;
        info!(ticket_id = %self.ticket_id, "ticket completed");
        Ok(ToolOutcome::TicketCompleted)
    }

    pub fn subtask_complete(&mut self, result: DeveloperResult) -> Result<ToolOutcome, AgentError> {
        if !matches!(self.role, Role::Developer { .. }) {
            return Ok(self.wrong_role(SUBTASK_COMPLETE));
        }
        let Some(subtask) = self.current.clone() else {
            return Ok(self.no_current_subtask(SUBTASK_COMPLETE));
        };

        let Some(status) = result.status else {
            return Ok(ToolOutcome::MissingArgument {
                tool: SUBTASK_COMPLETE,
                field: "status",
            });
        };

        let (target, notes) = match status {
            ReportedStatus::Complete => (SubtaskStatus::AwaitingReview, None),
            ReportedStatus::Blocked => (
                SubtaskStatus::Blocked,
                Some(
                    result
                        .blocker_details
                        .clone()
                        .unwrap_or_else(|| result.message.clone()),
                ),
            ),
        };
        let applied = self.set_subtask_status(&subtask, target, notes.as_deref());

        // The manager reviews whatever came back, even if the board moved.
        let last_assignment = self.take_assignment();
        self.role = Role::Manager {
            last_assignment,
            last_result: Some(result),
        };

        match applied {
            Ok(transition) => Ok(ToolOutcome::ResultRecorded(transition)),
            Err(err) => self.refused(SUBTASK_COMPLETE, err),
        }
    }

    /// Force the current subtask to Blocked and hand control back to the
    /// manager. Returns `None` when there is nothing left to escalate.
    pub fn escalate_current(
        &mut self,
        reason: &str,
    ) -> Result<Option<SubtaskTransition>, AgentError> {
        let Some(subtask) = self.current.clone() else {
            return Ok(None);
        };

        let transition =
            match self.set_subtask_status(&subtask, SubtaskStatus::Blocked, Some(reason)) {
                Ok(transition) => transition,
                Err(TicketError::InvalidTransition { .. }) => return Ok(None),
                Err(err) => return Err(err.into()),
            };
        self.repo
            .add_activity_log(&self.ticket_id, &format!("ESCALATION: {reason}"))?;
        warn!(
            ticket_id = %self.ticket_id,
            subtask_id = %subtask.subtask_id,
            reason,
            "subtask escalated to blocked"
        );

        let last_assignment = self.take_assignment();
        self.role = Role::Manager {
            last_assignment,
            last_result: None,
        };
        self.current = None;
        self.iterations = 0;
        Ok(Some(transition))
    }

    fn set_subtask_status(
        &self,
        subtask: &SubtaskRef,
        status: SubtaskStatus,
        notes: Option<&str>,
    ) -> Result<SubtaskTransition, TicketError> {
        self.repo.update_subtask_status(
            &self.ticket_id,
            &subtask.task_id,
            &subtask.subtask_id,
            status,
            notes,
        )
    }

    fn take_assignment(&mut self) -> Option<ManagerAssignment> {
        match std::mem::replace(&mut self.role, Role::fresh_manager()) {
            Role::Developer { assignment } => Some(assignment),
            Role::Manager {
                last_assignment, ..
            } => last_assignment,
        }
    }

    fn wrong_role(&self, tool: &'static str) -> ToolOutcome {
        warn!(ticket_id = %self.ticket_id, tool, active = %self.role.kind(), "tool called from the wrong role");
        ToolOutcome::WrongRole {
            tool,
            active: self.role.kind(),
        }
    }

    fn no_current_subtask(&self, tool: &'static str) -> ToolOutcome {
        warn!(ticket_id = %self.ticket_id, tool, "tool called with no current subtask");
        ToolOutcome::NoCurrentSubtask { tool }
    }

    fn refused(&self, tool: &'static str, err: TicketError) -> Result<ToolOutcome, AgentError> {
        match err {
            TicketError::InvalidTransition { .. } => {
                warn!(ticket_id = %self.ticket_id, tool, error = %err, "subtask transition refused");
                Ok(ToolOutcome::TransitionRefused {
                    tool,
                    message: err.to_string(),
                })
            }
            other => Err(other.into()),
        }
    }
}
