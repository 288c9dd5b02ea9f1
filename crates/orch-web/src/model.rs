use chrono::{DateTime, Utc};
use orch_agents::WorkerCommand;
use orch_core::{
    Conversation, ConversationId, ConversationSummary, NewTask, SubtaskStatus, SubtaskTransition,
    Ticket, TicketId, TicketStatus, WorkerId,
};
use orchd::WorkerHandle;
use serde::{Deserialize, Serialize};

/// Group every observer of a ticket joins.
pub fn ticket_group(ticket_id: &TicketId) -> String {
    format!("ticket-{ticket_id}")
}

/// Group only the ticket's worker joins.
pub fn worker_group(ticket_id: &TicketId) -> String {
    format!("worker-{ticket_id}")
}

pub fn ticket_of_worker_group(group: &str) -> Option<TicketId> {
    group
        .strip_prefix("worker-")
        .filter(|id| !id.is_empty())
        .map(TicketId::new)
}

/// Client to hub frame: `{ "method": ..., "params": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum HubRequest {
    SubscribeToTicket {
        ticket_id: TicketId,
    },
    UnsubscribeFromTicket {
        ticket_id: TicketId,
    },
    RegisterWorker {
        ticket_id: TicketId,
    },
    Heartbeat {
        ticket_id: TicketId,
    },
    SyncConversation {
        ticket_id: TicketId,
        conversation: Conversation,
    },
    FinishConversation {
        ticket_id: TicketId,
        conversation_id: ConversationId,
    },
    ResetConversation {
        ticket_id: TicketId,
        conversation_id: ConversationId,
    },
    SetConversationBusy {
        ticket_id: TicketId,
        conversation_id: ConversationId,
        is_busy: bool,
    },
    SendChatToWorker {
        ticket_id: TicketId,
        conversation_id: ConversationId,
        message: String,
    },
    RequestClearConversation {
        ticket_id: TicketId,
        conversation_id: ConversationId,
    },
    RequestInterruptConversation {
        ticket_id: TicketId,
        conversation_id: ConversationId,
    },
    ChangeConversationModel {
        ticket_id: TicketId,
        conversation_id: ConversationId,
        model: String,
    },
}

impl HubRequest {
    pub fn ticket_id(&self) -> &TicketId {
        match self {
            HubRequest::SubscribeToTicket { ticket_id }
            | HubRequest::UnsubscribeFromTicket { ticket_id }
            | HubRequest::RegisterWorker { ticket_id }
            | HubRequest::Heartbeat { ticket_id }
            | HubRequest::SyncConversation { ticket_id, .. }
            | HubRequest::FinishConversation { ticket_id, .. }
            | HubRequest::ResetConversation { ticket_id, .. }
            | HubRequest::SetConversationBusy { ticket_id, .. }
            | HubRequest::SendChatToWorker { ticket_id, .. }
            | HubRequest::RequestClearConversation { ticket_id, .. }
            | HubRequest::RequestInterruptConversation { ticket_id, .. }
            | HubRequest::ChangeConversationModel { ticket_id, .. } => ticket_id,
        }
    }
}

/// Hub to client frame: `{ "event": ..., "data": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum HubEvent {
    TicketCreated {
        ticket: Box<Ticket>,
    },
    TicketUpdated {
        ticket: Box<Ticket>,
    },
    TicketDeleted {
        ticket_id: TicketId,
    },
    ConversationsUpdated {
        ticket_id: TicketId,
        conversations: Vec<ConversationSummary>,
    },
    ConversationSynced {
        ticket_id: TicketId,
        conversation: Box<Conversation>,
    },
    ConversationFinished {
        ticket_id: TicketId,
        conversation_id: ConversationId,
    },
    ConversationReset {
        ticket_id: TicketId,
        conversation_id: ConversationId,
    },
    ConversationBusy {
        ticket_id: TicketId,
        conversation_id: ConversationId,
        busy: bool,
    },
    WorkerChatMessage {
        ticket_id: TicketId,
        conversation_id: ConversationId,
        message: String,
    },
    ClearConversation {
        ticket_id: TicketId,
        conversation_id: ConversationId,
    },
    InterruptConversation {
        ticket_id: TicketId,
        conversation_id: ConversationId,
    },
    ConversationModelChanged {
        ticket_id: TicketId,
        conversation_id: ConversationId,
        model: String,
    },
    Error {
        message: String,
    },
}

impl HubEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HubEvent::TicketCreated { .. } => "ticket_created",
            HubEvent::TicketUpdated { .. } => "ticket_updated",
            HubEvent::TicketDeleted { .. } => "ticket_deleted",
            HubEvent::ConversationsUpdated { .. } => "conversations_updated",
            HubEvent::ConversationSynced { .. } => "conversation_synced",
            HubEvent::ConversationFinished { .. } => "conversation_finished",
            HubEvent::ConversationReset { .. } => "conversation_reset",
            HubEvent::ConversationBusy { .. } => "conversation_busy",
            HubEvent::WorkerChatMessage { .. } => "worker_chat_message",
            HubEvent::ClearConversation { .. } => "clear_conversation",
            HubEvent::InterruptConversation { .. } => "interrupt_conversation",
            HubEvent::ConversationModelChanged { .. } => "conversation_model_changed",
            HubEvent::Error { .. } => "error",
        }
    }

    /// The command a worker should act on, for events relayed to it.
    pub fn to_worker_command(&self) -> Option<WorkerCommand> {
        match self {
            HubEvent::WorkerChatMessage {
                conversation_id,
                message,
                ..
            } => Some(WorkerCommand::Chat {
                conversation_id: conversation_id.clone(),
                message: message.clone(),
            }),
            HubEvent::ClearConversation {
                conversation_id, ..
            } => Some(WorkerCommand::Clear {
                conversation_id: conversation_id.clone(),
            }),
            HubEvent::InterruptConversation {
                conversation_id, ..
            } => Some(WorkerCommand::Interrupt {
                conversation_id: conversation_id.clone(),
            }),
            HubEvent::ConversationModelChanged {
                conversation_id,
                model,
                ..
            } => Some(WorkerCommand::ChangeModel {
                conversation_id: conversation_id.clone(),
                model: model.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTicketRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: TicketStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskUpdateRequest {
    pub status: SubtaskStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

pub type AddTaskRequest = NewTask;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLogRequest {
    pub entry: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchUpdateRequest {
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketListResponse {
    pub tickets: Vec<Ticket>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskUpdateResponse {
    pub ticket: Ticket,
    pub transition: SubtaskTransition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerView {
    pub worker_id: WorkerId,
    pub ticket_id: TicketId,
    pub started_at: DateTime<Utc>,
    pub pid: Option<u32>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl WorkerView {
    pub fn new(handle: &WorkerHandle, last_heartbeat: Option<DateTime<Utc>>) -> Self {
        Self {
            worker_id: handle.worker_id.clone(),
            ticket_id: handle.ticket_id.clone(),
            started_at: handle.started_at,
            pid: handle.pid,
            last_heartbeat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerListResponse {
    pub workers: Vec<WorkerView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationListResponse {
    pub ticket_id: TicketId,
    pub conversations: Vec<ConversationSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_parse_from_method_and_camel_case_params() {
        let frame = json!({
            "method": "set_conversation_busy",
            "params": { "ticketId": "TKT-1", "conversationId": "manager", "isBusy": true }
        });
        let request: HubRequest = serde_json::from_value(frame).unwrap();
        assert_eq!(
            request,
            HubRequest::SetConversationBusy {
                ticket_id: TicketId::new("TKT-1"),
                conversation_id: ConversationId::new("manager"),
                is_busy: true,
            }
        );
        assert_eq!(request.ticket_id(), &TicketId::new("TKT-1"));
    }

    #[test]
    fn events_serialize_with_event_and_data() {
        let event = HubEvent::ConversationBusy {
            ticket_id: TicketId::new("TKT-1"),
            conversation_id: ConversationId::new("c1"),
            busy: true,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "conversation_busy",
                "data": { "ticketId": "TKT-1", "conversationId": "c1", "busy": true }
            })
        );
        assert_eq!(value["event"], event.name());
    }

    #[test]
    fn only_relayed_events_become_worker_commands() {
        let chat = HubEvent::WorkerChatMessage {
            ticket_id: TicketId::new("TKT-2"),
            conversation_id: ConversationId::new("developer"),
            message: "use the retry helper".to_string(),
        };
        assert_eq!(
            chat.to_worker_command(),
            Some(WorkerCommand::Chat {
                conversation_id: ConversationId::new("developer"),
                message: "use the retry helper".to_string(),
            })
        );

        let busy = HubEvent::ConversationBusy {
            ticket_id: TicketId::new("TKT-2"),
            conversation_id: ConversationId::new("developer"),
            busy: false,
        };
        assert_eq!(busy.to_worker_command(), None);
    }

    #[test]
    fn group_names_are_prefixed_by_role() {
        let ticket = TicketId::new("TKT-5");
        assert_eq!(ticket_group(&ticket), "ticket-TKT-5");
        assert_eq!(worker_group(&ticket), "worker-TKT-5");
        assert_eq!(ticket_of_worker_group("worker-TKT-5"), Some(ticket));
        assert_eq!(ticket_of_worker_group("ticket-TKT-5"), None);
        assert_eq!(ticket_of_worker_group("worker-"), None);
    }
}
