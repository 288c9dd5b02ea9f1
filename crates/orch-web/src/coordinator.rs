//! Real-time hub between workers and browsers.
//!
//! State is partitioned per ticket: each ticket has its own room holding
//! conversation snapshots, the busy set and the last heartbeat. Events for a
//! ticket are queued while its room is locked, so a subscriber's busy replay
//! always precedes any later event for that ticket.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use orch_agents::CoordinatorLink;
use orch_core::{
    Conversation, ConversationId, ConversationSummary, Ticket, TicketId, TicketRepository,
};
use orchd::TicketNotifier;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::connection::{Connection, ConnectionId, ConnectionRegistry, Frame};
use crate::model::{ticket_group, ticket_of_worker_group, worker_group, HubEvent, HubRequest};

#[derive(Debug, Default)]
struct TicketRoom {
    conversations: BTreeMap<ConversationId, Conversation>,
    busy: BTreeSet<ConversationId>,
    last_heartbeat: Option<DateTime<Utc>>,
}

impl TicketRoom {
    fn stamp(&mut self, at: DateTime<Utc>) {
        self.last_heartbeat = Some(self.last_heartbeat.map_or(at, |prev| prev.max(at)));
    }

    fn summaries(&self) -> Vec<ConversationSummary> {
        self.conversations
            .values()
            .map(|conversation| conversation.summary(self.busy.contains(&conversation.id)))
            .collect()
    }
}

pub struct RealtimeCoordinator {
    connections: Arc<ConnectionRegistry>,
    rooms: DashMap<TicketId, Arc<Mutex<TicketRoom>>>,
    /// When set, rooms are only opened for tickets the repository knows.
    tickets: Option<Arc<dyn TicketRepository>>,
}

impl RealtimeCoordinator {
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        Self {
            connections,
            rooms: DashMap::new(),
            tickets: None,
        }
    }

    pub fn with_tickets(mut self, tickets: Arc<dyn TicketRepository>) -> Self {
        self.tickets = Some(tickets);
        self
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn connect(&self) -> (Arc<Connection>, mpsc::Receiver<Frame>) {
        self.connections.register()
    }

    /// Forget the connection. When the last worker socket of a ticket goes
    /// away its busy flags are cleared.
    pub fn disconnect(&self, conn_id: &ConnectionId) {
        let Some(groups) = self.connections.unregister(conn_id) else {
            return;
        };
        debug!(%conn_id, "hub client disconnected");
        for ticket_id in groups.iter().filter_map(|group| ticket_of_worker_group(group)) {
            if self.connections.members(&worker_group(&ticket_id)).is_empty() {
                self.clear_busy(&ticket_id);
            }
        }
    }

    /// Join `ticket-<id>` and replay the busy set to this connection alone.
    pub fn subscribe_to_ticket(&self, conn_id: &ConnectionId, ticket_id: &TicketId) {
        let Some(slot) = self.room(ticket_id) else {
            return;
        };
        let room = slot.lock();
        if !self.connections.join(conn_id, &ticket_group(ticket_id)) {
            warn!(%conn_id, %ticket_id, "subscribe from unknown connection");
            return;
        }
        for conversation_id in &room.busy {
            let event = HubEvent::ConversationBusy {
                ticket_id: ticket_id.clone(),
                conversation_id: conversation_id.clone(),
                busy: true,
            };
            if let Some(frame) = encode(&event) {
                self.connections.send_to(conn_id, frame);
            }
        }
        debug!(%conn_id, %ticket_id, replayed = room.busy.len(), "subscribed to ticket");
    }

    pub fn unsubscribe_from_ticket(&self, conn_id: &ConnectionId, ticket_id: &TicketId) {
        self.connections.leave(conn_id, &ticket_group(ticket_id));
    }

    pub fn register_worker(&self, conn_id: &ConnectionId, ticket_id: &TicketId) {
        let Some(slot) = self.room(ticket_id) else {
            return;
        };
        let mut room = slot.lock();
        let joined = self.connections.join(conn_id, &ticket_group(ticket_id))
            && self.connections.join(conn_id, &worker_group(ticket_id));
        if !joined {
            warn!(%conn_id, %ticket_id, "worker registration from unknown connection");
        }
        room.stamp(Utc::now());
    }

    pub fn heartbeat(&self, ticket_id: &TicketId) {
        self.record_heartbeat_at(ticket_id, Utc::now());
    }

    /// Stamp a heartbeat; an older timestamp than the one held is ignored.
    pub fn record_heartbeat_at(&self, ticket_id: &TicketId, at: DateTime<Utc>) {
        if let Some(slot) = self.room(ticket_id) {
            slot.lock().stamp(at);
        }
    }

    /// Replace the stored snapshot, then announce it.
    pub fn sync_conversation(&self, ticket_id: &TicketId, conversation: Conversation) {
        let Some(slot) = self.room(ticket_id) else {
            return;
        };
        let mut room = slot.lock();
        room.stamp(Utc::now());
        room.conversations
            .insert(conversation.id.clone(), conversation.clone());

        let group = ticket_group(ticket_id);
        self.publish(
            &group,
            &HubEvent::ConversationsUpdated {
                ticket_id: ticket_id.clone(),
                conversations: room.summaries(),
            },
        );
        self.publish(
            &group,
            &HubEvent::ConversationSynced {
                ticket_id: ticket_id.clone(),
                conversation: Box::new(conversation),
            },
        );
    }

    pub fn finish_conversation(&self, ticket_id: &TicketId, conversation_id: &ConversationId) {
        let Some(slot) = self.room(ticket_id) else {
            return;
        };
        let mut room = slot.lock();
        room.stamp(Utc::now());
        match room.conversations.get_mut(conversation_id) {
            Some(conversation) => conversation.finished = true,
            None => warn!(%ticket_id, %conversation_id, "finish for unknown conversation"),
        }

        let group = ticket_group(ticket_id);
        self.publish(
            &group,
            &HubEvent::ConversationFinished {
                ticket_id: ticket_id.clone(),
                conversation_id: conversation_id.clone(),
            },
        );
        self.publish(
            &group,
            &HubEvent::ConversationsUpdated {
                ticket_id: ticket_id.clone(),
                conversations: room.summaries(),
            },
        );
    }

    /// Announces the reset only; the worker pushes the fresh snapshot.
    pub fn reset_conversation(&self, ticket_id: &TicketId, conversation_id: &ConversationId) {
        let Some(slot) = self.room(ticket_id) else {
            return;
        };
        let mut room = slot.lock();
        room.stamp(Utc::now());
        self.publish(
            &ticket_group(ticket_id),
            &HubEvent::ConversationReset {
                ticket_id: ticket_id.clone(),
                conversation_id: conversation_id.clone(),
            },
        );
    }

    pub fn set_conversation_busy(
        &self,
        ticket_id: &TicketId,
        conversation_id: &ConversationId,
        busy: bool,
    ) {
        let Some(slot) = self.room(ticket_id) else {
            return;
        };
        let mut room = slot.lock();
        room.stamp(Utc::now());
        if busy {
            room.busy.insert(conversation_id.clone());
        } else {
            room.busy.remove(conversation_id);
        }
        self.publish(
            &ticket_group(ticket_id),
            &HubEvent::ConversationBusy {
                ticket_id: ticket_id.clone(),
                conversation_id: conversation_id.clone(),
                busy,
            },
        );
    }

    /// Drop every busy flag of the ticket and announce each as idle.
    /// Returns how many flags were cleared.
    pub fn clear_busy(&self, ticket_id: &TicketId) -> usize {
        let Some(slot) = self.existing_room(ticket_id) else {
            return 0;
        };
        let mut room = slot.lock();
        let cleared = std::mem::take(&mut room.busy);
        if cleared.is_empty() {
            return 0;
        }

        let group = ticket_group(ticket_id);
        for conversation_id in &cleared {
            self.publish(
                &group,
                &HubEvent::ConversationBusy {
                    ticket_id: ticket_id.clone(),
                    conversation_id: conversation_id.clone(),
                    busy: false,
                },
            );
        }
        self.publish(
            &group,
            &HubEvent::ConversationsUpdated {
                ticket_id: ticket_id.clone(),
                conversations: room.summaries(),
            },
        );
        debug!(%ticket_id, cleared = cleared.len(), "cleared busy conversations");
        cleared.len()
    }

    pub fn send_chat_to_worker(
        &self,
        ticket_id: &TicketId,
        conversation_id: &ConversationId,
        message: String,
    ) -> usize {
        self.relay_to_worker(HubEvent::WorkerChatMessage {
            ticket_id: ticket_id.clone(),
            conversation_id: conversation_id.clone(),
            message,
        })
    }

    pub fn request_clear_conversation(
        &self,
        ticket_id: &TicketId,
        conversation_id: &ConversationId,
    ) -> usize {
        self.relay_to_worker(HubEvent::ClearConversation {
            ticket_id: ticket_id.clone(),
            conversation_id: conversation_id.clone(),
        })
    }

    pub fn request_interrupt_conversation(
        &self,
        ticket_id: &TicketId,
        conversation_id: &ConversationId,
    ) -> usize {
        self.relay_to_worker(HubEvent::InterruptConversation {
            ticket_id: ticket_id.clone(),
            conversation_id: conversation_id.clone(),
        })
    }

    pub fn change_conversation_model(
        &self,
        ticket_id: &TicketId,
        conversation_id: &ConversationId,
        model: String,
    ) -> usize {
        self.relay_to_worker(HubEvent::ConversationModelChanged {
            ticket_id: ticket_id.clone(),
            conversation_id: conversation_id.clone(),
            model,
        })
    }

    pub fn get_conversation(
        &self,
        ticket_id: &TicketId,
        conversation_id: &ConversationId,
    ) -> Option<Conversation> {
        let slot = self.existing_room(ticket_id)?;
        let room = slot.lock();
        room.conversations.get(conversation_id).cloned()
    }

    pub fn list_conversations(&self, ticket_id: &TicketId) -> Vec<ConversationSummary> {
        self.existing_room(ticket_id)
            .map(|slot| slot.lock().summaries())
            .unwrap_or_default()
    }

    pub fn busy_conversations(&self, ticket_id: &TicketId) -> Vec<ConversationId> {
        self.existing_room(ticket_id)
            .map(|slot| slot.lock().busy.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn last_heartbeat(&self, ticket_id: &TicketId) -> Option<DateTime<Utc>> {
        self.existing_room(ticket_id)
            .and_then(|slot| slot.lock().last_heartbeat)
    }

    /// Snapshot of every ticket's last heartbeat.
    pub fn heartbeats(&self) -> HashMap<TicketId, DateTime<Utc>> {
        let slots = self
            .rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect::<Vec<_>>();
        slots
            .into_iter()
            .filter_map(|(ticket_id, slot)| {
                let seen = slot.lock().last_heartbeat?;
                Some((ticket_id, seen))
            })
            .collect()
    }

    pub fn handle_request(&self, conn_id: &ConnectionId, request: HubRequest) {
        match request {
            HubRequest::SubscribeToTicket { ticket_id } => {
                self.subscribe_to_ticket(conn_id, &ticket_id)
            }
            HubRequest::UnsubscribeFromTicket { ticket_id } => {
                self.unsubscribe_from_ticket(conn_id, &ticket_id)
            }
            HubRequest::RegisterWorker { ticket_id } => self.register_worker(conn_id, &ticket_id),
            HubRequest::Heartbeat { ticket_id } => self.heartbeat(&ticket_id),
            HubRequest::SyncConversation {
                ticket_id,
                conversation,
            } => self.sync_conversation(&ticket_id, conversation),
            HubRequest::FinishConversation {
                ticket_id,
                conversation_id,
            } => self.finish_conversation(&ticket_id, &conversation_id),
            HubRequest::ResetConversation {
                ticket_id,
                conversation_id,
            } => self.reset_conversation(&ticket_id, &conversation_id),
            HubRequest::SetConversationBusy {
                ticket_id,
                conversation_id,
                is_busy,
            } => self.set_conversation_busy(&ticket_id, &conversation_id, is_busy),
            HubRequest::SendChatToWorker {
                ticket_id,
                conversation_id,
                message,
            } => {
                self.send_chat_to_worker(&ticket_id, &conversation_id, message);
            }
            HubRequest::RequestClearConversation {
                ticket_id,
                conversation_id,
            } => {
                self.request_clear_conversation(&ticket_id, &conversation_id);
            }
            HubRequest::RequestInterruptConversation {
                ticket_id,
                conversation_id,
            } => {
                self.request_interrupt_conversation(&ticket_id, &conversation_id);
            }
            HubRequest::ChangeConversationModel {
                ticket_id,
                conversation_id,
                model,
            } => {
                self.change_conversation_model(&ticket_id, &conversation_id, model);
            }
        }
    }

    /// Decode one text frame and act on it. Malformed frames are answered
    /// with an error event; the connection stays open.
    pub fn handle_frame(&self, conn_id: &ConnectionId, text: &str) {
        match serde_json::from_str::<HubRequest>(text) {
            Ok(request) => self.handle_request(conn_id, request),
            Err(err) => {
                warn!(%conn_id, error = %err, "malformed hub request");
                let reply = HubEvent::Error {
                    message: format!("malformed request: {err}"),
                };
                if let Some(frame) = encode(&reply) {
                    self.connections.send_to(conn_id, frame);
                }
            }
        }
    }

    fn room(&self, ticket_id: &TicketId) -> Option<Arc<Mutex<TicketRoom>>> {
        if let Some(slot) = self.existing_room(ticket_id) {
            return Some(slot);
        }
        if let Some(tickets) = &self.tickets {
            if let Err(err) = tickets.get_ticket(ticket_id) {
                warn!(%ticket_id, error = %err, "ignoring hub call for unknown ticket");
                return None;
            }
        }
        Some(self.rooms.entry(ticket_id.clone()).or_default().clone())
    }

    fn existing_room(&self, ticket_id: &TicketId) -> Option<Arc<Mutex<TicketRoom>>> {
        self.rooms.get(ticket_id).map(|entry| entry.value().clone())
    }

    fn publish(&self, group: &str, event: &HubEvent) -> usize {
        encode(event).map_or(0, |frame| self.connections.broadcast(group, &frame))
    }

    fn publish_all(&self, ticket_id: &TicketId, event: &HubEvent) {
        let Some(frame) = encode(event) else {
            return;
        };
        let slot = self.existing_room(ticket_id);
        let _room = slot.as_ref().map(|slot| slot.lock());
        self.connections.broadcast_all(&frame);
    }

    fn relay_to_worker(&self, event: HubEvent) -> usize {
        let ticket_id = match &event {
            HubEvent::WorkerChatMessage { ticket_id, .. }
            | HubEvent::ClearConversation { ticket_id, .. }
            | HubEvent::InterruptConversation { ticket_id, .. }
            | HubEvent::ConversationModelChanged { ticket_id, .. } => ticket_id.clone(),
            other => {
                error!(event = other.name(), "event is not relayed to workers");
                return 0;
            }
        };
        let delivered = self.publish(&worker_group(&ticket_id), &event);
        if delivered == 0 {
            debug!(%ticket_id, event = event.name(), "no worker connected to relay to");
        }
        delivered
    }
}

fn encode(event: &HubEvent) -> Option<Frame> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Arc::new(text)),
        Err(err) => {
            error!(event = event.name(), error = %err, "failed to encode hub event");
            None
        }
    }
}

impl TicketNotifier for RealtimeCoordinator {
    fn ticket_created(&self, ticket: &Ticket) {
        self.publish_all(
            &ticket.id,
            &HubEvent::TicketCreated {
                ticket: Box::new(ticket.clone()),
            },
        );
    }

    fn ticket_updated(&self, ticket: &Ticket) {
        self.publish_all(
            &ticket.id,
            &HubEvent::TicketUpdated {
                ticket: Box::new(ticket.clone()),
            },
        );
    }

    fn ticket_deleted(&self, ticket_id: &TicketId) {
        self.publish_all(
            ticket_id,
            &HubEvent::TicketDeleted {
                ticket_id: ticket_id.clone(),
            },
        );
        self.rooms.remove(ticket_id);
    }

    fn worker_stopped(&self, ticket_id: &TicketId) {
        self.clear_busy(ticket_id);
    }
}

/// Lets a runner hosted in this process publish without a socket.
impl CoordinatorLink for RealtimeCoordinator {
    fn register_worker(&self, ticket_id: &TicketId) {
        self.heartbeat(ticket_id);
    }

    fn heartbeat(&self, ticket_id: &TicketId) {
        RealtimeCoordinator::heartbeat(self, ticket_id);
    }

    fn sync_conversation(&self, ticket_id: &TicketId, conversation: &Conversation) {
        RealtimeCoordinator::sync_conversation(self, ticket_id, conversation.clone());
    }

    fn finish_conversation(&self, ticket_id: &TicketId, conversation_id: &ConversationId) {
        RealtimeCoordinator::finish_conversation(self, ticket_id, conversation_id);
    }

    fn reset_conversation(&self, ticket_id: &TicketId, conversation_id: &ConversationId) {
        RealtimeCoordinator::reset_conversation(self, ticket_id, conversation_id);
    }

    fn set_conversation_busy(
        &self,
        ticket_id: &TicketId,
        conversation_id: &ConversationId,
        busy: bool,
    ) {
        RealtimeCoordinator::set_conversation_busy(self, ticket_id, conversation_id, busy);
    }
}
