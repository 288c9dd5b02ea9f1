//! Worker side of the hub protocol.
//!
//! `HubClient` holds one `/ws` socket. Its `HubLink` turns `CoordinatorLink`
//! calls into request frames, and events relayed to the worker group come
//! back out as `WorkerCommand`s for the runner.

use futures::{SinkExt, StreamExt};
use orch_agents::{CoordinatorLink, WorkerCommand};
use orch_core::{Conversation, ConversationId, TicketId};
use reqwest::Url;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::model::{HubEvent, HubRequest};

pub const COMMAND_QUEUE: usize = 64;

/// Fire-and-forget sender of hub requests.
#[derive(Debug, Clone)]
pub struct HubLink {
    requests: mpsc::UnboundedSender<HubRequest>,
}

impl HubLink {
    fn send(&self, request: HubRequest) {
        if self.requests.send(request).is_err() {
            debug!("hub connection closed; request dropped");
        }
    }
}

impl CoordinatorLink for HubLink {
    fn register_worker(&self, ticket_id: &TicketId) {
        self.send(HubRequest::RegisterWorker {
            ticket_id: ticket_id.clone(),
        });
    }

    fn heartbeat(&self, ticket_id: &TicketId) {
        self.send(HubRequest::Heartbeat {
            ticket_id: ticket_id.clone(),
        });
    }

    fn sync_conversation(&self, ticket_id: &TicketId, conversation: &Conversation) {
        self.send(HubRequest::SyncConversation {
            ticket_id: ticket_id.clone(),
            conversation: conversation.clone(),
        });
    }

    fn finish_conversation(&self, ticket_id: &TicketId, conversation_id: &ConversationId) {
        self.send(HubRequest::FinishConversation {
            ticket_id: ticket_id.clone(),
            conversation_id: conversation_id.clone(),
        });
    }

    fn reset_conversation(&self, ticket_id: &TicketId, conversation_id: &ConversationId) {
        self.send(HubRequest::ResetConversation {
            ticket_id: ticket_id.clone(),
            conversation_id: conversation_id.clone(),
        });
    }

    fn set_conversation_busy(
        &self,
        ticket_id: &TicketId,
        conversation_id: &ConversationId,
        busy: bool,
    ) {
        self.send(HubRequest::SetConversationBusy {
            ticket_id: ticket_id.clone(),
            conversation_id: conversation_id.clone(),
            is_busy: busy,
        });
    }
}

pub struct HubClient {
    link: Arc<HubLink>,
    commands: Option<mpsc::Receiver<WorkerCommand>>,
    shutdown: oneshot::Sender<()>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl HubClient {
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|err| ClientError::Connect {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        info!(%url, "connected to hub");
        let (mut ws_tx, mut ws_rx) = socket.split();

        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<HubRequest>();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();

        // After shutdown the queue is closed but still drained, so frames
        // sent before `close` reach the hub.
        let writer = tokio::spawn(async move {
            let mut closing = false;
            loop {
                let request = tokio::select! {
                    request = request_rx.recv() => match request {
                        Some(request) => request,
                        None => break,
                    },
                    _ = &mut shutdown_rx, if !closing => {
                        closing = true;
                        request_rx.close();
                        continue;
                    }
                };
                let text = match serde_json::to_string(&request) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "failed to encode hub request");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    warn!("hub connection lost while sending");
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(Ok(message)) = ws_rx.next().await {
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let event = match serde_json::from_str::<HubEvent>(text.as_str()) {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(error = %err, "malformed hub event");
                        continue;
                    }
                };
                if let HubEvent::Error { message } = &event {
                    warn!(%message, "hub rejected a request");
                    continue;
                }
                let Some(command) = event.to_worker_command() else {
                    continue;
                };
                if command_tx.try_send(command).is_err() {
                    warn!(event = event.name(), "worker command dropped");
                }
            }
            debug!("hub event stream ended");
        });

        Ok(Self {
            link: Arc::new(HubLink {
                requests: request_tx,
            }),
            commands: Some(command_rx),
            shutdown,
            writer,
            reader,
        })
    }

    pub fn link(&self) -> Arc<HubLink> {
        Arc::clone(&self.link)
    }

    /// The relayed observer requests; yields `None` after the first call.
    pub fn take_commands(&mut self) -> Option<mpsc::Receiver<WorkerCommand>> {
        self.commands.take()
    }

    /// Flush queued requests, then close the socket.
    pub async fn close(self) {
        let Self {
            shutdown,
            writer,
            reader,
            ..
        } = self;
        let _ = shutdown.send(());
        if let Err(err) = writer.await {
            warn!(error = %err, "hub writer task failed");
        }
        reader.abort();
    }
}

/// The HTTP root of the coordinator serving the given hub url.
pub fn http_base(coordinator_url: &str) -> Result<Url, ClientError> {
    let invalid = |message: String| ClientError::InvalidUrl {
        url: coordinator_url.to_string(),
        message,
    };
    let mut url = Url::parse(coordinator_url).map_err(|err| invalid(err.to_string()))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "http",
        "wss" | "https" => "https",
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| invalid(format!("cannot switch to {scheme}")))?;
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
