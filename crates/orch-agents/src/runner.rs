//! Drives one ticket's orchestrator against a completion provider.

use orch_core::{
    Conversation, ConversationId, ConversationMessage, OrchestratorConfig, TicketId,
    TicketRepository, TicketStatus, ToolResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::AgentError;
use crate::orchestrator::{Orchestrator, Role, ToolOutcome};
use crate::prompt;
use crate::provider::{CompletionProvider, CompletionRequest};
use crate::tools::tools_for;
use crate::types::{RoleKind, SubtaskRef};

pub const MANAGER_CONVERSATION: &str = "manager";
pub const DEVELOPER_CONVERSATION: &str = "developer";
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Hub-side effects of a running worker. Calls are fire-and-forget.
pub trait CoordinatorLink: Send + Sync {
    fn register_worker(&self, ticket_id: &TicketId);
    fn heartbeat(&self, ticket_id: &TicketId);
    fn sync_conversation(&self, ticket_id: &TicketId, conversation: &Conversation);
    fn finish_conversation(&self, ticket_id: &TicketId, conversation_id: &ConversationId);
    fn reset_conversation(&self, ticket_id: &TicketId, conversation_id: &ConversationId);
    fn set_conversation_busy(
        &self,
        ticket_id: &TicketId,
        conversation_id: &ConversationId,
        busy: bool,
    );
}

/// Requests relayed from observers to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WorkerCommand {
    Chat {
        conversation_id: ConversationId,
        message: String,
    },
    Clear {
        conversation_id: ConversationId,
    },
    Interrupt {
        conversation_id: ConversationId,
    },
    ChangeModel {
        conversation_id: ConversationId,
        model: String,
    },
}

impl WorkerCommand {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::Chat {
                conversation_id, ..
            }
            | Self::Clear { conversation_id }
            | Self::Interrupt { conversation_id }
            | Self::ChangeModel {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    pub max_iterations_per_subtask: u32,
    /// Zero disables the nudge.
    pub stuck_prompt_interval: u32,
    /// How often the worker reports liveness while a completion is pending.
    pub heartbeat_interval: Duration,
}

impl RunnerSettings {
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

impl From<&OrchestratorConfig> for RunnerSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_iterations_per_subtask: config.max_iterations_per_subtask,
            stuck_prompt_interval: config.stuck_prompt_interval,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Nothing actionable is left but the ticket is not done; it was moved
    /// to Blocked.
    Stalled,
    Interrupted,
    ProviderFailed {
        message: String,
    },
}

pub struct AgentRunner {
    orchestrator: Orchestrator,
    repo: Arc<dyn TicketRepository>,
    provider: Arc<dyn CompletionProvider>,
    link: Arc<dyn CoordinatorLink>,
    commands: Option<mpsc::Receiver<WorkerCommand>>,
    settings: RunnerSettings,
    manager: Conversation,
    developer: Conversation,
    briefed: Option<Option<SubtaskRef>>,
    interrupted: bool,
}

impl AgentRunner {
    pub fn new(
        repo: Arc<dyn TicketRepository>,
        ticket_id: TicketId,
        provider: Arc<dyn CompletionProvider>,
        link: Arc<dyn CoordinatorLink>,
        settings: RunnerSettings,
    ) -> Result<Self, AgentError> {
        if settings.max_iterations_per_subtask == 0 {
            return Err(AgentError::InvalidRequest {
                message: "max_iterations_per_subtask must be greater than zero".to_string(),
            });
        }
        if settings.heartbeat_interval.is_zero() {
            return Err(AgentError::InvalidRequest {
                message: "heartbeat_interval must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            orchestrator: Orchestrator::new(Arc::clone(&repo), ticket_id),
            repo,
            provider,
            link,
            commands: None,
            settings,
            manager: Conversation::new(ConversationId::new(MANAGER_CONVERSATION), "Manager"),
            developer: Conversation::new(ConversationId::new(DEVELOPER_CONVERSATION), "Developer"),
            briefed: None,
            interrupted: false,
        })
    }

    pub fn with_commands(mut self, commands: mpsc::Receiver<WorkerCommand>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub async fn run(mut self) -> Result<RunOutcome, AgentError> {
        let ticket_id = self.orchestrator.ticket_id().clone();
        self.link.register_worker(&ticket_id);
        info!(ticket_id = %ticket_id, "agent run started");

        let outcome = self.drive().await;

        for conversation in [&mut self.manager, &mut self.developer] {
            conversation.finished = true;
            self.link.sync_conversation(&ticket_id, conversation);
            self.link.finish_conversation(&ticket_id, &conversation.id);
        }

        match &outcome {
            Ok(RunOutcome::ProviderFailed { message }) => {
                error!(ticket_id = %ticket_id, error = %message, "agent run ended on provider failure");
            }
            Ok(result) => info!(ticket_id = %ticket_id, outcome = ?result, "agent run ended"),
            Err(err) => error!(ticket_id = %ticket_id, error = %err, "agent run failed"),
        }
        outcome
    }

    async fn drive(&mut self) -> Result<RunOutcome, AgentError> {
        let max = self.settings.max_iterations_per_subtask;
        loop {
            self.drain_commands();
            if self.interrupted {
                return Ok(RunOutcome::Interrupted);
            }
            if self.orchestrator.is_finished() {
                return Ok(RunOutcome::Completed);
            }

            let role = self.orchestrator.current_agent();
            if role == RoleKind::Manager
                && self.orchestrator.select_next_subtask()?.is_none()
                && !self.orchestrator.all_subtasks_complete()?
            {
                return self.stall("no actionable subtasks remain");
            }

            let iterations = self.orchestrator.record_iteration();
            if iterations > max {
                let reason = format!("no progress after {max} iterations");
                if self.orchestrator.escalate_current(&reason)?.is_none() {
                    return self.stall(&reason);
                }
                continue;
            }
            let interval = self.settings.stuck_prompt_interval;
            if interval > 0 && iterations % interval == 0 {
                debug!(ticket_id = %self.orchestrator.ticket_id(), iterations, "sending stuck nudge");
                self.conversation_mut(role)
                    .push(ConversationMessage::user(prompt::stuck_nudge(iterations, max)));
            }

            match self.take_turn(role).await {
                Ok(()) => {}
                Err(AgentError::Provider { message }) => {
                    return Ok(RunOutcome::ProviderFailed { message });
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn take_turn(&mut self, role: RoleKind) -> Result<(), AgentError> {
        let ticket_id = self.orchestrator.ticket_id().clone();
        if role == RoleKind::Manager {
            self.brief_manager()?;
        }

        let conversation_id = self.conversation_mut(role).id.clone();
        let system = prompt::system_prompt(role, self.orchestrator.current_developer_mode());
        let tools = tools_for(role);
        let provider = Arc::clone(&self.provider);

        self.link
            .set_conversation_busy(&ticket_id, &conversation_id, true);
        let result = {
            let conversation = match role {
                RoleKind::Manager => &self.manager,
                RoleKind::Developer => &self.developer,
            };
            let completion = provider.complete(CompletionRequest {
                ticket_id: &ticket_id,
                role,
                model: conversation.model.as_deref(),
                system: &system,
                messages: &conversation.messages,
                tools: &tools,
            });
            tokio::pin!(completion);

            // Long completions must not look like a dead worker to the reaper.
            let period = self.settings.heartbeat_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    result = &mut completion => break result,
                    _ = ticker.tick() => self.link.heartbeat(&ticket_id),
                }
            }
        };
        self.link
            .set_conversation_busy(&ticket_id, &conversation_id, false);
        let completion = result?;

        self.conversation_mut(role).push(ConversationMessage::assistant(
            completion.text,
            completion.tool_calls.clone(),
        ));
        if completion.tool_calls.is_empty() {
            self.conversation_mut(role)
                .push(ConversationMessage::user(prompt::NO_TOOL_NUDGE));
        }

        let mut calls = completion.tool_calls.into_iter();
        while let Some(call) = calls.next() {
            let outcome = self.orchestrator.handle(&call)?;
            self.conversation_mut(role)
                .push(ConversationMessage::tool(ToolResult {
                    tool_call_id: call.id,
                    content: outcome.describe(),
                    is_error: outcome.is_error(),
                }));

            if outcome.switches_role() || self.orchestrator.is_finished() {
                for skipped in calls.by_ref() {
                    self.conversation_mut(role)
                        .push(ConversationMessage::tool(ToolResult {
                            tool_call_id: skipped.id,
                            content: format!("{} skipped: control has moved on.", skipped.name),
                            is_error: true,
                        }));
                }
                self.hand_over(&outcome)?;
            }
        }

        self.link.sync_conversation(&ticket_id, &self.manager);
        self.link.sync_conversation(&ticket_id, &self.developer);
        Ok(())
    }

    /// Tell the manager about the board whenever the selection changed.
    fn brief_manager(&mut self) -> Result<(), AgentError> {
        let current = self.orchestrator.current_subtask().cloned();
        if self.briefed.as_ref() == Some(&current) {
            return Ok(());
        }
        let ticket = self.repo.get_ticket(self.orchestrator.ticket_id())?;
        self.manager.push(ConversationMessage::user(prompt::ticket_overview(
            &ticket,
            current.as_ref(),
        )));
        self.briefed = Some(current);
        Ok(())
    }

    /// Carry the payload of a role switch into the receiving conversation.
    fn hand_over(&mut self, outcome: &ToolOutcome) -> Result<(), AgentError> {
        match (outcome, self.orchestrator.role()) {
            (ToolOutcome::Assigned { subtask, .. }, Role::Developer { assignment }) => {
                let ticket = self.repo.get_ticket(self.orchestrator.ticket_id())?;
                let brief = prompt::assignment_brief(
                    assignment,
                    ticket.subtask(&subtask.task_id, &subtask.subtask_id),
                );
                self.developer.push(ConversationMessage::user(brief));
            }
            (
                ToolOutcome::ResultRecorded(_),
                Role::Manager {
                    last_result: Some(result),
                    ..
                },
            ) => {
                let report = prompt::developer_report(result);
                self.manager.push(ConversationMessage::user(report));
            }
            _ => {}
        }
        Ok(())
    }

    fn stall(&mut self, reason: &str) -> Result<RunOutcome, AgentError> {
        let ticket_id = self.orchestrator.ticket_id().clone();
        self.repo.update_status(&ticket_id, TicketStatus::Blocked)?;
        self.repo
            .add_activity_log(&ticket_id, &format!("Run stopped: {reason}"))?;
        warn!(ticket_id = %ticket_id, reason, "ticket blocked; no further progress possible");
        Ok(RunOutcome::Stalled)
    }

    fn drain_commands(&mut self) {
        let mut pending = Vec::new();
        if let Some(commands) = self.commands.as_mut() {
            while let Ok(command) = commands.try_recv() {
                pending.push(command);
            }
        }
        for command in pending {
            self.apply_command(command);
        }
    }

    fn apply_command(&mut self, command: WorkerCommand) {
        let ticket_id = self.orchestrator.ticket_id().clone();
        let conversation_id = command.conversation_id().clone();
        if let WorkerCommand::Interrupt { .. } = command {
            info!(ticket_id = %ticket_id, conversation_id = %conversation_id, "run interrupted");
            self.interrupted = true;
            return;
        }

        let link = Arc::clone(&self.link);
        let Some(conversation) = self.conversation_by_id(&conversation_id) else {
            warn!(ticket_id = %ticket_id, conversation_id = %conversation_id, "command for unknown conversation");
            return;
        };
        match command {
            WorkerCommand::Chat { message, .. } => {
                conversation.push(ConversationMessage::user(message));
            }
            WorkerCommand::Clear { .. } => {
                conversation.clear();
                link.reset_conversation(&ticket_id, &conversation_id);
            }
            WorkerCommand::ChangeModel { model, .. } => {
                info!(ticket_id = %ticket_id, conversation_id = %conversation_id, model = %model, "conversation model changed");
                conversation.model = Some(model);
            }
            WorkerCommand::Interrupt { .. } => {}
        }
        link.sync_conversation(&ticket_id, conversation);
    }

    fn conversation_by_id(&mut self, conversation_id: &ConversationId) -> Option<&mut Conversation> {
        [&mut self.manager, &mut self.developer]
            .into_iter()
            .find(|conversation| &conversation.id == conversation_id)
    }

    fn conversation_mut(&mut self, role: RoleKind) -> &mut Conversation {
        match role {
            RoleKind::Manager => &mut self.manager,
            RoleKind::Developer => &mut self.developer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Completion;
    use crate::types::{ASSIGN_TO_DEVELOPER, COMPLETE_TICKET, SUBTASK_COMPLETE, UPDATE_SUBTASK};
    use async_trait::async_trait;
    use orch_core::{
        MemoryTicketStore, NewSubtask, NewTask, SubtaskStatus, Ticket, ToolCall,
    };
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;

    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<Completion, AgentError>>>,
        seen: Mutex<Vec<(RoleKind, Option<String>, Vec<String>)>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<Completion, AgentError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(
            &self,
            request: CompletionRequest<'_>,
        ) -> Result<Completion, AgentError> {
            self.seen.lock().push((
                request.role,
                request.model.map(str::to_string),
                request.tools.iter().map(|tool| tool.name.clone()).collect(),
            ));
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| {
                    Err(AgentError::Provider {
                        message: "script exhausted".to_string(),
                    })
                })
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum LinkEvent {
        Registered,
        Synced(Conversation),
        Finished(String),
        Reset(String),
        Busy(String, bool),
        Heartbeat,
    }

    #[derive(Default)]
    struct RecordingLink {
        events: Mutex<Vec<LinkEvent>>,
    }

    impl CoordinatorLink for RecordingLink {
        fn register_worker(&self, _ticket_id: &TicketId) {
            self.events.lock().push(LinkEvent::Registered);
        }

        fn heartbeat(&self, _ticket_id: &TicketId) {
            self.events.lock().push(LinkEvent::Heartbeat);
        }

        fn sync_conversation(&self, _ticket_id: &TicketId, conversation: &Conversation) {
            self.events
                .lock()
                .push(LinkEvent::Synced(conversation.clone()));
        }

        fn finish_conversation(&self, _ticket_id: &TicketId, conversation_id: &ConversationId) {
            self.events
                .lock()
                .push(LinkEvent::Finished(conversation_id.to_string()));
        }

        fn reset_conversation(&self, _ticket_id: &TicketId, conversation_id: &ConversationId) {
            self.events
                .lock()
                .push(LinkEvent::Reset(conversation_id.to_string()));
        }

        fn set_conversation_busy(
            &self,
            _ticket_id: &TicketId,
            conversation_id: &ConversationId,
            busy: bool,
        ) {
            self.events
                .lock()
                .push(LinkEvent::Busy(conversation_id.to_string(), busy));
        }
    }

    fn tool(name: &str, input: Value) -> Result<Completion, AgentError> {
        Ok(Completion {
            text: None,
            tool_calls: vec![ToolCall {
                id: format!("call-{name}"),
                name: name.to_string(),
                input,
            }],
        })
    }

    fn text(reply: &str) -> Result<Completion, AgentError> {
        Ok(Completion {
            text: Some(reply.to_string()),
            tool_calls: Vec::new(),
        })
    }

    fn store_with_subtask() -> (Arc<MemoryTicketStore>, TicketId) {
        let store = Arc::new(MemoryTicketStore::new());
        let ticket = store.create_ticket("Search", "Add search").expect("create");
        store
            .add_task(
                &ticket.id,
                NewTask {
                    name: "Backend".to_string(),
                    description: String::new(),
                    subtasks: vec![NewSubtask {
                        name: "Index".to_string(),
                        description: "Build the index".to_string(),
                    }],
                },
            )
            .expect("add task");
        (store, ticket.id)
    }

    fn runner(
        store: &Arc<MemoryTicketStore>,
        ticket_id: &TicketId,
        provider: Arc<ScriptedProvider>,
        link: Arc<RecordingLink>,
        settings: RunnerSettings,
    ) -> AgentRunner {
        let repo: Arc<dyn TicketRepository> = store.clone();
        AgentRunner::new(repo, ticket_id.clone(), provider, link, settings).expect("runner")
    }

    fn settings(max: u32, stuck: u32) -> RunnerSettings {
        RunnerSettings {
            max_iterations_per_subtask: max,
            stuck_prompt_interval: stuck,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    fn subtask(store: &MemoryTicketStore, ticket_id: &TicketId) -> (Ticket, SubtaskStatus) {
        let ticket = store.get_ticket(ticket_id).expect("ticket");
        let status = ticket.tasks[0].subtasks[0].status;
        (ticket, status)
    }

    #[tokio::test]
    async fn runs_a_subtask_through_review_and_closes_the_ticket() {
        let (store, ticket_id) = store_with_subtask();
        let provider = ScriptedProvider::new(vec![
            tool(ASSIGN_TO_DEVELOPER, json!({ "mode": "implementation", "goal": "index" })),
            tool(SUBTASK_COMPLETE, json!({ "status": "complete", "message": "built" })),
            tool(UPDATE_SUBTASK, json!({ "status": "complete" })),
            tool(COMPLETE_TICKET, json!({ "summary": "search shipped" })),
        ]);
        let link = Arc::new(RecordingLink::default());

        let outcome = runner(&store, &ticket_id, provider.clone(), link.clone(), settings(10, 0))
            .run()
            .await
            .expect("run");

        assert_eq!(outcome, RunOutcome::Completed);
        let (ticket, status) = subtask(&store, &ticket_id);
        assert_eq!(status, SubtaskStatus::Complete);
        assert_eq!(ticket.status, TicketStatus::Done);

        let roles = provider
            .seen
            .lock()
            .iter()
            .map(|(role, _, _)| *role)
            .collect::<Vec<_>>();
        assert_eq!(
            roles,
            vec![
                RoleKind::Manager,
                RoleKind::Developer,
                RoleKind::Manager,
                RoleKind::Manager
            ]
        );
        assert_eq!(provider.seen.lock()[1].2, vec![SUBTASK_COMPLETE.to_string()]);

        let events = link.events.lock();
        assert_eq!(events.first(), Some(&LinkEvent::Registered));
        assert_eq!(
            events
                .iter()
                .filter(|event| matches!(event, LinkEvent::Finished(_)))
                .count(),
            2
        );
        let developer_snapshot = events
            .iter()
            .rev()
            .find_map(|event| match event {
                LinkEvent::Synced(conversation) if conversation.id.as_str() == "developer" => {
                    Some(conversation.clone())
                }
                _ => None,
            })
            .expect("developer synced");
        assert!(developer_snapshot.finished);
        assert!(developer_snapshot.messages[0]
            .content
            .as_deref()
            .is_some_and(|brief| brief.starts_with("# Index")));
    }

    #[tokio::test]
    async fn iteration_cap_escalates_and_stalls_the_ticket() {
        let (store, ticket_id) = store_with_subtask();
        let provider = ScriptedProvider::new(vec![
            tool(ASSIGN_TO_DEVELOPER, json!({ "goal": "index" })),
            text("thinking..."),
        ]);
        let link = Arc::new(RecordingLink::default());

        let outcome = runner(&store, &ticket_id, provider, link, settings(2, 0))
            .run()
            .await
            .expect("run");

        assert_eq!(outcome, RunOutcome::Stalled);
        let (ticket, status) = subtask(&store, &ticket_id);
        assert_eq!(status, SubtaskStatus::Blocked);
        assert_eq!(ticket.status, TicketStatus::Blocked);
        assert!(ticket
            .activity_log
            .iter()
            .any(|line| line.contains("ESCALATION: no progress after 2 iterations")));
    }

    #[tokio::test]
    async fn stuck_nudge_is_sent_on_the_interval() {
        let (store, ticket_id) = store_with_subtask();
        let provider = ScriptedProvider::new(vec![text("hmm"), text("still thinking")]);
        let link = Arc::new(RecordingLink::default());

        let outcome = runner(&store, &ticket_id, provider, link.clone(), settings(10, 2))
            .run()
            .await
            .expect("run");

        assert_eq!(
            outcome,
            RunOutcome::ProviderFailed {
                message: "script exhausted".to_string()
            }
        );
        let events = link.events.lock();
        let manager = events
            .iter()
            .rev()
            .find_map(|event| match event {
                LinkEvent::Synced(conversation) if conversation.id.as_str() == "manager" => {
                    Some(conversation.clone())
                }
                _ => None,
            })
            .expect("manager synced");
        assert!(manager.messages.iter().any(|message| message
            .content
            .as_deref()
            .is_some_and(|text| text.starts_with("You have spent 2 of 10 turns"))));
        assert_eq!(
            events.iter().rev().nth(4),
            Some(&LinkEvent::Busy("manager".to_string(), false))
        );
    }

    #[tokio::test]
    async fn commands_are_applied_between_turns() {
        let (store, ticket_id) = store_with_subtask();
        let provider = ScriptedProvider::new(Vec::new());
        let link = Arc::new(RecordingLink::default());
        let (tx, rx) = mpsc::channel(8);
        let manager = ConversationId::new(MANAGER_CONVERSATION);
        tx.try_send(WorkerCommand::ChangeModel {
            conversation_id: manager.clone(),
            model: "large".to_string(),
        })
        .expect("queue");
        tx.try_send(WorkerCommand::Chat {
            conversation_id: manager.clone(),
            message: "prioritise latency".to_string(),
        })
        .expect("queue");
        tx.try_send(WorkerCommand::Interrupt {
            conversation_id: manager,
        })
        .expect("queue");

        let outcome = runner(&store, &ticket_id, provider.clone(), link.clone(), settings(10, 0))
            .with_commands(rx)
            .run()
            .await
            .expect("run");

        assert_eq!(outcome, RunOutcome::Interrupted);
        assert!(provider.seen.lock().is_empty());
        let events = link.events.lock();
        assert!(events.iter().any(|event| matches!(
            event,
            LinkEvent::Synced(conversation)
                if conversation.model.as_deref() == Some("large")
                    && conversation.messages.len() == 1
        )));
    }

    #[tokio::test]
    async fn clear_resets_the_conversation() {
        let (store, ticket_id) = store_with_subtask();
        let link = Arc::new(RecordingLink::default());
        let (tx, rx) = mpsc::channel(8);
        let developer = ConversationId::new(DEVELOPER_CONVERSATION);
        for command in [
            WorkerCommand::Chat {
                conversation_id: developer.clone(),
                message: "hello".to_string(),
            },
            WorkerCommand::Clear {
                conversation_id: developer.clone(),
            },
            WorkerCommand::Interrupt {
                conversation_id: developer,
            },
        ] {
            tx.try_send(command).expect("queue");
        }

        runner(&store, &ticket_id, ScriptedProvider::new(Vec::new()), link.clone(), settings(10, 0))
            .with_commands(rx)
            .run()
            .await
            .expect("run");

        let events = link.events.lock();
        assert!(events.contains(&LinkEvent::Reset("developer".to_string())));
    }

    struct SlowProvider {
        delay: Duration,
    }

    #[async_trait]
    impl CompletionProvider for SlowProvider {
        async fn complete(
            &self,
            _request: CompletionRequest<'_>,
        ) -> Result<Completion, AgentError> {
            tokio::time::sleep(self.delay).await;
            Err(AgentError::Provider {
                message: "upstream timed out".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_continue_while_a_completion_is_pending() {
        let (store, ticket_id) = store_with_subtask();
        let link = Arc::new(RecordingLink::default());
        let repo: Arc<dyn TicketRepository> = store;
        let provider = Arc::new(SlowProvider {
            delay: Duration::from_secs(95),
        });

        let outcome = AgentRunner::new(
            repo,
            ticket_id,
            provider,
            link.clone(),
            settings(10, 0).with_heartbeat_interval(Duration::from_secs(30)),
        )
        .expect("runner")
        .run()
        .await
        .expect("run");

        assert!(matches!(outcome, RunOutcome::ProviderFailed { .. }));
        let events = link.events.lock();
        let busy_on = events
            .iter()
            .position(|event| event == &LinkEvent::Busy("manager".to_string(), true))
            .expect("busy set");
        let busy_off = events
            .iter()
            .position(|event| event == &LinkEvent::Busy("manager".to_string(), false))
            .expect("busy cleared");
        let beats = events
            .iter()
            .enumerate()
            .filter(|(_, event)| **event == LinkEvent::Heartbeat)
            .map(|(index, _)| index)
            .collect::<Vec<_>>();
        assert_eq!(beats.len(), 3);
        assert!(beats.iter().all(|index| *index > busy_on && *index < busy_off));
    }

    #[test]
    fn zero_heartbeat_interval_is_rejected() {
        let (store, ticket_id) = store_with_subtask();
        let repo: Arc<dyn TicketRepository> = store;
        let result = AgentRunner::new(
            repo,
            ticket_id,
            ScriptedProvider::new(Vec::new()),
            Arc::new(RecordingLink::default()),
            settings(10, 0).with_heartbeat_interval(Duration::ZERO),
        );
        assert!(matches!(result, Err(AgentError::InvalidRequest { .. })));
    }

    #[test]
    fn zero_iteration_cap_is_rejected() {
        let (store, ticket_id) = store_with_subtask();
        let repo: Arc<dyn TicketRepository> = store;
        let result = AgentRunner::new(
            repo,
            ticket_id,
            ScriptedProvider::new(Vec::new()),
            Arc::new(RecordingLink::default()),
            settings(0, 0),
        );
        assert!(matches!(result, Err(AgentError::InvalidRequest { .. })));
    }
}
