use async_trait::async_trait;
use orch_core::{ConversationMessage, TicketId, ToolCall};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::AgentError;
use crate::tools::ToolDefinition;
use crate::types::RoleKind;

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest<'a> {
    pub ticket_id: &'a TicketId,
    pub role: RoleKind,
    pub model: Option<&'a str>,
    pub system: &'a str,
    pub messages: &'a [ConversationMessage],
    pub tools: &'a [ToolDefinition],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Completion {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// The language-model backend. Wire format and transport are up to the
/// implementation.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, AgentError>;
}

/// Runs an external command once per completion. The request is written to
/// its stdin as JSON and a `Completion` is read back from stdout.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    command: String,
    args: Vec<String>,
}

impl CommandProvider {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    fn failure(&self, what: &str, detail: impl std::fmt::Display) -> AgentError {
        AgentError::Provider {
            message: format!("{} {what}: {detail}", self.command),
        }
    }
}

#[async_trait]
impl CompletionProvider for CommandProvider {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, AgentError> {
        let payload =
            serde_json::to_vec(&request).map_err(|err| self.failure("request encoding", err))?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| self.failure("spawn", err))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|err| self.failure("stdin", err))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| self.failure("wait", err))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failure("exited", format!("{} {}", output.status, stderr.trim())));
        }

        debug!(
            ticket_id = %request.ticket_id,
            role = %request.role,
            bytes = output.stdout.len(),
            "completion command finished"
        );
        serde_json::from_slice(&output.stdout).map_err(|err| self.failure("output", err))
    }
}
