//! Agent conversations as synchronized to observers.
//!
//! A worker owns the authoritative copy of each conversation and pushes full
//! snapshots; everything else holds a replica that is replaced wholesale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ConversationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A structured tool request emitted by the completion provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_result: None,
        }
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
            tool_calls,
            tool_result: None,
        }
    }

    pub fn tool(result: ToolResult) -> Self {
        Self {
            role: MessageRole::Tool,
            content: None,
            tool_calls: Vec::new(),
            tool_result: Some(result),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub display_name: String,
    #[serde(default)]
    pub messages: Vec<ConversationMessage>,
    #[serde(default)]
    pub finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: ConversationId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            messages: Vec::new(),
            finished: false,
            model: None,
            updated_at: Utc::now(),
        }
    }

    pub fn push(&mut self, message: ConversationMessage) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.finished = false;
        self.updated_at = Utc::now();
    }

    /// Busy state is not part of the conversation itself, so the caller
    /// supplies it.
    pub fn summary(&self, busy: bool) -> ConversationSummary {
        ConversationSummary {
            conversation_id: self.id.clone(),
            display_name: self.display_name.clone(),
            message_count: self.messages.len(),
            finished: self.finished,
            busy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub display_name: String,
    pub message_count: usize,
    pub finished: bool,
    pub busy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_uses_camel_case_on_the_wire() {
        let mut conversation = Conversation::new(ConversationId::new("manager"), "Manager");
        conversation.push(ConversationMessage::tool(ToolResult {
            tool_call_id: "call-1".to_string(),
            content: "ok".to_string(),
            is_error: false,
        }));

        let value = serde_json::to_value(&conversation).expect("serialize conversation");
        assert_eq!(value["displayName"], "Manager");
        assert_eq!(value["messages"][0]["role"], "tool");
        assert_eq!(value["messages"][0]["toolResult"]["toolCallId"], "call-1");
        assert!(value["messages"][0].get("content").is_none());
    }

    #[test]
    fn snapshot_decodes_with_missing_optional_fields() {
        let conversation: Conversation = serde_json::from_value(json!({
            "id": "developer",
            "displayName": "Developer",
            "messages": [{ "role": "user", "content": "hi" }]
        }))
        .expect("decode conversation");

        assert!(!conversation.finished);
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].content.as_deref(), Some("hi"));
    }

    #[test]
    fn summary_counts_messages_and_carries_busy_flag() {
        let mut conversation = Conversation::new(ConversationId::new("manager"), "Manager");
        conversation.push(ConversationMessage::user("plan the ticket"));
        conversation.push(ConversationMessage::assistant(Some("on it".to_string()), vec![]));
        conversation.finished = true;

        let summary = conversation.summary(true);
        assert_eq!(summary.message_count, 2);
        assert!(summary.finished);
        assert!(summary.busy);
    }

    #[test]
    fn clear_drops_messages_and_reopens() {
        let mut conversation = Conversation::new(ConversationId::new("manager"), "Manager");
        conversation.push(ConversationMessage::user("first"));
        conversation.finished = true;

        conversation.clear();
        assert!(conversation.messages.is_empty());
        assert!(!conversation.finished);
    }
}
