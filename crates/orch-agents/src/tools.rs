//! Tool schemas offered to the completion provider, one set per role.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::types::{
    RoleKind, ASSIGN_TO_DEVELOPER, COMPLETE_TICKET, SUBTASK_COMPLETE, UPDATE_SUBTASK,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

fn string_list(description: &str) -> serde_json::Value {
    json!({
        "type": "array",
        "items": { "type": "string" },
        "description": description
    })
}

pub fn manager_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: ASSIGN_TO_DEVELOPER.to_string(),
            description: "Hand the current subtask to the developer with a concrete brief"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "required": ["mode", "goal"],
                "properties": {
                    "mode": {
                        "type": "string",
                        "enum": ["implementation", "testing", "write-tests"],
                        "description": "Kind of work requested"
                    },
                    "goal": { "type": "string", "description": "What done looks like" },
                    "filesToInspect": string_list("Files to read before changing anything"),
                    "filesToModify": string_list("Files expected to change"),
                    "acceptanceCriteria": string_list("Checks the result must satisfy"),
                    "priorContext": {
                        "type": "string",
                        "description": "Feedback from an earlier attempt, if any"
                    },
                    "constraints": string_list("Rules the developer must respect")
                }
            }),
        },
        ToolDefinition {
            name: UPDATE_SUBTASK.to_string(),
            description: "Approve or reject the developer's work on the current subtask"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "required": ["status"],
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": ["complete", "rejected", "blocked"],
                        "description": "Review verdict"
                    },
                    "notes": { "type": "string", "description": "Reasoning shown to the developer" }
                }
            }),
        },
        ToolDefinition {
            name: COMPLETE_TICKET.to_string(),
            description: "Close the ticket once every subtask is complete".to_string(),
            input_schema: json!({
                "type": "object",
                "required": ["summary"],
                "properties": {
                    "summary": { "type": "string", "description": "What was delivered" }
                }
            }),
        },
    ]
}

pub fn developer_tools() -> Vec<ToolDefinition> {
    vec![ToolDefinition {
        name: SUBTASK_COMPLETE.to_string(),
        description: "Report the outcome of the assigned subtask back to the manager".to_string(),
        input_schema: json!({
            "type": "object",
            "required": ["status", "message"],
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["complete", "blocked"],
                    "description": "Whether the work is ready for review"
                },
                "filesChanged": string_list("Files touched"),
                "buildStatus": { "type": "string", "description": "Result of the last build" },
                "message": { "type": "string", "description": "Summary for the reviewer" },
                "blockerDetails": {
                    "type": "string",
                    "description": "What is preventing progress, when blocked"
                },
                "testResults": {
                    "type": "object",
                    "properties": {
                        "passed": { "type": "integer" },
                        "failed": { "type": "integer" },
                        "summary": { "type": "string" }
                    }
                }
            }
        }),
    }]
}

pub fn tools_for(role: RoleKind) -> Vec<ToolDefinition> {
    match role {
        RoleKind::Manager => manager_tools(),
        RoleKind::Developer => developer_tools(),
    }
}
