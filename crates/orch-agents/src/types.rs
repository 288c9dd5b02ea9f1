use orch_core::{SubtaskId, SubtaskStatus, TaskId, ToolCall};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::decode::{decode_field, decode_or_default};

/// What kind of work the developer is asked to do for the current subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeveloperMode {
    #[default]
    Implementation,
    Testing,
    WriteTests,
}

impl DeveloperMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Implementation => "implementation",
            Self::Testing => "testing",
            Self::WriteTests => "write-tests",
        }
    }
}

impl std::fmt::Display for DeveloperMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeveloperMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "implementation" | "implement" => Ok(Self::Implementation),
            "testing" | "test" => Ok(Self::Testing),
            "write-tests" | "writetests" => Ok(Self::WriteTests),
            _ => Err(format!(
                "unknown developer mode '{value}'; valid values: implementation, testing, write-tests"
            )),
        }
    }
}

/// Which side of the Manager/Developer alternation a tool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Manager,
    Developer,
}

impl RoleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Developer => "developer",
        }
    }
}

impl std::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubtaskRef {
    pub task_id: TaskId,
    pub subtask_id: SubtaskId,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ManagerAssignment {
    pub mode: DeveloperMode,
    pub goal: String,
    pub files_to_inspect: Vec<String>,
    pub files_to_modify: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub prior_context: Option<String>,
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Complete,
    Blocked,
}

impl FromStr for ReportedStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "complete" | "completed" | "done" => Ok(Self::Complete),
            "blocked" => Ok(Self::Blocked),
            _ => Err(format!(
                "unknown reported status '{value}'; valid values: complete, blocked"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestResults {
    #[serde(default)]
    pub passed: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeveloperResult {
    /// `None` when the model sent no status or one that does not parse.
    pub status: Option<ReportedStatus>,
    pub files_changed: Vec<String>,
    pub build_status: String,
    pub message: String,
    pub blocker_details: Option<String>,
    pub test_results: Option<TestResults>,
}

/// One variant per tool name; parameters already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    AssignToDeveloper(ManagerAssignment),
    UpdateSubtask {
        status: Option<SubtaskStatus>,
        notes: Option<String>,
    },
    CompleteTicket {
        summary: String,
    },
    SubtaskComplete(DeveloperResult),
}

pub const ASSIGN_TO_DEVELOPER: &str = "assign_to_developer";
pub const UPDATE_SUBTASK: &str = "update_subtask";
pub const COMPLETE_TICKET: &str = "complete_ticket";
pub const SUBTASK_COMPLETE: &str = "subtask_complete";

impl ToolInvocation {
    /// Returns `None` for a tool name outside the schema.
    pub fn decode(call: &ToolCall) -> Option<Self> {
        let input = &call.input;
        let invocation = match call.name.as_str() {
            ASSIGN_TO_DEVELOPER => Self::AssignToDeveloper(ManagerAssignment {
                mode: decode_mode(input),
                goal: decode_or_default(input, "goal"),
                files_to_inspect: decode_or_default(input, "filesToInspect"),
                files_to_modify: decode_or_default(input, "filesToModify"),
                acceptance_criteria: decode_or_default(input, "acceptanceCriteria"),
                prior_context: decode_or_default(input, "priorContext"),
                constraints: decode_or_default(input, "constraints"),
            }),
            UPDATE_SUBTASK => Self::UpdateSubtask {
                status: decode_field::<String>(input, "status")
                    .and_then(|raw| raw.parse::<SubtaskStatus>().ok()),
                notes: decode_or_default(input, "notes"),
            },
            COMPLETE_TICKET => Self::CompleteTicket {
                summary: decode_or_default(input, "summary"),
            },
            SUBTASK_COMPLETE => Self::SubtaskComplete(DeveloperResult {
                status: decode_field::<String>(input, "status")
                    .and_then(|raw| raw.parse::<ReportedStatus>().ok()),
                files_changed: decode_or_default(input, "filesChanged"),
                build_status: decode_or_default(input, "buildStatus"),
                message: decode_or_default(input, "message"),
                blocker_details: decode_or_default(input, "blockerDetails"),
                test_results: decode_or_default(input, "testResults"),
            }),
            _ => return None,
        };
        Some(invocation)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AssignToDeveloper(_) => ASSIGN_TO_DEVELOPER,
            Self::UpdateSubtask { .. } => UPDATE_SUBTASK,
            Self::CompleteTicket { .. } => COMPLETE_TICKET,
            Self::SubtaskComplete(_) => SUBTASK_COMPLETE,
        }
    }

    pub fn role(&self) -> RoleKind {
        match self {
            Self::SubtaskComplete(_) => RoleKind::Developer,
            _ => RoleKind::Manager,
        }
    }
}

fn decode_mode(input: &Value) -> DeveloperMode {
    decode_field::<String>(input, "mode")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default()
}
