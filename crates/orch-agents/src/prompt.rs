//! Prompt text for both roles.

use orch_core::{Subtask, Ticket};

use crate::types::{
    DeveloperMode, DeveloperResult, ManagerAssignment, ReportedStatus, RoleKind, SubtaskRef,
};

pub fn system_prompt(role: RoleKind, mode: Option<DeveloperMode>) -> String {
    match role {
        RoleKind::Manager => "You are the engineering manager for one ticket. Work through the \
            subtasks in order. For the current subtask, call assign_to_developer with a precise \
            brief. When the developer reports back, review the result and call update_subtask \
            with status complete or rejected (explain rejections in notes). Only call \
            complete_ticket once every subtask is complete."
            .to_string(),
        RoleKind::Developer => {
            let focus = match mode.unwrap_or_default() {
                DeveloperMode::Implementation => {
                    "Implement the requested change and keep the build green."
                }
                DeveloperMode::Testing => {
                    "Run the existing checks against the change and report what fails."
                }
                DeveloperMode::WriteTests => {
                    "Write tests that pin down the requested behaviour before anything else."
                }
            };
            format!(
                "You are the developer on this ticket. {focus} When finished, or if you cannot \
                 proceed, call subtask_complete with status complete or blocked."
            )
        }
    }
}

/// Board snapshot the manager plans from.
pub fn ticket_overview(ticket: &Ticket, current: Option<&SubtaskRef>) -> String {
    let mut sections = vec![format!(
        "# Ticket {}: {}\n\n{}",
        ticket.id,
        ticket.title,
        ticket.description.trim()
    )];

    if ticket.tasks.is_empty() {
        sections.push("The ticket has no subtasks.".to_string());
    }
    for task in &ticket.tasks {
        let mut lines = vec![format!("## {} ({})", task.name, task.id)];
        for subtask in &task.subtasks {
            let marker = match current {
                Some(selected) if selected.subtask_id == subtask.id => "->",
                _ => "  ",
            };
            lines.push(format!(
                "{marker} [{}] {} ({})",
                subtask.status, subtask.name, subtask.id
            ));
        }
        sections.push(lines.join("\n"));
    }

    match current {
        Some(selected) => sections.push(format!(
            "Current subtask: {} in {}. Assign it to the developer.",
            selected.subtask_id, selected.task_id
        )),
        None => sections.push(
            "No subtask is awaiting work. If every subtask is complete, call complete_ticket."
                .to_string(),
        ),
    }
    sections.join("\n\n")
}

pub fn assignment_brief(assignment: &ManagerAssignment, subtask: Option<&Subtask>) -> String {
    let mut sections = Vec::new();
    if let Some(subtask) = subtask {
        sections.push(format!("# {}\n\n{}", subtask.name, subtask.description.trim()));
    }
    sections.push(format!("Mode: {}\nGoal: {}", assignment.mode, assignment.goal));

    for (heading, items) in [
        ("Inspect first", &assignment.files_to_inspect),
        ("Files to modify", &assignment.files_to_modify),
        ("Acceptance criteria", &assignment.acceptance_criteria),
        ("Constraints", &assignment.constraints),
    ] {
        if !items.is_empty() {
            let bullets = items
                .iter()
                .map(|item| format!("- {item}"))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("{heading}:\n{bullets}"));
        }
    }

    if let Some(context) = assignment.prior_context.as_deref() {
        sections.push(format!("Context from earlier attempts:\n{context}"));
    }
    if let Some(notes) = subtask.and_then(|s| s.last_rejection_notes.as_deref()) {
        sections.push(format!("Last review feedback:\n{notes}"));
    }
    sections.join("\n\n")
}

pub fn developer_report(result: &DeveloperResult) -> String {
    let verdict = match result.status {
        Some(ReportedStatus::Complete) => "reports the subtask complete",
        Some(ReportedStatus::Blocked) => "reports being blocked",
        None => "reports back without a status",
    };
    let mut lines = vec![format!("The developer {verdict}: {}", result.message)];
    if !result.files_changed.is_empty() {
        lines.push(format!("Files changed: {}", result.files_changed.join(", ")));
    }
    if !result.build_status.is_empty() {
        lines.push(format!("Build: {}", result.build_status));
    }
    if let Some(tests) = &result.test_results {
        lines.push(format!(
            "Tests: {} passed, {} failed {}",
            tests.passed, tests.failed, tests.summary
        ));
    }
    if let Some(blocker) = &result.blocker_details {
        lines.push(format!("Blocker: {blocker}"));
    }
    lines.push("Review it and call update_subtask.".to_string());
    lines.join("\n")
}

pub fn stuck_nudge(iterations: u32, max_iterations: u32) -> String {
    format!(
        "You have spent {iterations} of {max_iterations} turns on this subtask without \
         finishing it. Step back, state what is blocking progress, and either change approach \
         or report the subtask as blocked."
    )
}

pub const NO_TOOL_NUDGE: &str =
    "No tool was called. Use one of the available tools to move the subtask forward.";
