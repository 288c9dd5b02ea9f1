use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use orch_core::{SubtaskId, Task, TaskId, Ticket, TicketId};

use crate::error::WebError;
use crate::model::{
    ActivityLogRequest, AddTaskRequest, BranchUpdateRequest, ConversationListResponse,
    CreateTicketRequest, StatusUpdateRequest, SubtaskUpdateRequest, SubtaskUpdateResponse,
    TicketListResponse, WorkerListResponse, WorkerView,
};
use crate::state::WebState;
use crate::ws::ws_handler;

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route("/api/tickets/{ticket_id}", get(get_ticket).delete(delete_ticket))
        .route("/api/tickets/{ticket_id}/status", put(update_status))
        .route("/api/tickets/{ticket_id}/tasks", post(add_task))
        .route("/api/tickets/{ticket_id}/activity", post(add_activity))
        .route("/api/tickets/{ticket_id}/branch", put(set_branch))
        .route(
            "/api/tickets/{ticket_id}/tasks/{task_id}/subtasks/{subtask_id}",
            put(update_subtask),
        )
        .route(
            "/api/tickets/{ticket_id}/tasks/{task_id}/subtasks/{subtask_id}/reset",
            post(reset_subtask),
        )
        .route(
            "/api/tickets/{ticket_id}/conversations",
            get(list_conversations),
        )
        .route("/api/workers", get(list_workers))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    "orch-web running"
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

async fn list_tickets(State(state): State<WebState>) -> Result<Json<TicketListResponse>, WebError> {
    let tickets = state.service.list_tickets()?;
    Ok(Json(TicketListResponse { tickets }))
}

async fn create_ticket(
    State(state): State<WebState>,
    Json(request): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<Ticket>), WebError> {
    let ticket = state
        .service
        .create_ticket(&request.title, &request.description)?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

async fn get_ticket(
    State(state): State<WebState>,
    Path(ticket_id): Path<String>,
) -> Result<Json<Ticket>, WebError> {
    Ok(Json(state.service.get_ticket(&TicketId::new(ticket_id))?))
}

async fn delete_ticket(
    State(state): State<WebState>,
    Path(ticket_id): Path<String>,
) -> Result<StatusCode, WebError> {
    let ticket_id = TicketId::new(ticket_id);
    if state.service.delete_ticket(&ticket_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(WebError::NotFound {
            resource: format!("ticket:{ticket_id}"),
        })
    }
}

async fn update_status(
    State(state): State<WebState>,
    Path(ticket_id): Path<String>,
    Json(request): Json<StatusUpdateRequest>,
) -> Result<Json<Ticket>, WebError> {
    let ticket = state
        .service
        .update_status(&TicketId::new(ticket_id), request.status)
        .await?;
    Ok(Json(ticket))
}

async fn add_task(
    State(state): State<WebState>,
    Path(ticket_id): Path<String>,
    Json(request): Json<AddTaskRequest>,
) -> Result<(StatusCode, Json<Task>), WebError> {
    let task = state.service.add_task(&TicketId::new(ticket_id), request)?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn add_activity(
    State(state): State<WebState>,
    Path(ticket_id): Path<String>,
    Json(request): Json<ActivityLogRequest>,
) -> Result<StatusCode, WebError> {
    state
        .service
        .add_activity_log(&TicketId::new(ticket_id), &request.entry)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_branch(
    State(state): State<WebState>,
    Path(ticket_id): Path<String>,
    Json(request): Json<BranchUpdateRequest>,
) -> Result<Json<Ticket>, WebError> {
    let ticket = state
        .service
        .set_branch(&TicketId::new(ticket_id), &request.branch)?;
    Ok(Json(ticket))
}

async fn update_subtask(
    State(state): State<WebState>,
    Path((ticket_id, task_id, subtask_id)): Path<(String, String, String)>,
    Json(request): Json<SubtaskUpdateRequest>,
) -> Result<Json<SubtaskUpdateResponse>, WebError> {
    let (ticket, transition) = state.service.update_subtask_status(
        &TicketId::new(ticket_id),
        &TaskId::new(task_id),
        &SubtaskId::new(subtask_id),
        request.status,
        request.notes.as_deref(),
    )?;
    Ok(Json(SubtaskUpdateResponse { ticket, transition }))
}

async fn reset_subtask(
    State(state): State<WebState>,
    Path((ticket_id, task_id, subtask_id)): Path<(String, String, String)>,
) -> Result<Json<Ticket>, WebError> {
    let ticket = state.service.reset_subtask(
        &TicketId::new(ticket_id),
        &TaskId::new(task_id),
        &SubtaskId::new(subtask_id),
    )?;
    Ok(Json(ticket))
}

async fn list_conversations(
    State(state): State<WebState>,
    Path(ticket_id): Path<String>,
) -> Result<Json<ConversationListResponse>, WebError> {
    let ticket_id = TicketId::new(ticket_id);
    state.service.get_ticket(&ticket_id)?;
    let conversations = state.coordinator.list_conversations(&ticket_id);
    Ok(Json(ConversationListResponse {
        ticket_id,
        conversations,
    }))
}

async fn list_workers(State(state): State<WebState>) -> Json<WorkerListResponse> {
    let heartbeats = state.coordinator.heartbeats();
    let mut workers = state
        .service
        .active_workers()
        .values()
        .map(|handle| WorkerView::new(handle, heartbeats.get(&handle.ticket_id).copied()))
        .collect::<Vec<_>>();
    workers.sort_by(|a, b| {
        a.started_at
            .cmp(&b.started_at)
            .then_with(|| a.worker_id.cmp(&b.worker_id))
    });
    Json(WorkerListResponse { workers })
}
