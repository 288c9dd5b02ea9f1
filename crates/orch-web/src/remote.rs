//! `TicketRepository` over the coordinator's REST surface.
//!
//! The repository trait is synchronous, so each call parks the current
//! worker thread with `block_in_place`. That needs a multi-threaded tokio
//! runtime; on any other runtime calls fail with a storage error.

use orch_core::{
    EntityKind, NewTask, StatusChange, SubtaskId, SubtaskStatus, SubtaskTransition, Task, TaskId,
    Ticket, TicketError, TicketId, TicketRepository, TicketStatus, WorkerDirective, WorkerId,
};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::future::Future;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::debug;

use crate::client::http_base;
use crate::error::{ClientError, ErrorBody};
use crate::model::{
    ActivityLogRequest, BranchUpdateRequest, CreateTicketRequest, StatusUpdateRequest,
    SubtaskUpdateRequest, SubtaskUpdateResponse, TicketListResponse,
};

pub struct RemoteTicketStore {
    client: reqwest::Client,
    base: Url,
}

impl RemoteTicketStore {
    pub fn new(base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
        }
    }

    /// Talk to the coordinator that serves the given hub url.
    pub fn for_coordinator(coordinator_url: &str) -> Result<Self, ClientError> {
        Ok(Self::new(http_base(coordinator_url)?))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TicketError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| storage(format!("{} cannot carry a path", self.base)))?
            .clear()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    fn ticket_endpoint(&self, ticket_id: &TicketId, rest: &[&str]) -> Result<Url, TicketError> {
        let mut segments = vec!["tickets", ticket_id.as_str()];
        segments.extend_from_slice(rest);
        self.endpoint(&segments)
    }

    fn subtask_endpoint(
        &self,
        ticket_id: &TicketId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
        rest: &[&str],
    ) -> Result<Url, TicketError> {
        let mut segments = vec!["tasks", task_id.as_str(), "subtasks", subtask_id.as_str()];
        segments.extend_from_slice(rest);
        self.ticket_endpoint(ticket_id, &segments)
    }

    fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, TicketError> {
        block_on(async move {
            execute(request)
                .await?
                .json::<T>()
                .await
                .map_err(|err| storage(format!("unreadable coordinator reply: {err}")))
        })?
    }

    fn submit(&self, request: RequestBuilder) -> Result<(), TicketError> {
        block_on(async move { execute(request).await.map(drop) })?
    }
}

impl TicketRepository for RemoteTicketStore {
    fn create_ticket(&self, title: &str, description: &str) -> Result<Ticket, TicketError> {
        let url = self.endpoint(&["tickets"])?;
        self.fetch(self.client.post(url).json(&CreateTicketRequest {
            title: title.to_string(),
            description: description.to_string(),
        }))
    }

    fn get_ticket(&self, ticket_id: &TicketId) -> Result<Ticket, TicketError> {
        let url = self.ticket_endpoint(ticket_id, &[])?;
        self.fetch(self.client.get(url))
    }

    fn list_tickets(&self) -> Result<Vec<Ticket>, TicketError> {
        let url = self.endpoint(&["tickets"])?;
        let listed: TicketListResponse = self.fetch(self.client.get(url))?;
        Ok(listed.tickets)
    }

    fn delete_ticket(&self, ticket_id: &TicketId) -> Result<bool, TicketError> {
        let url = self.ticket_endpoint(ticket_id, &[])?;
        let request = self.client.delete(url);
        block_on(async move {
            match execute(request).await {
                Ok(_) => Ok(true),
                Err(TicketError::NotFound { .. }) => Ok(false),
                Err(err) => Err(err),
            }
        })?
    }

    /// The coordinator acts on the worker directive itself, so the returned
    /// change never asks the caller to start or stop anything.
    fn update_status(
        &self,
        ticket_id: &TicketId,
        status: TicketStatus,
    ) -> Result<StatusChange, TicketError> {
        let from = self.get_ticket(ticket_id)?.status;
        let url = self.ticket_endpoint(ticket_id, &["status"])?;
        let ticket: Ticket = self.fetch(self.client.put(url).json(&StatusUpdateRequest { status }))?;
        Ok(StatusChange {
            from,
            to: ticket.status,
            worker: WorkerDirective::None,
        })
    }

    fn update_subtask_status(
        &self,
        ticket_id: &TicketId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
        status: SubtaskStatus,
        notes: Option<&str>,
    ) -> Result<SubtaskTransition, TicketError> {
        let url = self.subtask_endpoint(ticket_id, task_id, subtask_id, &[])?;
        let updated: SubtaskUpdateResponse =
            self.fetch(self.client.put(url).json(&SubtaskUpdateRequest {
                status,
                notes: notes.map(str::to_string),
            }))?;
        Ok(updated.transition)
    }

    fn add_activity_log(&self, ticket_id: &TicketId, entry: &str) -> Result<(), TicketError> {
        let url = self.ticket_endpoint(ticket_id, &["activity"])?;
        self.submit(self.client.post(url).json(&ActivityLogRequest {
            entry: entry.to_string(),
        }))
    }

    fn add_task(&self, ticket_id: &TicketId, task: NewTask) -> Result<Task, TicketError> {
        let url = self.ticket_endpoint(ticket_id, &["tasks"])?;
        self.fetch(self.client.post(url).json(&task))
    }

    fn assign_worker(
        &self,
        ticket_id: &TicketId,
        _worker_id: Option<WorkerId>,
    ) -> Result<(), TicketError> {
        Err(storage(format!(
            "worker assignment for {ticket_id} is managed by the coordinator"
        )))
    }

    fn set_branch(&self, ticket_id: &TicketId, branch: &str) -> Result<(), TicketError> {
        let url = self.ticket_endpoint(ticket_id, &["branch"])?;
        self.submit(self.client.put(url).json(&BranchUpdateRequest {
            branch: branch.to_string(),
        }))
    }

    fn reset_subtask(
        &self,
        ticket_id: &TicketId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
    ) -> Result<(), TicketError> {
        let url = self.subtask_endpoint(ticket_id, task_id, subtask_id, &["reset"])?;
        self.submit(self.client.post(url))
    }
}

fn storage(message: String) -> TicketError {
    TicketError::Storage { message }
}

fn block_on<F: Future>(future: F) -> Result<F::Output, TicketError> {
    let handle = Handle::try_current()
        .map_err(|err| storage(format!("remote ticket store needs a tokio runtime: {err}")))?;
    if handle.runtime_flavor() != RuntimeFlavor::MultiThread {
        return Err(storage(
            "remote ticket store needs a multi-threaded tokio runtime".to_string(),
        ));
    }
    Ok(tokio::task::block_in_place(|| handle.block_on(future)))
}

/// Send and map a non-2xx reply back to the error the coordinator raised.
async fn execute(request: RequestBuilder) -> Result<Response, TicketError> {
    let response = request
        .send()
        .await
        .map_err(|err| storage(format!("coordinator unreachable: {err}")))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().clone();
    let body = response.json::<ErrorBody>().await.ok();
    debug!(%url, %status, "coordinator rejected ticket call");
    Err(match body {
        Some(ErrorBody {
            ticket_error: Some(err),
            ..
        }) => err,
        Some(body) if status == StatusCode::NOT_FOUND => TicketError::NotFound {
            kind: EntityKind::Ticket,
            id: body.error,
        },
        Some(body) => storage(format!("coordinator returned {status}: {}", body.error)),
        None => storage(format!("coordinator returned {status}")),
    })
}
