//! Execution backends that host worker processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use orch_core::{TicketId, WorkersConfig, WorkerId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::LifecycleError;

pub const ENV_TICKET_ID: &str = "ORCH_TICKET_ID";
pub const ENV_WORKER_ID: &str = "ORCH_WORKER_ID";
pub const ENV_COORDINATOR_URL: &str = "ORCH_COORDINATOR_URL";

/// Result of making sure the shared execution context exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsureOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub ticket_id: TicketId,
    pub worker_id: WorkerId,
    pub coordinator_url: String,
}

impl LaunchSpec {
    /// The only configuration a worker receives.
    pub fn environment(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_TICKET_ID, self.ticket_id.to_string()),
            (ENV_WORKER_ID, self.worker_id.to_string()),
            (ENV_COORDINATOR_URL, self.coordinator_url.clone()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHandle {
    pub worker_id: WorkerId,
    pub ticket_id: TicketId,
    pub started_at: DateTime<Utc>,
    pub pid: Option<u32>,
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn ensure_context(&self) -> Result<EnsureOutcome, LifecycleError>;
    async fn launch(&self, spec: LaunchSpec) -> Result<WorkerHandle, LifecycleError>;
    /// Terminating a worker the backend no longer knows about is not an error.
    async fn terminate(&self, handle: &WorkerHandle) -> Result<(), LifecycleError>;
}

/// Runs each worker as a local child process inside a shared workspace
/// directory.
#[derive(Debug)]
pub struct ProcessBackend {
    command: String,
    args: Vec<String>,
    workspace_root: PathBuf,
    children: DashMap<WorkerId, Child>,
}

impl ProcessBackend {
    pub fn new(command: impl Into<String>, args: Vec<String>, workspace_root: PathBuf) -> Self {
        Self {
            command: command.into(),
            args,
            workspace_root,
            children: DashMap::new(),
        }
    }

    pub fn from_config(config: &WorkersConfig) -> Self {
        Self::new(
            config.command.clone(),
            config.args.clone(),
            config.workspace_root.clone(),
        )
    }

    pub fn workspace_root(&self) -> &PathBuf {
        &self.workspace_root
    }

    pub fn running(&self) -> usize {
        self.children.len()
    }
}

#[async_trait]
impl ExecutionBackend for ProcessBackend {
    async fn ensure_context(&self) -> Result<EnsureOutcome, LifecycleError> {
        let context_error = |source| LifecycleError::Context {
            path: self.workspace_root.clone(),
            source,
        };
        if tokio::fs::try_exists(&self.workspace_root)
            .await
            .map_err(context_error)?
        {
            return Ok(EnsureOutcome::AlreadyExists);
        }
        // create_dir_all tolerates a concurrent creator.
        tokio::fs::create_dir_all(&self.workspace_root)
            .await
            .map_err(context_error)?;
        info!(path = %self.workspace_root.display(), "created worker workspace");
        Ok(EnsureOutcome::Created)
    }

    async fn launch(&self, spec: LaunchSpec) -> Result<WorkerHandle, LifecycleError> {
        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .current_dir(&self.workspace_root)
            .envs(spec.environment())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|err| LifecycleError::Launch {
            worker_id: spec.worker_id.clone(),
            message: format!("{}: {err}", self.command),
        })?;
        let pid = child.id();
        debug!(worker_id = %spec.worker_id, ?pid, "spawned worker process");
        self.children.insert(spec.worker_id.clone(), child);

        Ok(WorkerHandle {
            worker_id: spec.worker_id,
            ticket_id: spec.ticket_id,
            started_at: Utc::now(),
            pid,
        })
    }

    async fn terminate(&self, handle: &WorkerHandle) -> Result<(), LifecycleError> {
        let Some((_, mut child)) = self.children.remove(&handle.worker_id) else {
            warn!(worker_id = %handle.worker_id, "no process recorded for worker");
            return Ok(());
        };
        if let Ok(Some(status)) = child.try_wait() {
            debug!(worker_id = %handle.worker_id, %status, "worker had already exited");
            return Ok(());
        }
        child.kill().await.map_err(|err| LifecycleError::Terminate {
            worker_id: handle.worker_id.clone(),
            message: err.to_string(),
        })
    }
}
