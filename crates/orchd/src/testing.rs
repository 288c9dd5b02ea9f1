//! Fakes shared by the unit tests in this crate.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::backend::{EnsureOutcome, ExecutionBackend, LaunchSpec, WorkerHandle};
use crate::error::LifecycleError;

#[derive(Debug, Default)]
pub struct FakeBackend {
    pub context_ready: AtomicBool,
    pub ensure_calls: AtomicUsize,
    pub fail_launch: AtomicBool,
    pub launched: Mutex<Vec<LaunchSpec>>,
    pub terminated: Mutex<Vec<WorkerHandle>>,
}

impl FakeBackend {
    pub fn failing() -> Self {
        let backend = Self::default();
        backend.fail_launch.store(true, Ordering::SeqCst);
        backend
    }

    pub fn launch_count(&self) -> usize {
        self.launched.lock().len()
    }

    pub fn terminated_ids(&self) -> Vec<String> {
        self.terminated
            .lock()
            .iter()
            .map(|handle| handle.worker_id.to_string())
            .collect()
    }
}

#[async_trait]
impl ExecutionBackend for FakeBackend {
    async fn ensure_context(&self) -> Result<EnsureOutcome, LifecycleError> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        if self.context_ready.swap(true, Ordering::SeqCst) {
            Ok(EnsureOutcome::AlreadyExists)
        } else {
            Ok(EnsureOutcome::Created)
        }
    }

    async fn launch(&self, spec: LaunchSpec) -> Result<WorkerHandle, LifecycleError> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(LifecycleError::Launch {
                worker_id: spec.worker_id,
                message: "backend refused".to_string(),
            });
        }
        let handle = WorkerHandle {
            worker_id: spec.worker_id.clone(),
            ticket_id: spec.ticket_id.clone(),
            started_at: Utc::now(),
            pid: None,
        };
        self.launched.lock().push(spec);
        Ok(handle)
    }

    async fn terminate(&self, handle: &WorkerHandle) -> Result<(), LifecycleError> {
        self.terminated.lock().push(handle.clone());
        Ok(())
    }
}
