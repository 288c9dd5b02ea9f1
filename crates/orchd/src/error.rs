use orch_core::{TicketError, WorkerId};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Ticket(#[from] TicketError),
    #[error("failed to prepare worker context at {path}: {source}")]
    Context {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to launch worker {worker_id}: {message}")]
    Launch { worker_id: WorkerId, message: String },
    #[error("failed to terminate worker {worker_id}: {message}")]
    Terminate { worker_id: WorkerId, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_error_names_the_worker() {
        let err = LifecycleError::Launch {
            worker_id: WorkerId::new("worker-TKT-1-abcd1234"),
            message: "No such file or directory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to launch worker worker-TKT-1-abcd1234: No such file or directory"
        );
    }

    #[test]
    fn context_error_carries_the_path() {
        let err = LifecycleError::Context {
            path: PathBuf::from("/tmp/orch/workers"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().starts_with("failed to prepare worker context at /tmp/orch/workers"));
    }
}
