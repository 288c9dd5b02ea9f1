use orch_core::TicketError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Ticket(#[from] TicketError),
    #[error("completion provider failed: {message}")]
    Provider { message: String },
    #[error("invalid run configuration: {message}")]
    InvalidRequest { message: String },
}
