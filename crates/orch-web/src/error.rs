use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orch_core::TicketError;
use orchd::ServiceError;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not found: {resource}")]
    NotFound { resource: String },
    #[error("bad request: {message}")]
    BadRequest { message: String },
    #[error("internal error: {message}")]
    Internal { message: String },
    #[error(transparent)]
    Ticket(TicketError),
}

/// Failures of the worker-side hub client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid coordinator url {url}: {message}")]
    InvalidUrl { url: String, message: String },
    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    /// Present when the failure came from the ticket model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_error: Option<TicketError>,
}

impl WebError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebError::NotFound { .. } | WebError::Ticket(TicketError::NotFound { .. }) => {
                StatusCode::NOT_FOUND
            }
            WebError::BadRequest { .. }
            | WebError::Ticket(TicketError::InvalidTransition { .. }) => StatusCode::BAD_REQUEST,
            WebError::Io(_)
            | WebError::Internal { .. }
            | WebError::Ticket(TicketError::Storage { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServiceError> for WebError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Ticket(inner) => inner.into(),
            ServiceError::InvalidInput { message } => WebError::BadRequest { message },
        }
    }
}

impl From<TicketError> for WebError {
    fn from(err: TicketError) -> Self {
        WebError::Ticket(err)
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let ticket_error = match &self {
            WebError::Ticket(err) => Some(err.clone()),
            _ => None,
        };
        let body = ErrorBody {
            error: self.to_string(),
            ticket_error,
        };
        (status, Json(body)).into_response()
    }
}
