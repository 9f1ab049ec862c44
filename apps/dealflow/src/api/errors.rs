use http::StatusCode;
use serde_json::{json, Value};

use crate::domain::run::SharedState;
use crate::orchestrator::OrchestratorError;

/// Run control error with status code, message and the run snapshot
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    /// Current state of the run, when the run exists
    pub snapshot: Option<SharedState>,
}

impl ApiError {
    /// Creates a new API error
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            snapshot: None,
        }
    }

    /// Creates a 400 Bad Request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Creates a 404 Not Found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Creates a 409 Conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// Creates a 500 Internal Server Error
    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn with_snapshot(mut self, snapshot: SharedState) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// JSON error body
    pub fn body(&self) -> Value {
        json!({
            "error": self.message,
            "status": self.status.as_u16(),
            "run": self.snapshot,
        })
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let message = err.to_string();
        match err {
            OrchestratorError::Validation(_) => Self::bad_request(message),
            OrchestratorError::NotFound(_) => Self::not_found(message),
            OrchestratorError::InvalidState { .. } => Self::conflict(message),
            OrchestratorError::Checkpoint(_) => Self::internal_server_error(message),
        }
    }
}
