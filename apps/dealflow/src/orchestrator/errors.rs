use thiserror::Error;
use uuid::Uuid;

use crate::domain::run::WorkflowStatus;
use crate::domain::DomainError;

/// Run-level errors returned synchronously by the orchestrator
///
/// None of these mutate SharedState. Worker failures are not errors at this
/// level: they end up in the run itself, as a Failed status and an error
/// message in the log.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Run not found: {0}")]
    NotFound(Uuid),

    #[error("Run {run_id} is {status}: {message}")]
    InvalidState {
        run_id: Uuid,
        status: WorkflowStatus,
        message: String,
    },

    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),
}

impl OrchestratorError {
    pub fn invalid_state(run_id: Uuid, status: WorkflowStatus, message: impl Into<String>) -> Self {
        Self::InvalidState {
            run_id,
            status,
            message: message.into(),
        }
    }
}

impl From<DomainError> for OrchestratorError {
    fn from(err: DomainError) -> Self {
        OrchestratorError::Validation(err.to_string())
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
