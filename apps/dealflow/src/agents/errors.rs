use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::services::ServiceError;
use crate::domain::DomainError;

/// Errors that can occur in the agent system outside a worker step
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Text generation error: {0}")]
    LlmError(String),

    #[error("Text generation timed out after {0:?}")]
    LlmTimeout(Duration),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Message delivery failed: {0}")]
    MessageDeliveryFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Error returned by a worker invocation
///
/// Recoverable errors are retried on the same node; fatal ones fail the run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum WorkerError {
    #[error("recoverable: {0}")]
    Recoverable(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl WorkerError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WorkerError::Recoverable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            WorkerError::Recoverable(msg) | WorkerError::Fatal(msg) => msg,
        }
    }
}

impl From<ServiceError> for WorkerError {
    fn from(err: ServiceError) -> Self {
        if err.is_transient() {
            WorkerError::Recoverable(err.to_string())
        } else {
            WorkerError::Fatal(err.to_string())
        }
    }
}

/// Domain invariant violations inside a worker are contract violations
impl From<DomainError> for WorkerError {
    fn from(err: DomainError) -> Self {
        WorkerError::Fatal(err.to_string())
    }
}

impl From<AgentError> for WorkerError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::LlmTimeout(_) | AgentError::MessageDeliveryFailed(_) => {
                WorkerError::Recoverable(err.to_string())
            }
            other => WorkerError::Fatal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_service_errors_are_recoverable() {
        let err: WorkerError = ServiceError::Timeout("listing feed".to_string()).into();
        assert!(err.is_recoverable());

        let err: WorkerError = ServiceError::Unavailable("crm".to_string()).into();
        assert!(err.is_recoverable());
    }

    #[test]
    fn rejected_service_calls_are_fatal() {
        let err: WorkerError = ServiceError::Rejected("bad payload".to_string()).into();

        assert!(!err.is_recoverable());
        assert!(err.message().contains("bad payload"));
    }

    #[test]
    fn unknown_agent_is_fatal() {
        let err: WorkerError = AgentError::AgentNotFound("analyst".to_string()).into();

        assert!(matches!(err, WorkerError::Fatal(_)));
    }
}
