use thiserror::Error;

use super::deal::value_objects::{DealId, DealStatus};

/// Errors raised when a domain invariant would be violated
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("Invalid deal transition from {from} to {to}")]
    InvalidTransition { from: DealStatus, to: DealStatus },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Deal not found: {0}")]
    DealNotFound(DealId),

    #[error("Duplicate deal id: {0}")]
    DuplicateDeal(DealId),
}
