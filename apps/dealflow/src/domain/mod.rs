// Domain layer module exports
// Aggregates and value objects for a single acquisition run.
// Domain is independent of infrastructure concerns

pub mod clock;
pub mod deal;
pub mod errors;
pub mod repositories;
pub mod run;

pub use errors::DomainError;
