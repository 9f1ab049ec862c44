// API layer module (adapters for controllers)
// Follows Hexagonal Architecture - the run control surface is an adapter

pub mod control;
pub mod errors;

pub use control::{ControlResponse, DealSummary, RunControl, RunSummary, StartRunRequest};
pub use errors::ApiError;
