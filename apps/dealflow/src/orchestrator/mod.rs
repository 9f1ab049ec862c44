// Orchestrator
//
// Owns every run document: drives one worker per step, validates what the
// worker handed back, routes, pauses for humans and checkpoints.

pub mod contract;
pub mod engine;
pub mod errors;
pub mod escalation;

pub use contract::validate_output;
pub use engine::Orchestrator;
pub use errors::{OrchestratorError, OrchestratorResult};
pub use escalation::apply_human_input;
