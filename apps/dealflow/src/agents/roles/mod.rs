// Worker roles
//
// One module per node of the workflow graph. Each worker clones the snapshot
// it is given, changes the clone and hands it back with its log drafts.

pub mod analyst;
pub mod contract;
pub mod negotiator;
pub mod portfolio;
pub mod scout;
pub mod supervisor;

pub use analyst::AnalystWorker;
pub use contract::ContractWorker;
pub use negotiator::NegotiatorWorker;
pub use portfolio::PortfolioWorker;
pub use scout::ScoutWorker;
pub use supervisor::SupervisorWorker;

use super::errors::WorkerError;
use super::types::StepContext;
use crate::domain::deal::{Deal, DealId};
use crate::domain::run::{Role, SharedState};

/// The deal the Router pointed this step at
///
/// A missing or unknown focus is a contract violation between the Router and
/// the worker, so it is fatal.
fn focus_deal(state: &SharedState, ctx: &StepContext, role: Role) -> Result<DealId, WorkerError> {
    let id = ctx
        .focus_deal
        .ok_or_else(|| WorkerError::Fatal(format!("{} invoked without a focus deal", role)))?;
    state
        .deal(id)
        .filter(|d| d.is_live())
        .map(Deal::id)
        .ok_or_else(|| WorkerError::Fatal(format!("{} focus deal {} is not live", role, id)))
}
