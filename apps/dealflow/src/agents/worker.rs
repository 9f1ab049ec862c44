use std::sync::Arc;

use async_trait::async_trait;

use super::errors::WorkerError;
use super::roles::{
    AnalystWorker, ContractWorker, NegotiatorWorker, PortfolioWorker, ScoutWorker,
    SupervisorWorker,
};
use super::types::{StepContext, WorkerOutput};
use crate::domain::run::{Role, SharedState};

/// One node of the workflow graph
///
/// `execute` receives an immutable snapshot and returns the next state plus
/// log drafts. It must emit exactly one summary draft, must be safe to run
/// again on the same snapshot, and must never touch the run id, status,
/// context or message log.
#[async_trait]
pub trait RoleWorker: Send + Sync {
    fn role(&self) -> Role;

    async fn execute(
        &self,
        state: &SharedState,
        ctx: &StepContext,
    ) -> Result<WorkerOutput, WorkerError>;
}

/// The closed set of workers a run can dispatch to
pub enum Worker {
    Supervisor(Arc<SupervisorWorker>),
    Scout(ScoutWorker),
    Analyst(AnalystWorker),
    Negotiator(NegotiatorWorker),
    Contract(ContractWorker),
    Portfolio(PortfolioWorker),
}

impl Worker {
    fn inner(&self) -> &dyn RoleWorker {
        match self {
            Worker::Supervisor(w) => w.as_ref(),
            Worker::Scout(w) => w,
            Worker::Analyst(w) => w,
            Worker::Negotiator(w) => w,
            Worker::Contract(w) => w,
            Worker::Portfolio(w) => w,
        }
    }
}

#[async_trait]
impl RoleWorker for Worker {
    fn role(&self) -> Role {
        self.inner().role()
    }

    async fn execute(
        &self,
        state: &SharedState,
        ctx: &StepContext,
    ) -> Result<WorkerOutput, WorkerError> {
        self.inner().execute(state, ctx).await
    }
}
