use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::agents::advisor::Advisor;
use crate::agents::errors::WorkerError;
use crate::agents::router::{Router, RoutingDecision};
use crate::agents::types::{StepContext, WorkerOutput};
use crate::agents::worker::RoleWorker;
use crate::domain::run::{MessageDraft, Role, SharedState};

/// Entry node and owner of routing
pub struct SupervisorWorker {
    router: Router,
    advisor: Option<Arc<Advisor>>,
}

impl SupervisorWorker {
    pub fn new(router: Router, advisor: Option<Arc<Advisor>>) -> Self {
        Self { router, advisor }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    async fn advice(&self, state: &SharedState) -> Option<Role> {
        match &self.advisor {
            Some(advisor) => advisor.advise(state, &self.router).await,
            None => None,
        }
    }

    /// Picks the next node: optional advice, then the routing table
    pub async fn decide(&self, state: &SharedState) -> (RoutingDecision, Option<Role>) {
        let advice = self.advice(state).await;
        (self.router.route_with_advice(state, advice), advice)
    }
}

#[async_trait]
impl RoleWorker for SupervisorWorker {
    fn role(&self) -> Role {
        Role::Supervisor
    }

    async fn execute(
        &self,
        state: &SharedState,
        _ctx: &StepContext,
    ) -> Result<WorkerOutput, WorkerError> {
        state.context().validate()?;

        let mut next = state.clone();
        let hint = self.advice(state).await;
        next.set_advisory_hint(hint);

        let context = state.context();
        let mut output = WorkerOutput::new(next);
        output.push(
            MessageDraft::summary(
                Role::Supervisor,
                format!(
                    "Run intake: {} available capital, {} deals on file, market score {:.1}",
                    state.uncommitted_capital(),
                    state.deals().len(),
                    context.market_conditions.market_score
                ),
            )
            .with_payload(json!({
                "available_capital": context.available_capital,
                "target_markets": context.investment_criteria.target_markets,
                "advisory_hint": hint,
            })),
        );
        Ok(output)
    }
}
