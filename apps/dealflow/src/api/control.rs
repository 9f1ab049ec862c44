use std::sync::Arc;

use chrono::{DateTime, Utc};
use http::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::agents::{Advisor, DomainServices, Registry};
use crate::api::errors::ApiError;
use crate::config::OrchestratorConfig;
use crate::domain::clock::Clock;
use crate::domain::deal::{Deal, DealId, DealStatus};
use crate::domain::repositories::CheckpointStore;
use crate::domain::run::{
    FailureRecord, HumanInput, PendingEscalation, Role, RunContext, SharedState, WorkflowStatus,
};
use crate::orchestrator::{Orchestrator, OrchestratorError};

/// Request body for starting a run
#[derive(Debug, Clone, Deserialize)]
pub struct StartRunRequest {
    pub context: RunContext,
    /// Deals already known before discovery
    #[serde(default)]
    pub deals: Vec<Deal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DealSummary {
    pub id: DealId,
    pub address: String,
    pub status: DealStatus,
    pub score: f64,
    pub committed: Option<Decimal>,
}

impl From<&Deal> for DealSummary {
    fn from(deal: &Deal) -> Self {
        Self {
            id: deal.id(),
            address: deal.listing().address.clone(),
            status: deal.status(),
            score: deal.effective_score(),
            committed: deal.committed_amount(),
        }
    }
}

/// Compact view of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: WorkflowStatus,
    pub version: u64,
    pub current_step: Option<Role>,
    pub next_action: Option<Role>,
    pub focus_deal: Option<DealId>,
    pub human_approval_required: bool,
    pub escalation: Option<PendingEscalation>,
    pub failure: Option<FailureRecord>,
    pub deals: Vec<DealSummary>,
    pub messages: usize,
    pub steps: u64,
    pub updated_at: DateTime<Utc>,
}

impl From<&SharedState> for RunSummary {
    fn from(state: &SharedState) -> Self {
        Self {
            run_id: state.run_id(),
            status: state.workflow_status(),
            version: state.version(),
            current_step: state.current_step(),
            next_action: state.next_action(),
            focus_deal: state.focus_deal(),
            human_approval_required: state.human_approval_required(),
            escalation: state.escalation().cloned(),
            failure: state.failure().cloned(),
            deals: state.deals().iter().map(DealSummary::from).collect(),
            messages: state.agent_messages().len(),
            steps: state.step_count(),
            updated_at: state.updated_at(),
        }
    }
}

/// Successful run control result
#[derive(Debug, Clone)]
pub struct ControlResponse {
    pub status: StatusCode,
    pub run: RunSummary,
}

impl ControlResponse {
    fn new(status: StatusCode, state: &SharedState) -> Self {
        Self {
            status,
            run: RunSummary::from(state),
        }
    }
}

/// Run control surface
///
/// Start, inspect, resume and cancel runs. Owns the registry lifetime:
/// `bootstrap` registers every role and rehydrates active runs from the
/// checkpoint store, `shutdown` tears the registry down.
pub struct RunControl {
    orchestrator: Arc<Orchestrator>,
}

impl RunControl {
    /// Wires the registry and orchestrator
    ///
    /// # Errors
    /// 500 when active runs cannot be read back from the checkpoint store.
    pub async fn bootstrap(
        config: OrchestratorConfig,
        store: Arc<dyn CheckpointStore>,
        services: DomainServices,
        clock: Arc<dyn Clock>,
        advisor: Option<Arc<Advisor>>,
    ) -> Result<Self, ApiError> {
        let registry = Arc::new(Registry::new(&config, services, clock.clone(), advisor));
        registry.register().await;

        let orchestrator = Arc::new(Orchestrator::new(registry, store, clock, config));
        let recovered = orchestrator.recover().await?;
        info!(recovered = recovered.len(), "Run control ready");

        Ok(Self { orchestrator })
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub async fn shutdown(&self) {
        self.orchestrator.registry().teardown().await;
    }

    /// Starts a run and drives it until it pauses or finishes
    ///
    /// 201 on success, 500 with the snapshot if a worker failed the run.
    pub async fn start(&self, request: StartRunRequest) -> Result<ControlResponse, ApiError> {
        let initial = SharedState::new(request.context)
            .and_then(|state| state.with_deals(request.deals))
            .map_err(|e| ApiError::bad_request(e.to_string()))?;

        let run_id = self.orchestrator.start_workflow(initial).await?;
        match self.drive(run_id).await {
            Ok(state) => settled(StatusCode::CREATED, state),
            Err(e) => Err(self.with_snapshot(e, run_id).await),
        }
    }

    /// 200 with the run summary
    pub async fn status(&self, run_id: Uuid) -> Result<ControlResponse, ApiError> {
        let state = self.orchestrator.get_workflow_state(run_id).await?;
        Ok(ControlResponse::new(StatusCode::OK, &state))
    }

    /// Applies human input and drives the run until it pauses or finishes
    ///
    /// 409 unless the run awaits human input, 500 if a worker failed the run.
    pub async fn resume(&self, run_id: Uuid, input: HumanInput) -> Result<ControlResponse, ApiError> {
        if let Err(e) = self.orchestrator.continue_workflow(run_id, input).await {
            return Err(self.with_snapshot(e, run_id).await);
        }
        match self.drive(run_id).await {
            Ok(state) => settled(StatusCode::OK, state),
            Err(e) => Err(self.with_snapshot(e, run_id).await),
        }
    }

    /// 200 once cancellation is recorded or requested, 409 for finished runs
    pub async fn cancel(&self, run_id: Uuid) -> Result<ControlResponse, ApiError> {
        if let Err(e) = self.orchestrator.cancel(run_id).await {
            return Err(self.with_snapshot(e, run_id).await);
        }
        let state = self.orchestrator.get_workflow_state(run_id).await?;
        Ok(ControlResponse::new(StatusCode::OK, &state))
    }

    async fn drive(&self, run_id: Uuid) -> Result<SharedState, OrchestratorError> {
        let state = self.orchestrator.get_workflow_state(run_id).await?;
        if state.workflow_status() == WorkflowStatus::Running {
            return self.orchestrator.run_until_paused(run_id).await;
        }
        Ok(state)
    }

    async fn with_snapshot(&self, err: OrchestratorError, run_id: Uuid) -> ApiError {
        let api = ApiError::from(err);
        match self.orchestrator.get_workflow_state(run_id).await {
            Ok(state) => api.with_snapshot(state),
            Err(_) => api,
        }
    }
}

/// Failed runs surface as 500 with the final snapshot
fn settled(status: StatusCode, state: SharedState) -> Result<ControlResponse, ApiError> {
    if state.workflow_status() == WorkflowStatus::Failed {
        let message = state
            .failure()
            .map(|f| format!("Run failed at {}: {}", f.node, f.error))
            .unwrap_or_else(|| "Run failed".to_string());
        return Err(ApiError::internal_server_error(message).with_snapshot(state));
    }
    Ok(ControlResponse::new(status, &state))
}
