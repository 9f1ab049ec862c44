//! Worker registry.
//!
//! Built once per process. Holds one worker per role plus the bus they share,
//! registers every role on that bus and runs the bus-served responders.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::info;

use super::advisor::Advisor;
use super::bus::MessageBus;
use super::responder::{spawn_responder, ResponderHandle, ValuationDesk};
use super::roles::{
    AnalystWorker, ContractWorker, NegotiatorWorker, PortfolioWorker, ScoutWorker,
    SupervisorWorker,
};
use super::router::Router;
use super::services::{DomainServices, FinancialAnalysis};
use super::worker::{RoleWorker, Worker};
use crate::config::OrchestratorConfig;
use crate::domain::clock::Clock;
use crate::domain::run::Role;

const RESPONDER_POLL: Duration = Duration::from_millis(250);

pub struct Registry {
    supervisor: Arc<SupervisorWorker>,
    workers: Vec<Worker>,
    bus: Arc<MessageBus>,
    analysis: Arc<dyn FinancialAnalysis>,
    responders: Mutex<Vec<ResponderHandle>>,
}

impl Registry {
    /// Wires every role to its services without touching the bus yet
    pub fn new(
        config: &OrchestratorConfig,
        services: DomainServices,
        clock: Arc<dyn Clock>,
        advisor: Option<Arc<Advisor>>,
    ) -> Self {
        let bus = Arc::new(MessageBus::new(config.bus_config(), clock));
        let router = Router::new(config.routing_policy());

        let supervisor = Arc::new(SupervisorWorker::new(router, advisor));
        let workers = vec![
            Worker::Supervisor(supervisor.clone()),
            Worker::Scout(ScoutWorker::new(
                services.listing_sources.clone(),
                config.max_new_deals,
            )),
            Worker::Analyst(AnalystWorker::new(services.analysis.clone())),
            Worker::Negotiator(NegotiatorWorker::new(
                services.negotiation.clone(),
                bus.clone(),
                config.bus_response_timeout(),
            )),
            Worker::Contract(ContractWorker::new(
                services.contracts.clone(),
                config.required_documents.clone(),
                config.contingency_period(),
            )),
            Worker::Portfolio(PortfolioWorker::new(services.portfolio.clone())),
        ];

        Self {
            supervisor,
            workers,
            bus,
            analysis: services.analysis,
            responders: Mutex::new(Vec::new()),
        }
    }

    /// Registers every role on the bus and starts the responders
    ///
    /// Safe to call again; registration is an upsert and responders are only
    /// started once.
    pub async fn register(&self) {
        for role in Role::ALL {
            self.bus
                .register_agent(role.agent_name(), role.capabilities().iter().copied())
                .await;
        }

        let mut responders = self.responders.lock().await;
        if responders.is_empty() {
            let desk = Arc::new(ValuationDesk::new(self.analysis.clone()));
            responders.push(spawn_responder(self.bus.clone(), desk, RESPONDER_POLL));
        }
        info!(agents = Role::ALL.len(), responders = responders.len(), "Registry ready");
    }

    /// Stops responders and marks every role inactive
    pub async fn teardown(&self) {
        let handles: Vec<ResponderHandle> = self.responders.lock().await.drain(..).collect();
        for handle in handles {
            handle.shutdown().await;
        }
        for role in Role::ALL {
            let _ = self.bus.deregister_agent(role.agent_name()).await;
        }
        info!("Registry torn down");
    }

    pub fn worker(&self, role: Role) -> Option<&Worker> {
        self.workers.iter().find(|w| w.role() == role)
    }

    pub fn supervisor(&self) -> &SupervisorWorker {
        &self.supervisor
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }
}
