// Bus-served capabilities
//
// A responder drains one agent's mailbox on its own Tokio task and answers
// each request through a TaskHandler. Requests are acknowledged only after
// the response went out, so a crash mid-handling leads to redelivery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::bus::MessageBus;
use super::errors::{AgentError, AgentResult};
use super::messages::{TaskInbox, TaskRequest};
use super::roles::negotiator::MAX_OFFER_TASK;
use super::services::FinancialAnalysis;
use crate::domain::deal::Deal;
use crate::domain::run::{Role, RunContext};

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Bus name whose mailbox this handler drains
    fn agent(&self) -> &str;

    async fn handle(&self, request: &TaskRequest) -> AgentResult<serde_json::Value>;
}

pub struct ResponderHandle {
    agent: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ResponderHandle {
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Stops the loop after the request in hand, if any
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(agent = %self.agent, error = %e, "Responder task ended abnormally");
        }
    }
}

/// Runs `handler` against its mailbox until shut down
pub fn spawn_responder(
    bus: Arc<MessageBus>,
    handler: Arc<dyn TaskHandler>,
    poll_interval: Duration,
) -> ResponderHandle {
    let (shutdown, mut stop) = watch::channel(false);
    let agent = handler.agent().to_string();
    let name = agent.clone();

    let task = tokio::spawn(async move {
        let mut inbox = TaskInbox::new();
        info!(agent = %name, "Responder started");
        loop {
            let next = tokio::select! {
                _ = stop.changed() => break,
                next = bus.next_request(&name, poll_interval) => next,
            };
            let request = match next {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) => {
                    warn!(agent = %name, error = %e, "Responder cannot read its mailbox");
                    break;
                }
            };

            if !inbox.accept(&request, bus.clock().now()) {
                debug!(agent = %name, correlation_id = %request.correlation_id, "Duplicate request dropped");
                bus.acknowledge(&name, request.correlation_id).await;
                continue;
            }

            let result = match handler.handle(&request).await {
                Ok(value) => value,
                Err(e) => json!({ "error": e.to_string() }),
            };
            match bus
                .send_task_response(&name, &request.sender, request.correlation_id, result)
                .await
            {
                Ok(()) => {
                    bus.acknowledge(&name, request.correlation_id).await;
                }
                Err(e) => {
                    warn!(agent = %name, correlation_id = %request.correlation_id, error = %e, "Response not delivered");
                }
            }
        }
        info!(agent = %name, "Responder stopped");
    });

    ResponderHandle {
        agent,
        shutdown,
        task,
    }
}

#[derive(Deserialize)]
struct MaxOfferPayload {
    deal: Deal,
    context: RunContext,
}

/// The Analyst's valuation desk: answers max-offer requests
pub struct ValuationDesk {
    analysis: Arc<dyn FinancialAnalysis>,
}

impl ValuationDesk {
    pub fn new(analysis: Arc<dyn FinancialAnalysis>) -> Self {
        Self { analysis }
    }
}

#[async_trait]
impl TaskHandler for ValuationDesk {
    fn agent(&self) -> &str {
        Role::Analyst.agent_name()
    }

    async fn handle(&self, request: &TaskRequest) -> AgentResult<serde_json::Value> {
        if request.task != MAX_OFFER_TASK {
            return Err(AgentError::MessageDeliveryFailed(format!(
                "analyst does not handle task {}",
                request.task
            )));
        }
        let payload: MaxOfferPayload = serde_json::from_value(request.payload.clone())?;
        let max_offer: Decimal = self
            .analysis
            .max_offer(&payload.deal, &payload.context)
            .await
            .map_err(|e| AgentError::MessageDeliveryFailed(e.to_string()))?;
        Ok(json!({ "deal_id": payload.deal.id(), "max_offer": max_offer }))
    }
}
