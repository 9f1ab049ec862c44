use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};

use crate::agents::bus::MessageBus;
use crate::agents::errors::WorkerError;
use crate::agents::messages::TaskPriority;
use crate::agents::services::{NegotiationRequest, NegotiationService};
use crate::agents::types::{StepContext, WorkerOutput};
use crate::agents::worker::RoleWorker;
use crate::domain::deal::{Deal, DealStatus, Outreach, Recommendation};
use crate::domain::run::{ComplianceKind, MessageDraft, Role, SharedState};

use super::focus_deal;

/// Bus task the Analyst answers with a maximum offer
pub const MAX_OFFER_TASK: &str = "max_offer";

/// Approves, values and negotiates the focus deal
pub struct NegotiatorWorker {
    negotiation: Arc<dyn NegotiationService>,
    bus: Arc<MessageBus>,
    response_timeout: Duration,
}

impl NegotiatorWorker {
    pub fn new(
        negotiation: Arc<dyn NegotiationService>,
        bus: Arc<MessageBus>,
        response_timeout: Duration,
    ) -> Self {
        Self {
            negotiation,
            bus,
            response_timeout,
        }
    }

    /// Asks the Analyst for a max offer over the bus
    ///
    /// Returns `None` when the Analyst is unreachable, too slow or answers
    /// with something unusable.
    async fn request_max_offer(&self, state: &SharedState, deal: &Deal) -> Option<Decimal> {
        let me = Role::Negotiator.agent_name();
        let payload = json!({ "deal": deal, "context": state.context() });
        let correlation_id = match self
            .bus
            .send_task_request(
                me,
                Role::Analyst.agent_name(),
                MAX_OFFER_TASK,
                payload,
                TaskPriority::High,
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(deal_id = %deal.id(), error = %e, "Valuation request not sent");
                return None;
            }
        };

        let response = self
            .bus
            .await_response(me, correlation_id, self.response_timeout)
            .await?;
        match serde_json::from_value::<Decimal>(response.result["max_offer"].clone()) {
            Ok(value) if value > Decimal::ZERO => Some(value),
            _ => {
                warn!(deal_id = %deal.id(), result = %response.result, "Unusable valuation response");
                None
            }
        }
    }
}

#[async_trait]
impl RoleWorker for NegotiatorWorker {
    fn role(&self) -> Role {
        Role::Negotiator
    }

    async fn execute(
        &self,
        state: &SharedState,
        ctx: &StepContext,
    ) -> Result<WorkerOutput, WorkerError> {
        let deal_id = focus_deal(state, ctx, Role::Negotiator)?;
        let criteria = &state.context().investment_criteria;
        let mut next = state.clone();
        let mut drafts = Vec::new();

        let deal = next
            .deal_mut(deal_id)
            .ok_or_else(|| WorkerError::Fatal(format!("deal {} vanished", deal_id)))?;

        if deal.status() == DealStatus::Analyzed {
            if deal.recommendation() != Some(Recommendation::Proceed) {
                return Err(WorkerError::Fatal(format!(
                    "deal {} is not recommended for outreach",
                    deal_id
                )));
            }

            let price = deal.listing().listing_price;
            let uncommitted = state.uncommitted_capital();
            if price > uncommitted && !deal.issue_approved(ComplianceKind::CapitalLimit) {
                let detail = format!(
                    "Listing price {} exceeds uncommitted capital {}",
                    price, uncommitted
                );
                deal.raise_issue(ComplianceKind::CapitalLimit, detail.clone(), Role::Negotiator);
                drafts.push(
                    MessageDraft::detail(Role::Negotiator, detail.clone()).for_deal(deal_id),
                );
                let mut output = WorkerOutput::new(next);
                output.drafts = drafts;
                output.push(
                    MessageDraft::summary(Role::Negotiator, "Outreach held for capital approval")
                        .for_deal(deal_id),
                );
                return Ok(output);
            }

            let approved = deal.advance(
                DealStatus::Approved,
                Role::Negotiator,
                "recommended to proceed and within capital",
            )?;
            drafts.push(MessageDraft::transition(&approved));
        }

        if deal.status() != DealStatus::Approved || deal.outreach().is_some() {
            return Err(WorkerError::Fatal(format!(
                "deal {} is {} and cannot start outreach",
                deal_id,
                deal.status()
            )));
        }

        let snapshot = deal.clone();
        let listing_price = snapshot.listing().listing_price;
        let fallback = (listing_price * criteria.default_offer_ratio).round_dp(2);
        let (max_offer, degraded) = match self.request_max_offer(state, &snapshot).await {
            Some(value) => (value, false),
            None => (fallback, true),
        };
        let opening_offer = fallback.min(max_offer);

        let outcome = self
            .negotiation
            .negotiate(&NegotiationRequest {
                deal: snapshot,
                opening_offer,
                max_offer,
            })
            .await?;
        info!(
            run_id = %ctx.run_id,
            deal_id = %deal_id,
            %opening_offer,
            %max_offer,
            degraded,
            agreed = outcome.agreed_price.is_some(),
            "Negotiation finished"
        );

        let deal = next
            .deal_mut(deal_id)
            .ok_or_else(|| WorkerError::Fatal(format!("deal {} vanished", deal_id)))?;
        deal.start_outreach(Outreach {
            opening_offer,
            max_offer,
            degraded_valuation: degraded,
            agreed_price: outcome.agreed_price,
            rounds: outcome.rounds,
            script_ref: outcome.script_ref.clone(),
        });
        let negotiating = deal.advance(
            DealStatus::Negotiating,
            Role::Negotiator,
            format!("opened at {} with ceiling {}", opening_offer, max_offer),
        )?;
        drafts.push(MessageDraft::transition(&negotiating));

        let summary = match outcome.agreed_price {
            Some(price) => {
                let detail = format!("Seller accepted {}; signing requires approval", price);
                deal.raise_issue(ComplianceKind::OfferSignoff, detail.clone(), Role::Negotiator);
                drafts.push(MessageDraft::detail(Role::Negotiator, detail).for_deal(deal_id));
                format!("Offer of {} accepted after {} rounds", price, outcome.rounds)
            }
            None => {
                let reason = format!("seller declined after {} rounds", outcome.rounds);
                deal.abandon(reason.clone(), Role::Negotiator);
                drafts.push(
                    MessageDraft::detail(Role::Negotiator, format!("Deal abandoned: {}", reason))
                        .for_deal(deal_id),
                );
                format!("Negotiation failed: {}", reason)
            }
        };

        let mut output = WorkerOutput::new(next);
        output.drafts = drafts;
        output.push(
            MessageDraft::summary(Role::Negotiator, summary)
                .for_deal(deal_id)
                .with_payload(json!({
                    "opening_offer": opening_offer,
                    "max_offer": max_offer,
                    "degraded_valuation": degraded,
                    "agreed_price": outcome.agreed_price,
                })),
        );
        Ok(output)
    }
}
