use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::agents::errors::WorkerError;
use crate::agents::services::PortfolioStore;
use crate::agents::types::{StepContext, WorkerOutput};
use crate::agents::worker::RoleWorker;
use crate::domain::deal::{Deal, DealStatus};
use crate::domain::run::{MessageDraft, Role, SharedState};

/// Books closed deals into the portfolio
pub struct PortfolioWorker {
    portfolio: Arc<dyn PortfolioStore>,
}

impl PortfolioWorker {
    pub fn new(portfolio: Arc<dyn PortfolioStore>) -> Self {
        Self { portfolio }
    }
}

#[async_trait]
impl RoleWorker for PortfolioWorker {
    fn role(&self) -> Role {
        Role::Portfolio
    }

    async fn execute(
        &self,
        state: &SharedState,
        _ctx: &StepContext,
    ) -> Result<WorkerOutput, WorkerError> {
        let closed: Vec<&Deal> = state
            .deals()
            .iter()
            .filter(|d| {
                d.is_live() && d.status() == DealStatus::Closed && d.portfolio_asset_id().is_none()
            })
            .collect();

        let mut next = state.clone();
        let mut drafts = Vec::new();
        let mut assets = Vec::new();
        for deal in closed {
            let asset_id = self.portfolio.integrate(deal).await?;
            if let Some(target) = next.deal_mut(deal.id()) {
                target.mark_integrated(asset_id.clone(), Role::Portfolio);
            }
            drafts.push(
                MessageDraft::detail(
                    Role::Portfolio,
                    format!("{} booked as asset {}", deal.listing().address, asset_id),
                )
                .for_deal(deal.id()),
            );
            assets.push(asset_id);
        }

        let mut output = WorkerOutput::new(next);
        output.drafts = drafts;
        output.push(
            MessageDraft::summary(
                Role::Portfolio,
                format!("Integrated {} closed deals", assets.len()),
            )
            .with_payload(json!({ "assets": assets })),
        );
        Ok(output)
    }
}
