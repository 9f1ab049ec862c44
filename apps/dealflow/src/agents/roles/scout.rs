use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};

use crate::agents::errors::WorkerError;
use crate::agents::services::{ListingSource, ServiceError};
use crate::agents::types::{StepContext, WorkerOutput};
use crate::agents::worker::RoleWorker;
use crate::domain::deal::scoring::{ranking_order, Ranked};
use crate::domain::deal::{Deal, DealScore, Listing, ScoreComponents};
use crate::domain::run::{MessageDraft, Role, RunContext, SharedState};

/// Confidence attached to a lead score; listings alone say little
const LEAD_CONFIDENCE: f64 = 0.5;

/// Discovers new deals from every listing source
pub struct ScoutWorker {
    sources: Vec<Arc<dyn ListingSource>>,
    max_new_deals: usize,
}

struct Lead {
    listing: Listing,
    score: DealScore,
}

impl Ranked for Lead {
    fn overall_score(&self) -> f64 {
        self.score.overall_score
    }

    fn confidence_level(&self) -> f64 {
        self.score.confidence_level
    }

    fn listing_price(&self) -> Decimal {
        self.listing.listing_price
    }
}

impl ScoutWorker {
    pub fn new(sources: Vec<Arc<dyn ListingSource>>, max_new_deals: usize) -> Self {
        Self {
            sources,
            max_new_deals,
        }
    }

    /// Queries every source concurrently and keeps whatever succeeded
    ///
    /// # Errors
    /// Only when every source failed: fatal if any failure was fatal,
    /// recoverable otherwise.
    async fn gather(&self, context: &RunContext) -> Result<(Vec<Listing>, usize), WorkerError> {
        let results = join_all(self.sources.iter().map(|s| s.search(context))).await;

        let mut listings = Vec::new();
        let mut failures: Vec<ServiceError> = Vec::new();
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(found) => listings.extend(found),
                Err(e) => {
                    warn!(source = source.name(), error = %e, "Listing source failed");
                    failures.push(e);
                }
            }
        }

        if !self.sources.is_empty() && failures.len() == self.sources.len() {
            let message = format!(
                "All {} listing sources failed: {}",
                failures.len(),
                failures
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ")
            );
            return Err(if failures.iter().all(ServiceError::is_transient) {
                WorkerError::Recoverable(message)
            } else {
                WorkerError::Fatal(message)
            });
        }
        Ok((listings, failures.len()))
    }
}

/// Scores a listing from what the listing itself reveals
fn lead_score(listing: &Listing, state: &SharedState) -> Result<DealScore, WorkerError> {
    let context = state.context();
    let price = listing.listing_price.to_f64().unwrap_or(0.0);

    let profit_potential = match listing.estimated_value.and_then(|v| v.to_f64()) {
        Some(value) if price > 0.0 => (value - price) / price * 50.0,
        _ => 5.0,
    };
    let capital = state.uncommitted_capital().to_f64().unwrap_or(0.0);
    let deal_feasibility = if capital > 0.0 {
        10.0 * (1.0 - price / capital)
    } else {
        0.0
    };
    let components = ScoreComponents {
        profit_potential,
        deal_feasibility,
        seller_motivation: f64::from(listing.days_on_market) / 12.0,
        market_conditions: context.market_conditions.market_score,
    };

    Ok(DealScore::compute(
        components,
        &context.investment_criteria.weights,
        LEAD_CONFIDENCE,
    )?)
}

#[async_trait]
impl RoleWorker for ScoutWorker {
    fn role(&self) -> Role {
        Role::Scout
    }

    async fn execute(
        &self,
        state: &SharedState,
        ctx: &StepContext,
    ) -> Result<WorkerOutput, WorkerError> {
        let context = state.context();
        let criteria = &context.investment_criteria;
        let (listings, failed_sources) = self.gather(context).await?;
        let found = listings.len();

        let uncommitted = state.uncommitted_capital();
        let mut seen = HashSet::new();
        let mut leads = Vec::new();
        for listing in listings {
            let id = listing.deal_id();
            if state.deal(id).is_some() || !seen.insert(id) {
                continue;
            }
            if criteria.max_price.map_or(false, |max| listing.listing_price > max)
                || listing.listing_price > uncommitted
                || !criteria.accepts_market(&listing.market)
            {
                continue;
            }
            let score = lead_score(&listing, state)?;
            leads.push(Lead { listing, score });
        }
        leads.sort_by(ranking_order);
        leads.truncate(self.max_new_deals);

        let mut next = state.clone();
        let mut output_drafts = Vec::new();
        let mut sequence = state.next_deal_sequence();
        for lead in leads {
            let deal = Deal::discover(
                lead.listing,
                sequence,
                lead.score.overall_score,
                Role::Scout,
                ctx.now,
            );
            sequence += 1;
            output_drafts.push(
                MessageDraft::detail(
                    Role::Scout,
                    format!(
                        "Discovered {} at {} (lead score {:.2})",
                        deal.listing().address,
                        deal.listing().listing_price,
                        deal.lead_score()
                    ),
                )
                .for_deal(deal.id()),
            );
            next.add_deal(deal)?;
        }
        next.record_discovery_round();

        let added = output_drafts.len();
        info!(run_id = %ctx.run_id, found, added, failed_sources, "Discovery round complete");

        let mut output = WorkerOutput::new(next);
        output.drafts = output_drafts;
        output.push(
            MessageDraft::summary(
                Role::Scout,
                format!(
                    "Discovery round {}: {} listings, {} new deals",
                    state.discovery_rounds() + 1,
                    found,
                    added
                ),
            )
            .with_payload(json!({
                "listings_found": found,
                "deals_added": added,
                "failed_sources": failed_sources,
            })),
        );
        Ok(output)
    }
}
