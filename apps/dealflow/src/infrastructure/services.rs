// Reference domain service adapters
//
// Deterministic stand-ins for the external valuation, negotiation, drafting
// and portfolio systems. Good enough for demos and integration tests; real
// deployments plug their own adapters into `DomainServices`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::debug;

use crate::agents::services::{
    AnalysisReport, ContractService, DomainServices, FinancialAnalysis, ListingSource,
    NegotiationOutcome, NegotiationRequest, NegotiationService, PortfolioStore, ServiceError,
    ServiceResult,
};
use crate::domain::deal::{Deal, DealId, Listing, ScoreComponents};
use crate::domain::run::RunContext;

/// Listing source backed by a fixed list
pub struct StaticListingSource {
    name: String,
    listings: Vec<Listing>,
}

impl StaticListingSource {
    pub fn new(name: impl Into<String>, listings: Vec<Listing>) -> Self {
        Self {
            name: name.into(),
            listings,
        }
    }
}

#[async_trait]
impl ListingSource for StaticListingSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _context: &RunContext) -> ServiceResult<Vec<Listing>> {
        Ok(self.listings.clone())
    }
}

/// Rule-of-thumb valuation from the listing alone
///
/// Profit potential comes from the spread between the estimated value and
/// the asking price, feasibility from the share of capital the deal would
/// tie up. Listings without an estimate get a lower confidence.
#[derive(Debug, Clone)]
pub struct HeuristicAnalysis {
    /// Renovation budget as a fraction of the listing price
    pub renovation_ratio: Decimal,
    /// Max offer as a fraction of the estimated value
    pub offer_ratio: Decimal,
}

impl Default for HeuristicAnalysis {
    fn default() -> Self {
        Self {
            renovation_ratio: Decimal::new(5, 2),
            offer_ratio: Decimal::new(92, 2),
        }
    }
}

impl HeuristicAnalysis {
    fn renovation_estimate(&self, listing: &Listing) -> Decimal {
        (listing.listing_price * self.renovation_ratio).round_dp(2)
    }
}

#[async_trait]
impl FinancialAnalysis for HeuristicAnalysis {
    async fn analyze(&self, deal: &Deal, context: &RunContext) -> ServiceResult<AnalysisReport> {
        let listing = deal.listing();
        if listing.listing_price <= Decimal::ZERO {
            return Err(ServiceError::Invalid(format!(
                "listing {} has no price",
                listing.external_id
            )));
        }

        let price = listing.listing_price.to_f64().unwrap_or(0.0);
        let renovation = self.renovation_estimate(listing);
        let value = listing.estimated_value.unwrap_or(listing.listing_price);
        let margin = (value - listing.listing_price - renovation)
            .to_f64()
            .unwrap_or(0.0)
            / price;
        let capital = context.available_capital.to_f64().unwrap_or(0.0);

        let components = ScoreComponents {
            profit_potential: (5.0 + margin * 25.0).clamp(0.0, 10.0),
            deal_feasibility: if capital > 0.0 {
                (10.0 * (1.0 - price / capital)).clamp(0.0, 10.0)
            } else {
                0.0
            },
            seller_motivation: (listing.days_on_market as f64 / 12.0).clamp(0.0, 10.0),
            market_conditions: context.market_conditions.market_score,
        };
        let confidence_level = if listing.estimated_value.is_some() {
            0.85
        } else {
            0.6
        };

        debug!(deal_id = %deal.id(), margin, "Heuristic analysis");
        Ok(AnalysisReport {
            components,
            confidence_level,
            renovation_estimate: renovation,
            projected_roi: margin,
        })
    }

    async fn max_offer(&self, deal: &Deal, _context: &RunContext) -> ServiceResult<Decimal> {
        let listing = deal.listing();
        let value = listing.estimated_value.unwrap_or(listing.listing_price);
        Ok(((value - self.renovation_estimate(listing)) * self.offer_ratio).round_dp(2))
    }
}

/// Seller that counters until it reaches its floor or the buyer's ceiling
#[derive(Debug, Clone)]
pub struct CounterOfferNegotiation {
    /// Lowest acceptable price as a fraction of the listing price
    pub seller_floor_ratio: Decimal,
    /// Raise per round as a fraction of the current offer
    pub step_ratio: Decimal,
    pub max_rounds: u32,
}

impl Default for CounterOfferNegotiation {
    fn default() -> Self {
        Self {
            seller_floor_ratio: Decimal::new(85, 2),
            step_ratio: Decimal::new(2, 2),
            max_rounds: 10,
        }
    }
}

#[async_trait]
impl NegotiationService for CounterOfferNegotiation {
    async fn negotiate(&self, request: &NegotiationRequest) -> ServiceResult<NegotiationOutcome> {
        if request.opening_offer <= Decimal::ZERO || request.max_offer < request.opening_offer {
            return Err(ServiceError::Rejected(format!(
                "opening offer {} does not fit under max offer {}",
                request.opening_offer, request.max_offer
            )));
        }

        let floor = (request.deal.listing().listing_price * self.seller_floor_ratio).round_dp(2);
        let mut offer = request.opening_offer;
        let mut rounds = 1;
        while offer < floor && offer < request.max_offer && rounds < self.max_rounds {
            offer = (offer * (Decimal::ONE + self.step_ratio))
                .round_dp(2)
                .min(request.max_offer);
            rounds += 1;
        }

        let agreed_price = (offer >= floor).then_some(offer);
        Ok(NegotiationOutcome {
            agreed_price,
            rounds,
            script_ref: Some(format!("counter-offer/{}", request.deal.id())),
        })
    }
}

/// Drafts documents as template references
///
/// Contingencies clear when every document is drafted and the deadline has
/// not passed.
#[derive(Debug, Clone, Default)]
pub struct TemplateContractService;

#[async_trait]
impl ContractService for TemplateContractService {
    async fn draft_document(&self, deal: &Deal, kind: &str) -> ServiceResult<String> {
        if kind.trim().is_empty() {
            return Err(ServiceError::Invalid("document kind is empty".to_string()));
        }
        Ok(format!("templates/{}/{}", kind, deal.id()))
    }

    async fn clear_contingencies(&self, deal: &Deal, as_of: DateTime<Utc>) -> ServiceResult<bool> {
        let contract = deal.contract().ok_or_else(|| {
            ServiceError::Invalid(format!("deal {} has no contract", deal.id()))
        })?;
        Ok(contract.documents_complete() && as_of <= contract.contingency_deadline)
    }
}

/// Portfolio kept in memory, one asset per deal
#[derive(Debug, Default)]
pub struct InMemoryPortfolio {
    assets: Mutex<HashMap<DealId, String>>,
}

impl InMemoryPortfolio {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn assets(&self) -> HashMap<DealId, String> {
        self.assets.lock().await.clone()
    }
}

#[async_trait]
impl PortfolioStore for InMemoryPortfolio {
    async fn integrate(&self, deal: &Deal) -> ServiceResult<String> {
        let mut assets = self.assets.lock().await;
        let next = assets.len() + 1;
        let asset_id = assets
            .entry(deal.id())
            .or_insert_with(|| format!("asset-{:04}", next));
        Ok(asset_id.clone())
    }
}

/// Wires the reference adapters over a fixed set of listings
pub fn reference_services(listings: Vec<Listing>) -> DomainServices {
    DomainServices {
        listing_sources: vec![Arc::new(StaticListingSource::new("static", listings))],
        analysis: Arc::new(HeuristicAnalysis::default()),
        negotiation: Arc::new(CounterOfferNegotiation::default()),
        contracts: Arc::new(TemplateContractService),
        portfolio: Arc::new(InMemoryPortfolio::new()),
    }
}
