// Domain service ports
//
// The calculations behind each worker (valuation, negotiation, drafting,
// portfolio bookkeeping) live outside the orchestration core. Workers see
// them only through these async traits.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::deal::{Deal, Listing, ScoreComponents};
use crate::domain::run::RunContext;

/// Typed error returned by a domain service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("service timed out: {0}")]
    Timeout(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("invalid response: {0}")]
    Invalid(String),
}

impl ServiceError {
    /// Timeouts and outages are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Timeout(_) | ServiceError::Unavailable(_))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// A feed of property listings
#[async_trait]
pub trait ListingSource: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, context: &RunContext) -> ServiceResult<Vec<Listing>>;
}

/// Raw output of the financial analysis service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub components: ScoreComponents,
    pub confidence_level: f64,
    pub renovation_estimate: Decimal,
    pub projected_roi: f64,
}

#[async_trait]
pub trait FinancialAnalysis: Send + Sync {
    async fn analyze(&self, deal: &Deal, context: &RunContext) -> ServiceResult<AnalysisReport>;

    /// Highest price worth paying for the deal
    async fn max_offer(&self, deal: &Deal, context: &RunContext) -> ServiceResult<Decimal>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationRequest {
    pub deal: Deal,
    pub opening_offer: Decimal,
    pub max_offer: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationOutcome {
    /// `None` when the seller walked away
    pub agreed_price: Option<Decimal>,
    pub rounds: u32,
    pub script_ref: Option<String>,
}

#[async_trait]
pub trait NegotiationService: Send + Sync {
    async fn negotiate(&self, request: &NegotiationRequest) -> ServiceResult<NegotiationOutcome>;
}

#[async_trait]
pub trait ContractService: Send + Sync {
    /// Drafts one document and returns its reference
    async fn draft_document(&self, deal: &Deal, kind: &str) -> ServiceResult<String>;

    /// Returns true when every contingency could be cleared
    async fn clear_contingencies(&self, deal: &Deal, as_of: DateTime<Utc>) -> ServiceResult<bool>;
}

#[async_trait]
pub trait PortfolioStore: Send + Sync {
    /// Records a closed deal as a portfolio asset; idempotent per deal
    async fn integrate(&self, deal: &Deal) -> ServiceResult<String>;
}

/// Every domain service a run needs
#[derive(Clone)]
pub struct DomainServices {
    pub listing_sources: Vec<Arc<dyn ListingSource>>,
    pub analysis: Arc<dyn FinancialAnalysis>,
    pub negotiation: Arc<dyn NegotiationService>,
    pub contracts: Arc<dyn ContractService>,
    pub portfolio: Arc<dyn PortfolioStore>,
}
