//! Shared fakes for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use dealflow::agents::services::{
    AnalysisReport, ContractService, DomainServices, FinancialAnalysis, ListingSource,
    NegotiationOutcome, NegotiationRequest, NegotiationService, ServiceError, ServiceResult,
};
use dealflow::agents::Registry;
use dealflow::config::OrchestratorConfig;
use dealflow::domain::clock::FixedClock;
use dealflow::domain::deal::{Deal, Listing, ScoreComponents};
use dealflow::domain::run::{Role, RunContext};
use dealflow::infrastructure::repositories::InMemoryCheckpointStore;
use dealflow::infrastructure::services::InMemoryPortfolio;
use dealflow::orchestrator::Orchestrator;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn listing(id: &str, price: i64) -> Listing {
    Listing {
        source: "mls".to_string(),
        external_id: id.to_string(),
        address: format!("{} Harbor Rd", id),
        market: "Austin".to_string(),
        listing_price: Decimal::from(price),
        estimated_value: None,
        days_on_market: 30,
    }
}

pub fn discovered(id: &str, price: i64, sequence: u64) -> Deal {
    Deal::discover(listing(id, price), sequence, 5.0, Role::Scout, start_time())
}

/// Listing source that fails a set number of times before answering
pub struct FlakyListings {
    pub listings: Vec<Listing>,
    pub failures_left: AtomicU32,
    pub error: ServiceError,
    pub calls: AtomicU32,
    pub delay: Option<Duration>,
}

impl FlakyListings {
    pub fn new(listings: Vec<Listing>) -> Self {
        Self {
            listings,
            failures_left: AtomicU32::new(0),
            error: ServiceError::Unavailable("listing feed down".to_string()),
            calls: AtomicU32::new(0),
            delay: None,
        }
    }

    pub fn failing(mut self, times: u32, error: ServiceError) -> Self {
        self.failures_left = AtomicU32::new(times);
        self.error = error;
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListingSource for FlakyListings {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn search(&self, _context: &RunContext) -> ServiceResult<Vec<Listing>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(self.error.clone());
        }
        Ok(self.listings.clone())
    }
}

/// Analysis with canned scores per listing id
pub struct ScriptedAnalysis {
    pub scores: HashMap<String, (f64, f64)>,
}

impl ScriptedAnalysis {
    pub fn new(scores: &[(&str, f64, f64)]) -> Self {
        Self {
            scores: scores
                .iter()
                .map(|(id, score, confidence)| (id.to_string(), (*score, *confidence)))
                .collect(),
        }
    }
}

#[async_trait]
impl FinancialAnalysis for ScriptedAnalysis {
    async fn analyze(&self, deal: &Deal, _context: &RunContext) -> ServiceResult<AnalysisReport> {
        let (score, confidence) = self
            .scores
            .get(&deal.listing().external_id)
            .copied()
            .unwrap_or((3.0, 0.9));
        Ok(AnalysisReport {
            components: ScoreComponents::uniform(score),
            confidence_level: confidence,
            renovation_estimate: Decimal::from(10_000),
            projected_roi: 0.12,
        })
    }

    async fn max_offer(&self, deal: &Deal, _context: &RunContext) -> ServiceResult<Decimal> {
        Ok(deal.listing().listing_price * Decimal::new(95, 2))
    }
}

/// Seller that accepts the opening offer, or always walks away
pub struct ScriptedNegotiation {
    pub accept: bool,
}

#[async_trait]
impl NegotiationService for ScriptedNegotiation {
    async fn negotiate(&self, request: &NegotiationRequest) -> ServiceResult<NegotiationOutcome> {
        Ok(NegotiationOutcome {
            agreed_price: self.accept.then_some(request.opening_offer),
            rounds: 1,
            script_ref: None,
        })
    }
}

pub struct ScriptedContracts {
    pub clears: bool,
}

#[async_trait]
impl ContractService for ScriptedContracts {
    async fn draft_document(&self, deal: &Deal, kind: &str) -> ServiceResult<String> {
        Ok(format!("{}-{}", kind, deal.listing().external_id))
    }

    async fn clear_contingencies(&self, _deal: &Deal, _as_of: DateTime<Utc>) -> ServiceResult<bool> {
        Ok(self.clears)
    }
}

/// Three listings: "good" scores 8.5 at 0.85, the other two score below the review floor
pub fn scenario_listings() -> Vec<Listing> {
    vec![
        listing("good", 300_000),
        listing("weak", 250_000),
        listing("poor", 200_000),
    ]
}

pub fn scenario_analysis() -> ScriptedAnalysis {
    ScriptedAnalysis::new(&[("good", 8.5, 0.85), ("weak", 4.0, 0.9), ("poor", 2.0, 0.9)])
}

pub fn services(source: Arc<dyn ListingSource>, analysis: Arc<dyn FinancialAnalysis>) -> DomainServices {
    DomainServices {
        listing_sources: vec![source],
        analysis,
        negotiation: Arc::new(ScriptedNegotiation { accept: true }),
        contracts: Arc::new(ScriptedContracts { clears: true }),
        portfolio: Arc::new(InMemoryPortfolio::new()),
    }
}

pub fn scenario_services() -> DomainServices {
    services(
        Arc::new(FlakyListings::new(scenario_listings())),
        Arc::new(scenario_analysis()),
    )
}

pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        base_backoff_ms: 1,
        max_backoff_ms: 5,
        bus_response_timeout_ms: 1_000,
        ..OrchestratorConfig::default()
    }
}

pub fn context() -> RunContext {
    RunContext::new(Decimal::from(500_000))
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<InMemoryCheckpointStore>,
    pub clock: Arc<FixedClock>,
}

pub async fn harness(services: DomainServices, config: OrchestratorConfig) -> Harness {
    let store = Arc::new(InMemoryCheckpointStore::new());
    harness_with_store(services, config, store).await
}

pub async fn harness_with_store(
    services: DomainServices,
    config: OrchestratorConfig,
    store: Arc<InMemoryCheckpointStore>,
) -> Harness {
    let clock = Arc::new(FixedClock::new(start_time()));
    let registry = Arc::new(Registry::new(&config, services, clock.clone(), None));
    registry.register().await;
    let orchestrator = Arc::new(Orchestrator::new(registry, store.clone(), clock.clone(), config));
    Harness {
        orchestrator,
        store,
        clock,
    }
}
