use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::events::DealTransition;
use super::scoring::{DealScore, Ranked};
use super::value_objects::{DealId, DealStatus, Listing, Recommendation};
use crate::domain::errors::DomainError;
use crate::domain::run::escalation::{ComplianceIssue, ComplianceKind, Resolution};
use crate::domain::run::Role;

/// Analyst output attached to a deal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub score: DealScore,
    pub recommendation: Recommendation,
    pub renovation_estimate: Decimal,
    pub projected_roi: f64,
    /// Set when a human replaced the analyst's recommendation
    pub reviewed_by: Option<String>,
}

/// Negotiator outreach record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outreach {
    pub opening_offer: Decimal,
    pub max_offer: Decimal,
    /// True when the max offer fell back to the default ratio
    pub degraded_valuation: bool,
    pub agreed_price: Option<Decimal>,
    pub rounds: u32,
    pub script_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftedDocument {
    pub kind: String,
    pub reference: String,
}

/// Contract file opened when a deal goes under contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractFile {
    pub contract_price: Decimal,
    pub pending_documents: Vec<String>,
    pub drafted_documents: Vec<DraftedDocument>,
    pub contingency_deadline: DateTime<Utc>,
    pub contingencies_cleared: bool,
}

impl ContractFile {
    pub fn documents_complete(&self) -> bool {
        self.pending_documents.is_empty()
    }
}

/// Deal aggregate
///
/// One acquisition opportunity moving through the pipeline.
///
/// # Invariants
/// - Status only moves along the lattice, one edge per [`Deal::advance`]
/// - Every status change records the worker that made it and why
/// - Abandoned and rejected deals are never acted on again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    id: DealId,
    sequence: u64,
    listing: Listing,
    status: DealStatus,
    lead_score: f64,
    analysis: Option<Analysis>,
    compliance: Vec<ComplianceIssue>,
    outreach: Option<Outreach>,
    contract: Option<ContractFile>,
    portfolio_asset_id: Option<String>,
    abandoned: Option<String>,
    last_touched_by: Role,
    last_touch_reason: String,
    discovered_at: DateTime<Utc>,
}

impl Deal {
    /// Creates a Discovered deal from a listing
    ///
    /// `sequence` orders deals by creation within a run.
    pub fn discover(
        listing: Listing,
        sequence: u64,
        lead_score: f64,
        by: Role,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: listing.deal_id(),
            sequence,
            listing,
            status: DealStatus::Discovered,
            lead_score,
            analysis: None,
            compliance: Vec::new(),
            outreach: None,
            contract: None,
            portfolio_asset_id: None,
            abandoned: None,
            last_touched_by: by,
            last_touch_reason: "discovered".to_string(),
            discovered_at,
        }
    }

    /// Moves the deal one edge along the lattice
    ///
    /// # Errors
    /// `DomainError::InvalidTransition` for a skip, regression or move out of
    /// a terminal status, and for any move of an abandoned deal.
    pub fn advance(
        &mut self,
        next: DealStatus,
        by: Role,
        reason: impl Into<String>,
    ) -> Result<DealTransition, DomainError> {
        if self.abandoned.is_some() || !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let reason = reason.into();
        let transition = DealTransition {
            deal_id: self.id,
            from: self.status,
            to: next,
            by,
            reason: reason.clone(),
        };
        self.status = next;
        self.touch(by, reason);
        Ok(transition)
    }

    pub fn touch(&mut self, by: Role, reason: impl Into<String>) {
        self.last_touched_by = by;
        self.last_touch_reason = reason.into();
    }

    pub fn record_analysis(&mut self, analysis: Analysis) {
        self.analysis = Some(analysis);
    }

    /// Replaces the recommendation after a human review
    pub fn review_recommendation(&mut self, recommendation: Recommendation, reviewer: &str) {
        if let Some(analysis) = self.analysis.as_mut() {
            analysis.recommendation = recommendation;
            analysis.reviewed_by = Some(reviewer.to_string());
        }
    }

    /// Raises a compliance issue unless one of that kind was already raised
    ///
    /// Returns false when the kind exists, open or resolved, so a settled
    /// issue is never raised twice.
    pub fn raise_issue(&mut self, kind: ComplianceKind, detail: impl Into<String>, by: Role) -> bool {
        if self.issue(kind).is_some() {
            return false;
        }
        let detail = detail.into();
        self.compliance.push(ComplianceIssue {
            kind,
            detail: detail.clone(),
            raised_by: by,
            resolution: None,
        });
        self.touch(by, detail);
        true
    }

    /// # Errors
    /// `DomainError::Validation` when no open issue of that kind exists.
    pub fn resolve_issue(
        &mut self,
        kind: ComplianceKind,
        resolution: Resolution,
    ) -> Result<(), DomainError> {
        let issue = self
            .compliance
            .iter_mut()
            .find(|i| i.kind == kind && i.is_open())
            .ok_or_else(|| {
                DomainError::Validation(format!("Deal {} has no open {} issue", self.id, kind))
            })?;
        issue.resolution = Some(resolution);
        Ok(())
    }

    pub fn issue(&self, kind: ComplianceKind) -> Option<&ComplianceIssue> {
        self.compliance.iter().find(|i| i.kind == kind)
    }

    pub fn open_issue(&self) -> Option<&ComplianceIssue> {
        self.compliance.iter().find(|i| i.is_open())
    }

    /// True when a human approved (or overrode) an issue of this kind
    pub fn issue_approved(&self, kind: ComplianceKind) -> bool {
        self.issue(kind).map(|i| i.is_approved()).unwrap_or(false)
    }

    pub fn start_outreach(&mut self, outreach: Outreach) {
        self.outreach = Some(outreach);
    }

    pub fn open_contract(&mut self, contract: ContractFile) {
        self.contract = Some(contract);
    }

    pub fn contract_mut(&mut self) -> Option<&mut ContractFile> {
        self.contract.as_mut()
    }

    pub fn mark_integrated(&mut self, asset_id: impl Into<String>, by: Role) {
        let asset_id = asset_id.into();
        self.touch(by, format!("integrated as portfolio asset {}", asset_id));
        self.portfolio_asset_id = Some(asset_id);
    }

    /// Withdraws the deal from the pipeline without changing its status
    pub fn abandon(&mut self, reason: impl Into<String>, by: Role) {
        let reason = reason.into();
        self.touch(by, reason.clone());
        self.abandoned = Some(reason);
    }

    /// Not rejected and not abandoned
    pub fn is_live(&self) -> bool {
        self.abandoned.is_none() && self.status != DealStatus::Rejected
    }

    /// Capital this deal holds once outreach has started
    pub fn committed_amount(&self) -> Option<Decimal> {
        if !self.is_live() {
            return None;
        }
        match self.status {
            DealStatus::Negotiating | DealStatus::UnderContract | DealStatus::Closed => self
                .contract
                .as_ref()
                .map(|c| c.contract_price)
                .or_else(|| {
                    self.outreach
                        .as_ref()
                        .map(|o| o.agreed_price.unwrap_or(o.opening_offer))
                }),
            _ => None,
        }
    }

    /// Overall score if analyzed, otherwise the scout's lead score
    pub fn effective_score(&self) -> f64 {
        self.analysis
            .as_ref()
            .map(|a| a.score.overall_score)
            .unwrap_or(self.lead_score)
    }

    // ===== Getters =====

    pub fn id(&self) -> DealId {
        self.id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn listing(&self) -> &Listing {
        &self.listing
    }

    pub fn status(&self) -> DealStatus {
        self.status
    }

    pub fn lead_score(&self) -> f64 {
        self.lead_score
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        self.analysis.as_ref()
    }

    pub fn recommendation(&self) -> Option<Recommendation> {
        self.analysis.as_ref().map(|a| a.recommendation)
    }

    pub fn compliance(&self) -> &[ComplianceIssue] {
        &self.compliance
    }

    pub fn outreach(&self) -> Option<&Outreach> {
        self.outreach.as_ref()
    }

    pub fn contract(&self) -> Option<&ContractFile> {
        self.contract.as_ref()
    }

    pub fn portfolio_asset_id(&self) -> Option<&str> {
        self.portfolio_asset_id.as_deref()
    }

    pub fn abandoned(&self) -> Option<&str> {
        self.abandoned.as_deref()
    }

    pub fn last_touched_by(&self) -> Role {
        self.last_touched_by
    }

    pub fn last_touch_reason(&self) -> &str {
        &self.last_touch_reason
    }

    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }
}

impl Ranked for Deal {
    fn overall_score(&self) -> f64 {
        self.effective_score()
    }

    fn confidence_level(&self) -> f64 {
        self.analysis
            .as_ref()
            .map(|a| a.score.confidence_level)
            .unwrap_or(0.0)
    }

    fn listing_price(&self) -> Decimal {
        self.listing.listing_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::run::escalation::ResolutionOutcome;

    fn listing(id: &str) -> Listing {
        Listing {
            source: "mls".to_string(),
            external_id: id.to_string(),
            address: format!("{} Main St", id),
            market: "Austin".to_string(),
            listing_price: Decimal::from(250_000),
            estimated_value: Some(Decimal::from(300_000)),
            days_on_market: 45,
        }
    }

    fn deal() -> Deal {
        Deal::discover(listing("1"), 0, 6.0, Role::Scout, Utc::now())
    }

    #[test]
    fn discovered_deal_records_scout() {
        let deal = deal();

        assert_eq!(deal.status(), DealStatus::Discovered);
        assert_eq!(deal.last_touched_by(), Role::Scout);
        assert_eq!(deal.id(), listing("1").deal_id());
        assert!(deal.is_live());
    }

    #[test]
    fn advance_records_transition_and_toucher() {
        let mut deal = deal();

        let transition = deal
            .advance(DealStatus::Analyzed, Role::Analyst, "scored")
            .unwrap();

        assert_eq!(transition.from, DealStatus::Discovered);
        assert_eq!(transition.to, DealStatus::Analyzed);
        assert_eq!(deal.last_touched_by(), Role::Analyst);
        assert_eq!(deal.last_touch_reason(), "scored");
    }

    #[test]
    fn advance_rejects_skips() {
        let mut deal = deal();

        let result = deal.advance(DealStatus::Approved, Role::Negotiator, "skip");

        assert_eq!(
            result,
            Err(DomainError::InvalidTransition {
                from: DealStatus::Discovered,
                to: DealStatus::Approved,
            })
        );
        assert_eq!(deal.status(), DealStatus::Discovered);
    }

    #[test]
    fn abandoned_deal_cannot_advance() {
        let mut deal = deal();
        deal.abandon("seller withdrew", Role::Negotiator);

        assert!(deal.advance(DealStatus::Analyzed, Role::Analyst, "late").is_err());
        assert!(!deal.is_live());
    }

    #[test]
    fn issue_kind_is_raised_once() {
        let mut deal = deal();

        assert!(deal.raise_issue(ComplianceKind::CapitalLimit, "over budget", Role::Negotiator));
        assert!(!deal.raise_issue(ComplianceKind::CapitalLimit, "again", Role::Negotiator));
        assert_eq!(deal.compliance().len(), 1);
    }

    #[test]
    fn resolved_issue_is_not_reraised() {
        let mut deal = deal();
        deal.raise_issue(ComplianceKind::OfferSignoff, "accepted", Role::Negotiator);
        deal.resolve_issue(
            ComplianceKind::OfferSignoff,
            Resolution {
                outcome: ResolutionOutcome::Approved,
                reviewer: "pm".to_string(),
                note: None,
                resolved_at: Utc::now(),
            },
        )
        .unwrap();

        assert!(deal.open_issue().is_none());
        assert!(deal.issue_approved(ComplianceKind::OfferSignoff));
        assert!(!deal.raise_issue(ComplianceKind::OfferSignoff, "again", Role::Negotiator));
    }

    #[test]
    fn committed_amount_prefers_contract_price() {
        let mut deal = deal();
        deal.advance(DealStatus::Analyzed, Role::Analyst, "a").unwrap();
        deal.advance(DealStatus::Approved, Role::Negotiator, "b").unwrap();
        assert_eq!(deal.committed_amount(), None);

        deal.start_outreach(Outreach {
            opening_offer: Decimal::from(220_000),
            max_offer: Decimal::from(240_000),
            degraded_valuation: false,
            agreed_price: Some(Decimal::from(235_000)),
            rounds: 2,
            script_ref: None,
        });
        deal.advance(DealStatus::Negotiating, Role::Negotiator, "c").unwrap();
        assert_eq!(deal.committed_amount(), Some(Decimal::from(235_000)));

        deal.open_contract(ContractFile {
            contract_price: Decimal::from(233_000),
            pending_documents: vec![],
            drafted_documents: vec![],
            contingency_deadline: Utc::now(),
            contingencies_cleared: false,
        });
        assert_eq!(deal.committed_amount(), Some(Decimal::from(233_000)));
    }
}
