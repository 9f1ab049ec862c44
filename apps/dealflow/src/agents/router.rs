//! Deterministic routing table.
//!
//! Maps a SharedState snapshot to the next node. Rules are evaluated in
//! priority order and the first match wins; within a rule the earliest
//! created deal wins, then the higher score. The Router reads nothing but the
//! snapshot, and uses `updated_at` as its notion of "now".

use std::cmp::Ordering;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::deal::{Deal, DealId, DealStatus, Recommendation};
use crate::domain::run::{ComplianceKind, EscalationCause, EscalationKey, Role, SharedState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingPolicy {
    /// Contingency deadlines closer than this take priority
    pub deadline_window: Duration,
    pub max_discovery_rounds: u32,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            deadline_window: Duration::hours(48),
            max_discovery_rounds: 3,
        }
    }
}

/// Which rule produced a decision, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingRule {
    OperatorOverride,
    Compliance,
    DeadlinePressure,
    Discovery,
    Analysis,
    Outreach,
    Contracting,
    Completion,
}

impl std::fmt::Display for RoutingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingRule::OperatorOverride => write!(f, "operator_override"),
            RoutingRule::Compliance => write!(f, "compliance"),
            RoutingRule::DeadlinePressure => write!(f, "deadline_pressure"),
            RoutingRule::Discovery => write!(f, "discovery"),
            RoutingRule::Analysis => write!(f, "analysis"),
            RoutingRule::Outreach => write!(f, "outreach"),
            RoutingRule::Contracting => write!(f, "contracting"),
            RoutingRule::Completion => write!(f, "completion"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Next {
    Worker(Role),
    Escalate(EscalationKey),
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub next: Next,
    pub rule: RoutingRule,
    pub deal_id: Option<DealId>,
    pub reason: String,
}

impl RoutingDecision {
    fn worker(role: Role, rule: RoutingRule, deal: Option<&Deal>, reason: impl Into<String>) -> Self {
        Self {
            next: Next::Worker(role),
            rule,
            deal_id: deal.map(Deal::id),
            reason: reason.into(),
        }
    }

    pub fn is_escalation(&self) -> bool {
        matches!(self.next, Next::Escalate(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("Routing is ambiguous for deal {deal_id}: {reason}")]
    Ambiguous { deal_id: DealId, reason: String },
}

impl RoutingError {
    /// The escalation a human must settle to break the tie
    pub fn into_escalation(self) -> RoutingDecision {
        match self {
            RoutingError::Ambiguous { deal_id, reason } => RoutingDecision {
                next: Next::Escalate(EscalationKey {
                    cause: EscalationCause::AmbiguousRecommendation,
                    deal_id: Some(deal_id),
                }),
                rule: RoutingRule::Outreach,
                deal_id: Some(deal_id),
                reason,
            },
        }
    }
}

type RuleMatch = Result<RoutingDecision, RoutingError>;

#[derive(Debug, Clone, Default)]
pub struct Router {
    policy: RoutingPolicy,
}

impl Router {
    pub fn new(policy: RoutingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// First matching rule
    ///
    /// # Errors
    /// `RoutingError::Ambiguous` when the winning rule cannot pick a node.
    pub fn try_route(&self, state: &SharedState) -> RuleMatch {
        self.evaluate(state)
            .into_iter()
            .next()
            .unwrap_or_else(|| Ok(completion()))
    }

    /// First matching rule, with ambiguity surfaced as an escalation
    pub fn route(&self, state: &SharedState) -> RoutingDecision {
        self.try_route(state)
            .unwrap_or_else(RoutingError::into_escalation)
    }

    /// Every matching rule in priority order, ambiguity mapped to escalation
    pub fn candidates(&self, state: &SharedState) -> Vec<RoutingDecision> {
        self.evaluate(state)
            .into_iter()
            .map(|m| m.unwrap_or_else(RoutingError::into_escalation))
            .collect()
    }

    /// Lets advice pick among the nodes whose rule matched
    ///
    /// Advice is ignored when the winning rule is an escalation or an
    /// operator override, and when it names a node no rule selected.
    pub fn route_with_advice(&self, state: &SharedState, advice: Option<Role>) -> RoutingDecision {
        let mut candidates = self.candidates(state);
        if candidates.is_empty() {
            return completion();
        }
        let first = candidates.remove(0);
        if first.is_escalation() || first.rule == RoutingRule::OperatorOverride {
            return first;
        }
        let Some(advice) = advice else {
            return first;
        };
        if first.next == Next::Worker(advice) {
            return first;
        }
        candidates
            .into_iter()
            .find(|c| c.next == Next::Worker(advice))
            .map(|mut c| {
                c.reason = format!("{} (advised over {})", c.reason, first.rule);
                c
            })
            .unwrap_or(first)
    }

    fn evaluate(&self, state: &SharedState) -> Vec<RuleMatch> {
        let mut live: Vec<&Deal> = state.deals().iter().filter(|d| d.is_live()).collect();
        live.sort_by(|a, b| tie_break(a, b));

        let mut matches = Vec::new();

        if let Some(node) = state.operator_override() {
            matches.push(Ok(RoutingDecision {
                next: Next::Worker(node),
                rule: RoutingRule::OperatorOverride,
                deal_id: state.focus_deal(),
                reason: format!("operator override to {}", node),
            }));
        }

        if let Some((deal, issue)) = live
            .iter()
            .find_map(|d| d.open_issue().map(|issue| (*d, issue)))
        {
            let key = EscalationKey {
                cause: EscalationCause::Compliance(issue.kind),
                deal_id: Some(deal.id()),
            };
            if !state.is_resolved(&key) {
                matches.push(Ok(RoutingDecision {
                    next: Next::Escalate(key),
                    rule: RoutingRule::Compliance,
                    deal_id: Some(deal.id()),
                    reason: issue.detail.clone(),
                }));
            }
        }

        let as_of = state.updated_at();
        if let Some(deal) = live.iter().find(|d| {
            d.status() == DealStatus::UnderContract
                && d.contract().map_or(false, |c| {
                    !c.documents_complete()
                        && c.contingency_deadline - as_of <= self.policy.deadline_window
                })
        }) {
            matches.push(Ok(RoutingDecision::worker(
                Role::Contract,
                RoutingRule::DeadlinePressure,
                Some(deal),
                "contingency deadline approaching with documents pending",
            )));
        }

        if state.deals().is_empty() && state.discovery_rounds() < self.policy.max_discovery_rounds {
            matches.push(Ok(RoutingDecision::worker(
                Role::Scout,
                RoutingRule::Discovery,
                None,
                "no deals in the pipeline",
            )));
        }

        if let Some(deal) = live.iter().find(|d| d.status() == DealStatus::Discovered) {
            matches.push(Ok(RoutingDecision::worker(
                Role::Analyst,
                RoutingRule::Analysis,
                Some(deal),
                "unanalyzed deal",
            )));
        }

        if let Some(outreach) = self.outreach_match(state, &live) {
            matches.push(outreach);
        }

        if let Some(deal) = live.iter().find(|d| match d.status() {
            DealStatus::UnderContract => true,
            DealStatus::Negotiating => d.issue_approved(ComplianceKind::OfferSignoff),
            _ => false,
        }) {
            let reason = match deal.status() {
                DealStatus::Negotiating => "accepted offer signed off",
                _ if deal.contract().map_or(false, |c| c.documents_complete()) => "ready to close",
                _ => "contract documents pending",
            };
            matches.push(Ok(RoutingDecision::worker(
                Role::Contract,
                RoutingRule::Contracting,
                Some(deal),
                reason,
            )));
        }

        match live
            .iter()
            .find(|d| d.status() == DealStatus::Closed && d.portfolio_asset_id().is_none())
        {
            Some(deal) => matches.push(Ok(RoutingDecision::worker(
                Role::Portfolio,
                RoutingRule::Completion,
                Some(deal),
                "closed deal awaiting portfolio integration",
            ))),
            None => matches.push(Ok(completion())),
        }

        matches
    }

    fn outreach_match(&self, state: &SharedState, live: &[&Deal]) -> Option<RuleMatch> {
        let deal = live.iter().find(|d| {
            if d.outreach().is_some() {
                return false;
            }
            match (d.status(), d.recommendation()) {
                (DealStatus::Approved, _) => true,
                (DealStatus::Analyzed, Some(Recommendation::Proceed)) => true,
                (DealStatus::Analyzed, Some(Recommendation::Review)) => {
                    !state.is_resolved(&ambiguity_key(d.id()))
                }
                _ => false,
            }
        })?;

        if deal.status() == DealStatus::Analyzed
            && deal.recommendation() == Some(Recommendation::Review)
        {
            return Some(Err(RoutingError::Ambiguous {
                deal_id: deal.id(),
                reason: format!(
                    "analyst recommended review at score {:.2}",
                    deal.effective_score()
                ),
            }));
        }

        let reason = match deal.status() {
            DealStatus::Approved => "approved deal without outreach",
            _ => "analyst recommends proceeding",
        };
        Some(Ok(RoutingDecision::worker(
            Role::Negotiator,
            RoutingRule::Outreach,
            Some(deal),
            reason,
        )))
    }
}

fn ambiguity_key(deal_id: DealId) -> EscalationKey {
    EscalationKey {
        cause: EscalationCause::AmbiguousRecommendation,
        deal_id: Some(deal_id),
    }
}

fn completion() -> RoutingDecision {
    RoutingDecision {
        next: Next::Complete,
        rule: RoutingRule::Completion,
        deal_id: None,
        reason: "nothing actionable remains".to_string(),
    }
}

/// Earliest created first, then higher score
fn tie_break(a: &Deal, b: &Deal) -> Ordering {
    a.sequence()
        .cmp(&b.sequence())
        .then_with(|| b.effective_score().total_cmp(&a.effective_score()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::deal::{
        Analysis, ContractFile, DealScore, Listing, Outreach, ScoreComponents, ScoringWeights,
    };
    use crate::domain::run::{Resolution, ResolutionOutcome, RunContext};
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    fn listing(id: &str) -> Listing {
        Listing {
            source: "mls".to_string(),
            external_id: id.to_string(),
            address: format!("{} Elm St", id),
            market: "Austin".to_string(),
            listing_price: Decimal::from(250_000),
            estimated_value: None,
            days_on_market: 30,
        }
    }

    fn analyzed(id: &str, seq: u64, score: f64, rec: Recommendation) -> Deal {
        let mut deal = Deal::discover(listing(id), seq, 5.0, Role::Scout, Utc::now());
        deal.record_analysis(Analysis {
            score: DealScore::compute(ScoreComponents::uniform(score), &ScoringWeights::default(), 0.85)
                .unwrap(),
            recommendation: rec,
            renovation_estimate: Decimal::ZERO,
            projected_roi: 0.1,
            reviewed_by: None,
        });
        deal.advance(DealStatus::Analyzed, Role::Analyst, "analyzed").unwrap();
        deal
    }

    fn negotiating(id: &str, seq: u64) -> Deal {
        let mut deal = analyzed(id, seq, 8.0, Recommendation::Proceed);
        deal.advance(DealStatus::Approved, Role::Negotiator, "within capital").unwrap();
        deal.start_outreach(Outreach {
            opening_offer: Decimal::from(225_000),
            max_offer: Decimal::from(240_000),
            degraded_valuation: false,
            agreed_price: Some(Decimal::from(230_000)),
            rounds: 2,
            script_ref: None,
        });
        deal.advance(DealStatus::Negotiating, Role::Negotiator, "opened").unwrap();
        deal
    }

    fn under_contract(id: &str, seq: u64, deadline: DateTime<Utc>, pending: &[&str]) -> Deal {
        let mut deal = negotiating(id, seq);
        deal.open_contract(ContractFile {
            contract_price: Decimal::from(230_000),
            pending_documents: pending.iter().map(|d| d.to_string()).collect(),
            drafted_documents: Vec::new(),
            contingency_deadline: deadline,
            contingencies_cleared: false,
        });
        deal.advance(DealStatus::UnderContract, Role::Contract, "contract opened")
            .unwrap();
        deal
    }

    fn state_at(now: DateTime<Utc>, deals: Vec<Deal>) -> SharedState {
        let mut state = state(deals);
        state.start_clock(now);
        state
    }

    fn state(deals: Vec<Deal>) -> SharedState {
        SharedState::new(RunContext::new(Decimal::from(500_000)))
            .unwrap()
            .with_deals(deals)
            .unwrap()
    }

    #[test]
    fn empty_pipeline_routes_to_scout() {
        let decision = Router::default().route(&state(vec![]));

        assert_eq!(decision.next, Next::Worker(Role::Scout));
        assert_eq!(decision.rule, RoutingRule::Discovery);
    }

    #[test]
    fn discovered_deal_routes_to_analyst_earliest_first() {
        let now = Utc::now();
        let deals = vec![
            Deal::discover(listing("b"), 1, 9.0, Role::Scout, now),
            Deal::discover(listing("a"), 0, 3.0, Role::Scout, now),
        ];

        let decision = Router::default().route(&state(deals));

        assert_eq!(decision.next, Next::Worker(Role::Analyst));
        assert_eq!(decision.deal_id, Some(listing("a").deal_id()));
    }

    #[test]
    fn review_recommendation_is_ambiguous() {
        let deal = analyzed("r", 0, 6.0, Recommendation::Review);
        let id = deal.id();
        let router = Router::default();
        let state = state(vec![deal]);

        assert!(matches!(
            router.try_route(&state),
            Err(RoutingError::Ambiguous { deal_id, .. }) if deal_id == id
        ));
        assert_eq!(
            router.route(&state).next,
            Next::Escalate(ambiguity_key(id))
        );
    }

    #[test]
    fn open_issue_outranks_everything_but_override() {
        let mut deal = analyzed("c", 0, 8.5, Recommendation::Proceed);
        deal.raise_issue(ComplianceKind::CapitalLimit, "over budget", Role::Negotiator);
        let state = state(vec![deal]);

        let decision = Router::default().route(&state);

        assert!(decision.is_escalation());
        assert_eq!(decision.rule, RoutingRule::Compliance);
    }

    #[test]
    fn advice_can_only_choose_a_matched_node() {
        let now = Utc::now();
        let deals = vec![
            Deal::discover(listing("d"), 1, 5.0, Role::Scout, now),
            analyzed("p", 0, 8.5, Recommendation::Proceed),
        ];
        let state = state(deals);
        let router = Router::default();

        let advised = router.route_with_advice(&state, Some(Role::Negotiator));
        assert_eq!(advised.next, Next::Worker(Role::Negotiator));

        let ignored = router.route_with_advice(&state, Some(Role::Portfolio));
        assert_eq!(ignored.next, Next::Worker(Role::Analyst));
    }

    #[test]
    fn nothing_left_completes() {
        let mut deal = analyzed("x", 0, 2.0, Recommendation::Pass);
        deal.advance(DealStatus::Rejected, Role::Analyst, "pass").unwrap();
        let mut state = state(vec![deal]);
        for _ in 0..3 {
            state.record_discovery_round();
        }

        assert_eq!(Router::default().route(&state).next, Next::Complete);
    }

    #[test]
    fn approaching_deadline_outranks_an_earlier_contract() {
        let now = Utc::now();
        let relaxed = under_contract("r", 0, now + chrono::Duration::days(20), &["title"]);
        let urgent = under_contract("u", 1, now + chrono::Duration::hours(12), &["title"]);
        let urgent_id = urgent.id();

        let decision = Router::default().route(&state_at(now, vec![relaxed, urgent]));

        assert_eq!(decision.next, Next::Worker(Role::Contract));
        assert_eq!(decision.rule, RoutingRule::DeadlinePressure);
        assert_eq!(decision.deal_id, Some(urgent_id));
    }

    #[test]
    fn deadline_pressure_needs_pending_documents() {
        let now = Utc::now();
        let ready = under_contract("d", 0, now + chrono::Duration::hours(12), &[]);

        let decision = Router::default().route(&state_at(now, vec![ready]));

        assert_eq!(decision.rule, RoutingRule::Contracting);
        assert_eq!(decision.reason, "ready to close");
    }

    #[test]
    fn contract_with_pending_documents_routes_to_contract() {
        let now = Utc::now();
        let deal = under_contract("p", 0, now + chrono::Duration::days(20), &["title"]);
        let id = deal.id();

        let decision = Router::default().route(&state_at(now, vec![deal]));

        assert_eq!(decision.next, Next::Worker(Role::Contract));
        assert_eq!(decision.rule, RoutingRule::Contracting);
        assert_eq!(decision.deal_id, Some(id));
        assert_eq!(decision.reason, "contract documents pending");
    }

    #[test]
    fn signed_off_offer_routes_to_contract() {
        let mut deal = negotiating("s", 0);
        deal.raise_issue(ComplianceKind::OfferSignoff, "sign off", Role::Negotiator);
        let router = Router::default();

        let held = router.route(&state(vec![deal.clone()]));
        assert_eq!(held.rule, RoutingRule::Compliance);

        deal.resolve_issue(
            ComplianceKind::OfferSignoff,
            Resolution {
                outcome: ResolutionOutcome::Approved,
                reviewer: "dana".to_string(),
                note: None,
                resolved_at: Utc::now(),
            },
        )
        .unwrap();
        let decision = router.route(&state(vec![deal]));

        assert_eq!(decision.next, Next::Worker(Role::Contract));
        assert_eq!(decision.rule, RoutingRule::Contracting);
        assert_eq!(decision.reason, "accepted offer signed off");
    }

    #[test]
    fn unsigned_negotiation_is_not_contracting() {
        let deal = negotiating("n", 0);
        let mut state = state(vec![deal]);
        for _ in 0..3 {
            state.record_discovery_round();
        }

        assert_eq!(Router::default().route(&state).next, Next::Complete);
    }

    #[test]
    fn same_sequence_prefers_the_higher_score() {
        let now = Utc::now();
        let low = Deal::discover(listing("low"), 4, 3.0, Role::Scout, now);
        let high = Deal::discover(listing("high"), 4, 7.5, Role::Scout, now);
        let high_id = high.id();

        let decision = Router::default().route(&state(vec![low, high]));

        assert_eq!(decision.rule, RoutingRule::Analysis);
        assert_eq!(decision.deal_id, Some(high_id));
    }

    #[test]
    fn routing_is_pure() {
        let state = state(vec![analyzed("p", 0, 8.5, Recommendation::Proceed)]);
        let router = Router::default();

        assert_eq!(router.route(&state), router.route(&state));
        assert_eq!(router.route(&state).next, Next::Worker(Role::Negotiator));
    }
}
