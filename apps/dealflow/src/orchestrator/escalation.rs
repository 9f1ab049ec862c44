use chrono::{DateTime, Utc};
use serde_json::json;

use super::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::deal::{DealId, DealStatus, Recommendation};
use crate::domain::run::{
    ComplianceKind, EscalationCause, HumanDecision, HumanInput, MessageDraft, MessageKind,
    MessagePriority, PendingEscalation, Resolution, ResolutionOutcome, Role, SharedState,
};

/// Folds a human decision into a paused run
///
/// Settles the pending escalation, applies the decision's effect on the deal
/// it concerns and appends the human-authored log entry. Does not route and
/// does not change the workflow status.
///
/// # Errors
/// `OrchestratorError::Validation` when nothing is pending, the input is
/// malformed, the deal the escalation names is gone, or an override names a
/// node that cannot act on the focus deal. The state is left as it was.
pub fn apply_human_input(
    state: &mut SharedState,
    input: &HumanInput,
    at: DateTime<Utc>,
) -> OrchestratorResult<PendingEscalation> {
    let mut next = state.clone();
    let pending = merge(&mut next, input, at)?;
    *state = next;
    Ok(pending)
}

fn merge(
    state: &mut SharedState,
    input: &HumanInput,
    at: DateTime<Utc>,
) -> OrchestratorResult<PendingEscalation> {
    if input.reviewer.trim().is_empty() {
        return Err(OrchestratorError::Validation(
            "Human input needs a reviewer".to_string(),
        ));
    }
    let pending = state
        .escalation()
        .cloned()
        .ok_or_else(|| OrchestratorError::Validation("No escalation is pending".to_string()))?;

    let resolution = Resolution {
        outcome: input.outcome(),
        reviewer: input.reviewer.clone(),
        note: input.note.clone(),
        resolved_at: at,
    };
    let mut drafts = Vec::new();

    if let Some(deal_id) = pending.key.deal_id {
        let deal = state
            .deal_mut(deal_id)
            .ok_or_else(|| OrchestratorError::Validation(format!("Deal {} not found", deal_id)))?;
        let by = Role::Supervisor;
        let reason = |what: &str| format!("{} by {}", what, input.reviewer);

        match pending.key.cause {
            EscalationCause::Compliance(kind) => {
                deal.resolve_issue(kind, resolution.clone())?;
                if input.decision == HumanDecision::Reject {
                    match kind {
                        ComplianceKind::CapitalLimit => {
                            if deal.status() == DealStatus::Analyzed {
                                let t = deal.advance(
                                    DealStatus::Rejected,
                                    by,
                                    reason("capital limit rejected"),
                                )?;
                                drafts.push(MessageDraft::transition(&t));
                            } else {
                                deal.abandon(reason("capital limit rejected"), by);
                            }
                        }
                        ComplianceKind::OfferSignoff => {
                            deal.abandon(reason("offer sign-off refused"), by);
                        }
                        ComplianceKind::ContingencyUnresolved => {
                            deal.abandon(reason("contingency waiver refused"), by);
                        }
                    }
                } else {
                    deal.touch(by, reason(&format!("{} {}", kind, outcome_label(resolution.outcome))));
                }
            }
            EscalationCause::AmbiguousRecommendation => match input.decision {
                HumanDecision::Approve => {
                    deal.review_recommendation(Recommendation::Proceed, &input.reviewer);
                    deal.touch(by, reason("recommendation set to proceed"));
                }
                HumanDecision::Reject => {
                    deal.review_recommendation(Recommendation::Pass, &input.reviewer);
                    let t = deal.advance(DealStatus::Rejected, by, reason("review rejected"))?;
                    drafts.push(MessageDraft::transition(&t));
                }
                HumanDecision::Override { .. } => {
                    deal.touch(by, reason("review overridden"));
                }
            },
        }
    }

    if let HumanDecision::Override { next } = input.decision {
        check_override(state, next)?;
        state.set_operator_override(Some(next));
    }
    state.settle_escalation();

    state.append_message(human_message(input, &pending, pending.key.deal_id), at);
    for draft in drafts {
        state.append_message(draft, at);
    }
    Ok(pending)
}

/// Refuses an override the chosen node could not carry out
///
/// The Negotiator and Contract nodes work on the focus deal and fail a run
/// handed a deal outside their stage. The other nodes pick their own work.
fn check_override(state: &SharedState, node: Role) -> OrchestratorResult<()> {
    if !matches!(node, Role::Negotiator | Role::Contract) {
        return Ok(());
    }
    let deal = state
        .focus_deal()
        .and_then(|id| state.deal(id))
        .filter(|d| d.is_live())
        .ok_or_else(|| {
            OrchestratorError::Validation(format!("Override to {} needs a live focus deal", node))
        })?;

    let actionable = match node {
        Role::Negotiator => match deal.status() {
            DealStatus::Analyzed => deal.recommendation() == Some(Recommendation::Proceed),
            DealStatus::Approved => deal.outreach().is_none(),
            _ => false,
        },
        _ => match deal.status() {
            DealStatus::UnderContract => true,
            DealStatus::Negotiating => deal.issue_approved(ComplianceKind::OfferSignoff),
            _ => false,
        },
    };
    if actionable {
        Ok(())
    } else {
        Err(OrchestratorError::Validation(format!(
            "{} cannot act on deal {} while it is {}",
            node,
            deal.id(),
            deal.status()
        )))
    }
}

fn human_message(
    input: &HumanInput,
    pending: &PendingEscalation,
    deal_id: Option<DealId>,
) -> MessageDraft {
    let body = format!(
        "{} {} escalation {}",
        input.reviewer,
        match input.decision {
            HumanDecision::Approve => "approved".to_string(),
            HumanDecision::Reject => "rejected".to_string(),
            HumanDecision::Override { next } => format!("overrode to {} on", next),
        },
        pending.key.cause
    );
    let mut draft = MessageDraft::new(Role::Supervisor, MessageKind::HumanInput, body)
        .with_priority(MessagePriority::High)
        .with_payload(json!({
            "reviewer": input.reviewer,
            "decision": input.decision,
            "note": input.note,
            "cause": pending.key.cause,
        }));
    if let Some(id) = deal_id {
        draft = draft.for_deal(id);
    }
    draft
}

fn outcome_label(outcome: ResolutionOutcome) -> &'static str {
    match outcome {
        ResolutionOutcome::Approved => "approved",
        ResolutionOutcome::Rejected => "rejected",
        ResolutionOutcome::Overridden => "overridden",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::deal::{Analysis, Deal, DealScore, Listing, ScoreComponents, ScoringWeights};
    use crate::domain::run::{EscalationKey, RunContext};
    use rust_decimal::Decimal;

    fn deal(recommendation: Recommendation) -> Deal {
        let listing = Listing {
            source: "mls".to_string(),
            external_id: "7".to_string(),
            address: "7 Cedar Ct".to_string(),
            market: "Austin".to_string(),
            listing_price: Decimal::from(700_000),
            estimated_value: None,
            days_on_market: 3,
        };
        let mut deal = Deal::discover(listing, 0, 6.0, Role::Scout, Utc::now());
        deal.record_analysis(Analysis {
            score: DealScore::compute(ScoreComponents::uniform(6.0), &ScoringWeights::default(), 0.8)
                .unwrap(),
            recommendation,
            renovation_estimate: Decimal::ZERO,
            projected_roi: 0.08,
            reviewed_by: None,
        });
        deal.advance(DealStatus::Analyzed, Role::Analyst, "scored").unwrap();
        deal
    }

    fn paused(deal: Deal, cause: EscalationCause) -> SharedState {
        let id = deal.id();
        let mut state = SharedState::new(RunContext::new(Decimal::from(500_000)))
            .unwrap()
            .with_deals(vec![deal])
            .unwrap();
        state.set_next_action(None, Some(id));
        state.pause(PendingEscalation {
            key: EscalationKey {
                cause,
                deal_id: Some(id),
            },
            detail: "needs a human".to_string(),
            raised_at: Utc::now(),
            paused_at: Role::Negotiator,
        });
        state
    }

    #[test]
    fn approving_capital_limit_resolves_the_issue() {
        let mut d = deal(Recommendation::Proceed);
        d.raise_issue(ComplianceKind::CapitalLimit, "over", Role::Negotiator);
        let id = d.id();
        let mut state = paused(d, EscalationCause::Compliance(ComplianceKind::CapitalLimit));

        apply_human_input(&mut state, &HumanInput::approve("dana"), Utc::now()).unwrap();

        let deal = state.deal(id).unwrap();
        assert!(deal.issue_approved(ComplianceKind::CapitalLimit));
        assert!(!state.human_approval_required());
        assert_eq!(state.resolved_escalations().len(), 1);
        assert_eq!(
            state.agent_messages().last().unwrap().kind(),
            MessageKind::HumanInput
        );
    }

    #[test]
    fn rejecting_capital_limit_rejects_the_deal() {
        let mut d = deal(Recommendation::Proceed);
        d.raise_issue(ComplianceKind::CapitalLimit, "over", Role::Negotiator);
        let id = d.id();
        let mut state = paused(d, EscalationCause::Compliance(ComplianceKind::CapitalLimit));

        apply_human_input(&mut state, &HumanInput::reject("dana"), Utc::now()).unwrap();

        assert_eq!(state.deal(id).unwrap().status(), DealStatus::Rejected);
    }

    #[test]
    fn approving_review_sets_proceed() {
        let d = deal(Recommendation::Review);
        let id = d.id();
        let mut state = paused(d, EscalationCause::AmbiguousRecommendation);

        apply_human_input(&mut state, &HumanInput::approve("dana"), Utc::now()).unwrap();

        let deal = state.deal(id).unwrap();
        assert_eq!(deal.recommendation(), Some(Recommendation::Proceed));
        assert_eq!(deal.analysis().unwrap().reviewed_by.as_deref(), Some("dana"));
    }

    #[test]
    fn override_sets_the_next_node() {
        let d = deal(Recommendation::Review);
        let mut state = paused(d, EscalationCause::AmbiguousRecommendation);

        apply_human_input(
            &mut state,
            &HumanInput::override_to("dana", Role::Portfolio),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(state.operator_override(), Some(Role::Portfolio));
    }

    #[test]
    fn override_to_a_node_that_cannot_act_is_refused() {
        let mut d = deal(Recommendation::Proceed);
        d.raise_issue(ComplianceKind::CapitalLimit, "over", Role::Negotiator);
        let mut state = paused(d, EscalationCause::Compliance(ComplianceKind::CapitalLimit));
        let before = state.clone();

        let result = apply_human_input(
            &mut state,
            &HumanInput::override_to("dana", Role::Contract),
            Utc::now(),
        );

        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
        assert_eq!(state, before);
    }

    #[test]
    fn override_to_the_negotiator_past_capital_limit() {
        let mut d = deal(Recommendation::Proceed);
        d.raise_issue(ComplianceKind::CapitalLimit, "over", Role::Negotiator);
        let id = d.id();
        let mut state = paused(d, EscalationCause::Compliance(ComplianceKind::CapitalLimit));

        apply_human_input(
            &mut state,
            &HumanInput::override_to("dana", Role::Negotiator),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(state.operator_override(), Some(Role::Negotiator));
        assert!(state.deal(id).unwrap().issue_approved(ComplianceKind::CapitalLimit));
    }

    #[test]
    fn nothing_pending_is_a_validation_error() {
        let mut state = SharedState::new(RunContext::new(Decimal::from(500_000))).unwrap();

        let result = apply_human_input(&mut state, &HumanInput::approve("dana"), Utc::now());

        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    }
}
