//! Worker contract checks.
//!
//! Run after every invocation, before anything is committed. A violation is a
//! bug in the worker rather than a flaky dependency, so it is always fatal.

use std::collections::HashSet;

use crate::agents::{WorkerError, WorkerOutput};
use crate::domain::deal::{DealId, DealStatus};
use crate::domain::run::{MessageDraft, MessageKind, Role, SharedState};

pub fn validate_output(
    role: Role,
    before: &SharedState,
    output: &WorkerOutput,
) -> Result<(), WorkerError> {
    let after = &output.state;

    let summaries = output
        .drafts
        .iter()
        .filter(|d| d.kind == MessageKind::Summary)
        .count();
    if summaries != 1 {
        return Err(violation(
            role,
            format!("emitted {} summary messages instead of one", summaries),
        ));
    }
    if let Some(draft) = output.drafts.iter().find(|d| d.author != role) {
        return Err(violation(
            role,
            format!("drafted a message as {}", draft.author),
        ));
    }

    if after.run_id() != before.run_id()
        || after.version() != before.version()
        || after.workflow_status() != before.workflow_status()
        || after.context() != before.context()
        || after.agent_messages() != before.agent_messages()
    {
        return Err(violation(
            role,
            "changed orchestrator-owned fields (run id, version, status, context or log)",
        ));
    }
    if after.human_approval_required() != before.human_approval_required()
        || after.escalation() != before.escalation()
        || after.resolved_escalations() != before.resolved_escalations()
        || after.operator_override() != before.operator_override()
    {
        return Err(violation(role, "changed escalation state"));
    }

    let mut ids = HashSet::new();
    if let Some(dup) = after.deals().iter().find(|d| !ids.insert(d.id())) {
        return Err(violation(role, format!("produced duplicate deal {}", dup.id())));
    }
    if let Some(missing) = before.deals().iter().find(|d| after.deal(d.id()).is_none()) {
        return Err(violation(role, format!("removed deal {}", missing.id())));
    }

    for deal in after.deals() {
        let from = before
            .deal(deal.id())
            .map(|d| d.status())
            .unwrap_or(DealStatus::Discovered);
        check_transitions(role, deal.id(), from, deal.status(), &output.drafts)?;
    }
    Ok(())
}

/// Transition drafts for a deal must chain `from` to `to` along the lattice
fn check_transitions(
    role: Role,
    deal_id: DealId,
    from: DealStatus,
    to: DealStatus,
    drafts: &[MessageDraft],
) -> Result<(), WorkerError> {
    let mut current = from;
    for draft in drafts
        .iter()
        .filter(|d| d.kind == MessageKind::Transition && d.deal_id == Some(deal_id))
    {
        let (edge_from, edge_to) = edge(draft).ok_or_else(|| {
            violation(role, format!("malformed transition message for deal {}", deal_id))
        })?;
        if edge_from != current || !edge_from.can_transition_to(edge_to) {
            return Err(violation(
                role,
                format!(
                    "illegal transition {} -> {} for deal {}",
                    edge_from, edge_to, deal_id
                ),
            ));
        }
        current = edge_to;
    }

    if current != to {
        return Err(violation(
            role,
            format!(
                "deal {} moved {} -> {} without matching transition messages",
                deal_id, from, to
            ),
        ));
    }
    Ok(())
}

fn edge(draft: &MessageDraft) -> Option<(DealStatus, DealStatus)> {
    let from = serde_json::from_value(draft.payload.get("from")?.clone()).ok()?;
    let to = serde_json::from_value(draft.payload.get("to")?.clone()).ok()?;
    Some((from, to))
}

fn violation(role: Role, detail: impl Into<String>) -> WorkerError {
    WorkerError::Fatal(format!("{} broke the worker contract: {}", role, detail.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::deal::{Deal, Listing};
    use crate::domain::run::RunContext;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn listing() -> Listing {
        Listing {
            source: "mls".to_string(),
            external_id: "42".to_string(),
            address: "42 Birch Ln".to_string(),
            market: "Austin".to_string(),
            listing_price: Decimal::from(180_000),
            estimated_value: None,
            days_on_market: 12,
        }
    }

    fn before() -> SharedState {
        let deal = Deal::discover(listing(), 0, 6.0, Role::Scout, Utc::now());
        SharedState::new(RunContext::new(Decimal::from(500_000)))
            .unwrap()
            .with_deals(vec![deal])
            .unwrap()
    }

    #[test]
    fn accepts_a_documented_transition() {
        let before = before();
        let mut after = before.clone();
        let id = listing().deal_id();
        let transition = after
            .deal_mut(id)
            .unwrap()
            .advance(DealStatus::Analyzed, Role::Analyst, "scored")
            .unwrap();
        let output = WorkerOutput {
            state: after,
            drafts: vec![
                MessageDraft::transition(&transition),
                MessageDraft::summary(Role::Analyst, "done"),
            ],
        };

        assert!(validate_output(Role::Analyst, &before, &output).is_ok());
    }

    #[test]
    fn rejects_missing_summary() {
        let before = before();
        let output = WorkerOutput::new(before.clone());

        let err = validate_output(Role::Scout, &before, &output).unwrap_err();

        assert!(!err.is_recoverable());
    }

    #[test]
    fn rejects_undocumented_status_change() {
        let before = before();
        let mut after = before.clone();
        after
            .deal_mut(listing().deal_id())
            .unwrap()
            .advance(DealStatus::Analyzed, Role::Analyst, "scored")
            .unwrap();
        let output = WorkerOutput {
            state: after,
            drafts: vec![MessageDraft::summary(Role::Analyst, "done")],
        };

        let err = validate_output(Role::Analyst, &before, &output).unwrap_err();

        assert!(err.message().contains("without matching transition"));
    }

    #[test]
    fn rejects_status_change_of_the_run() {
        let before = before();
        let mut after = before.clone();
        after
            .transition_to(crate::domain::run::WorkflowStatus::Running)
            .unwrap();
        let output = WorkerOutput {
            state: after,
            drafts: vec![MessageDraft::summary(Role::Scout, "done")],
        };

        assert!(validate_output(Role::Scout, &before, &output).is_err());
    }
}
