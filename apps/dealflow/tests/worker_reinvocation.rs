//! Worker re-invocation tests
//!
//! A retried step hands the worker the same snapshot again. Every role must
//! then produce the same state and the same log drafts.

mod common;

use common::*;
use dealflow::agents::{RoleWorker, StepContext};
use dealflow::domain::clock::Clock;
use dealflow::domain::deal::DealStatus;
use dealflow::domain::run::{HumanInput, Role, SharedState, WorkflowStatus};
use uuid::Uuid;

fn ctx(h: &Harness, state: &SharedState) -> StepContext {
    StepContext {
        run_id: state.run_id(),
        now: h.clock.now(),
        focus_deal: state.focus_deal(),
        attempt: 1,
    }
}

async fn assert_reinvocation_is_identical(h: &Harness, role: Role, state: &SharedState) {
    assert_eq!(state.next_action(), Some(role));
    let worker = h.orchestrator.registry().worker(role).unwrap();
    let ctx = ctx(h, state);

    let first = worker.execute(state, &ctx).await.unwrap();
    let second = worker.execute(state, &ctx).await.unwrap();

    assert_eq!(first.state, second.state, "{} changed the state on rerun", role);
    assert_eq!(first.drafts, second.drafts, "{} changed its drafts on rerun", role);
}

async fn started(h: &Harness) -> Uuid {
    h.orchestrator
        .start_workflow(SharedState::new(context()).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_analyst_rerun_is_identical() {
    let h = harness(scenario_services(), fast_config()).await;
    let run_id = started(&h).await;
    let state = h.orchestrator.step(run_id).await.unwrap();

    assert_reinvocation_is_identical(&h, Role::Analyst, &state).await;
}

#[tokio::test]
async fn test_negotiator_rerun_is_identical() {
    let h = harness(scenario_services(), fast_config()).await;
    let run_id = started(&h).await;
    h.orchestrator.step(run_id).await.unwrap();
    let state = h.orchestrator.step(run_id).await.unwrap();

    assert_reinvocation_is_identical(&h, Role::Negotiator, &state).await;
}

#[tokio::test]
async fn test_contract_rerun_is_identical() {
    let h = harness(scenario_services(), fast_config()).await;
    let run_id = started(&h).await;
    h.orchestrator.run_until_paused(run_id).await.unwrap();
    let state = h
        .orchestrator
        .continue_workflow(run_id, HumanInput::approve("dana"))
        .await
        .unwrap();

    assert_reinvocation_is_identical(&h, Role::Contract, &state).await;
}

#[tokio::test]
async fn test_portfolio_rerun_is_identical() {
    let h = harness(scenario_services(), fast_config()).await;
    let run_id = started(&h).await;
    h.orchestrator.run_until_paused(run_id).await.unwrap();
    h.orchestrator
        .continue_workflow(run_id, HumanInput::approve("dana"))
        .await
        .unwrap();
    let state = h.orchestrator.step(run_id).await.unwrap();
    assert_eq!(state.workflow_status(), WorkflowStatus::Running);
    let closed = state.deal(listing("good", 0).deal_id()).unwrap();
    assert_eq!(closed.status(), DealStatus::Closed);

    assert_reinvocation_is_identical(&h, Role::Portfolio, &state).await;
}
