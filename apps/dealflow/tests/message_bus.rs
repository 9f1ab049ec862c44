//! Message bus integration tests
//!
//! Request/response traffic between registered agents, served by responder
//! tasks the way the registry runs them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dealflow::agents::bus::{BusConfig, MessageBus};
use dealflow::agents::messages::{CorrelationId, TaskPriority, TaskRequest};
use dealflow::agents::responder::{spawn_responder, TaskHandler};
use dealflow::agents::{AgentError, AgentResult};
use dealflow::domain::clock::SystemClock;
use serde_json::{json, Value};

const WAIT: Duration = Duration::from_secs(2);

struct Doubler;

#[async_trait]
impl TaskHandler for Doubler {
    fn agent(&self) -> &str {
        "analyst"
    }

    async fn handle(&self, request: &TaskRequest) -> AgentResult<Value> {
        let n = request.payload["n"].as_i64().unwrap_or(0);
        Ok(json!({ "doubled": n * 2 }))
    }
}

async fn bus() -> Arc<MessageBus> {
    let bus = Arc::new(MessageBus::new(BusConfig::default(), Arc::new(SystemClock)));
    bus.register_agent("negotiator", ["negotiation"]).await;
    bus.register_agent("analyst", ["analysis", "max_offer"]).await;
    bus
}

#[tokio::test]
async fn test_round_trip_by_correlation_id() {
    let bus = bus().await;
    let responder = spawn_responder(bus.clone(), Arc::new(Doubler), Duration::from_millis(50));

    let correlation_id = bus
        .send_task_request("negotiator", "analyst", "double", json!({ "n": 21 }), TaskPriority::Normal)
        .await
        .unwrap();
    let response = bus
        .await_response("negotiator", correlation_id, WAIT)
        .await
        .unwrap();

    assert_eq!(response.correlation_id, correlation_id);
    assert_eq!(response.sender, "analyst");
    assert_eq!(response.task.as_deref(), Some("double"));
    assert_eq!(response.result["doubled"], 42);
    assert_eq!(bus.pending_requests("analyst").await, 0);

    responder.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_requests_get_their_own_responses() {
    let bus = bus().await;
    let responder = spawn_responder(bus.clone(), Arc::new(Doubler), Duration::from_millis(50));

    let mut ids = Vec::new();
    for n in 1..=5 {
        let id = bus
            .send_task_request("negotiator", "analyst", "double", json!({ "n": n }), TaskPriority::Normal)
            .await
            .unwrap();
        ids.push((n, id));
    }

    for (n, id) in ids.into_iter().rev() {
        let response = bus.await_response("negotiator", id, WAIT).await.unwrap();
        assert_eq!(response.result["doubled"], n * 2);
    }

    responder.shutdown().await;
}

#[tokio::test]
async fn test_mismatched_correlation_id_returns_none() {
    let bus = bus().await;

    let unknown = CorrelationId::new();

    assert!(bus.get_response("negotiator", unknown).await.is_none());
    assert!(bus
        .await_response("negotiator", unknown, Duration::from_millis(20))
        .await
        .is_none());
}

#[tokio::test]
async fn test_unregistered_recipient_is_not_found_and_nothing_is_queued() {
    let bus = bus().await;

    let result = bus
        .send_task_request("negotiator", "appraiser", "value", json!({}), TaskPriority::High)
        .await;

    assert!(matches!(result, Err(AgentError::AgentNotFound(name)) if name == "appraiser"));
    assert_eq!(bus.pending_requests("appraiser").await, 0);
}

#[tokio::test]
async fn test_unacknowledged_request_is_redelivered() {
    let bus = bus().await;
    let id = bus
        .send_task_request("negotiator", "analyst", "double", json!({ "n": 4 }), TaskPriority::Normal)
        .await
        .unwrap();

    // A consumer takes the request and dies before acknowledging it
    let taken = bus.try_next_request("analyst").await.unwrap().unwrap();
    assert_eq!(taken.correlation_id, id);
    assert_eq!(bus.redeliver_unacknowledged("analyst").await, 1);

    let responder = spawn_responder(bus.clone(), Arc::new(Doubler), Duration::from_millis(50));
    let response = bus.await_response("negotiator", id, WAIT).await.unwrap();
    assert_eq!(response.result["doubled"], 8);

    responder.shutdown().await;
}

struct SlowDoubler;

#[async_trait]
impl TaskHandler for SlowDoubler {
    fn agent(&self) -> &str {
        "analyst"
    }

    async fn handle(&self, request: &TaskRequest) -> AgentResult<Value> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Doubler.handle(request).await
    }
}

#[tokio::test]
async fn test_response_after_requester_gave_up_is_not_kept() {
    let bus = bus().await;
    let responder = spawn_responder(bus.clone(), Arc::new(SlowDoubler), Duration::from_millis(20));

    let id = bus
        .send_task_request("negotiator", "analyst", "double", json!({ "n": 3 }), TaskPriority::Normal)
        .await
        .unwrap();
    assert!(bus
        .await_response("negotiator", id, Duration::from_millis(10))
        .await
        .is_none());

    // Give the responder time to answer and acknowledge
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(bus.get_response("negotiator", id).await.is_none());
    assert_eq!(bus.parked_responses("negotiator").await, 0);
    assert_eq!(bus.outstanding_requests().await, 0);
    assert_eq!(bus.pending_requests("analyst").await, 0);

    responder.shutdown().await;
}
