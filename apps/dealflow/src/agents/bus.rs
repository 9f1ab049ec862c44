//! Message bus for worker-to-worker requests and status queries.
//!
//! Decoupled from the orchestrator step loop: a worker can ask another role
//! for something without forcing a full step. Delivery is at-least-once and
//! ordered per sender→recipient pair; consumers de-duplicate by correlation id.
//!
//! The bus only parks responses for requests it still considers outstanding.
//! A request stops being outstanding when its response is taken, when the
//! requester stops waiting, or when it expires; anything arriving later for
//! that correlation id is dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

use super::errors::{AgentError, AgentResult};
use super::messages::{
    AgentStatus, CorrelationId, TaskPriority, TaskRequest, TaskResponse, WorkerRegistration,
};
use crate::domain::clock::Clock;

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Agents silent for longer than this are reported inactive
    pub heartbeat_timeout: chrono::Duration,
    /// Lifetime of a request before consumers drop it; `None` never expires
    pub request_ttl: Option<chrono::Duration>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: chrono::Duration::seconds(60),
            request_ttl: Some(chrono::Duration::seconds(300)),
        }
    }
}

#[derive(Debug, Default)]
struct Mailbox {
    queued: VecDeque<TaskRequest>,
    in_flight: Vec<TaskRequest>,
    responses: HashMap<CorrelationId, TaskResponse>,
}

impl Mailbox {
    /// Highest-priority head-of-line request across senders
    ///
    /// Only the oldest queued request of each sender is a candidate, which
    /// keeps every sender→recipient pair in FIFO order.
    fn select(&mut self, now: DateTime<Utc>) -> Option<TaskRequest> {
        self.queued.retain(|r| !r.is_expired(now));

        let mut seen_senders = HashSet::new();
        let mut best: Option<(usize, TaskPriority)> = None;
        for (idx, request) in self.queued.iter().enumerate() {
            if !seen_senders.insert(request.sender.as_str()) {
                continue;
            }
            match best {
                Some((_, priority)) if priority >= request.priority => {}
                _ => best = Some((idx, request.priority)),
            }
        }
        best.and_then(|(idx, _)| self.queued.remove(idx))
    }
}

/// A request still waiting for its response to be taken
#[derive(Debug, Clone)]
struct Outstanding {
    task: String,
    requester: String,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct BusInner {
    agents: HashMap<String, WorkerRegistration>,
    mailboxes: HashMap<String, Mailbox>,
    tasks: HashMap<CorrelationId, Outstanding>,
}

impl BusInner {
    /// Forgets a correlation id along with any response parked for it
    fn retire(&mut self, correlation_id: CorrelationId) -> Option<TaskResponse> {
        let outstanding = self.tasks.remove(&correlation_id)?;
        self.mailboxes
            .get_mut(&outstanding.requester)
            .and_then(|m| m.responses.remove(&correlation_id))
    }

    /// Drops expired requests, their in-flight copies and parked responses
    fn purge_expired(&mut self, now: DateTime<Utc>) {
        let expired: Vec<CorrelationId> = self
            .tasks
            .iter()
            .filter(|(_, o)| o.expires_at.map_or(false, |at| now > at))
            .map(|(id, _)| *id)
            .collect();
        for correlation_id in expired {
            self.retire(correlation_id);
            debug!(correlation_id = %correlation_id, "Expired request retired");
        }
        for mailbox in self.mailboxes.values_mut() {
            mailbox.in_flight.retain(|r| !r.is_expired(now));
        }
    }
}

pub struct MessageBus {
    inner: RwLock<BusInner>,
    changes: watch::Sender<u64>,
    config: BusConfig,
    clock: Arc<dyn Clock>,
}

impl MessageBus {
    pub fn new(config: BusConfig, clock: Arc<dyn Clock>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: RwLock::new(BusInner::default()),
            changes,
            config,
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn notify(&self) {
        self.changes.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Registers an agent or refreshes an existing registration
    pub async fn register_agent<I, S>(&self, name: &str, capabilities: I) -> WorkerRegistration
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = self.clock.now();
        let capabilities = capabilities.into_iter().map(Into::into).collect();
        let mut inner = self.inner.write().await;
        let registration = inner
            .agents
            .entry(name.to_string())
            .or_insert_with(|| WorkerRegistration {
                name: name.to_string(),
                capabilities: Default::default(),
                status: AgentStatus::Active,
                registered_at: now,
                last_heartbeat: now,
            });
        registration.capabilities = capabilities;
        registration.status = AgentStatus::Active;
        registration.last_heartbeat = now;
        let registration = registration.clone();
        inner.mailboxes.entry(name.to_string()).or_default();
        debug!(agent = %name, "Agent registered");
        registration
    }

    /// Marks an agent inactive; queued work stays in its mailbox
    pub async fn deregister_agent(&self, name: &str) -> AgentResult<()> {
        let mut inner = self.inner.write().await;
        let registration = inner
            .agents
            .get_mut(name)
            .ok_or_else(|| AgentError::AgentNotFound(name.to_string()))?;
        registration.status = AgentStatus::Inactive;
        Ok(())
    }

    pub async fn heartbeat(&self, name: &str) -> AgentResult<()> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        let registration = inner
            .agents
            .get_mut(name)
            .ok_or_else(|| AgentError::AgentNotFound(name.to_string()))?;
        registration.last_heartbeat = now;
        registration.status = AgentStatus::Active;
        Ok(())
    }

    /// Active agents whose heartbeat is fresh, sorted by name
    pub async fn list_active_agents(&self) -> Vec<WorkerRegistration> {
        let now = self.clock.now();
        let inner = self.inner.read().await;
        let mut agents: Vec<_> = inner
            .agents
            .values()
            .map(|r| self.effective(r, now))
            .filter(|r| r.status == AgentStatus::Active)
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    pub async fn get_agent_status(&self, name: &str) -> AgentResult<WorkerRegistration> {
        let now = self.clock.now();
        let inner = self.inner.read().await;
        inner
            .agents
            .get(name)
            .map(|r| self.effective(r, now))
            .ok_or_else(|| AgentError::AgentNotFound(name.to_string()))
    }

    fn effective(&self, registration: &WorkerRegistration, now: DateTime<Utc>) -> WorkerRegistration {
        let mut registration = registration.clone();
        if now - registration.last_heartbeat > self.config.heartbeat_timeout {
            registration.status = AgentStatus::Inactive;
        }
        registration
    }

    /// Queues a task for `recipient` and returns its correlation id
    ///
    /// # Errors
    /// `AgentError::AgentNotFound` if the recipient was never registered;
    /// nothing is queued in that case.
    pub async fn send_task_request(
        &self,
        sender: &str,
        recipient: &str,
        task: &str,
        payload: serde_json::Value,
        priority: TaskPriority,
    ) -> AgentResult<CorrelationId> {
        let now = self.clock.now();
        let request = TaskRequest {
            correlation_id: CorrelationId::new(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            task: task.to_string(),
            payload,
            priority,
            created_at: now,
            expires_at: self
                .config
                .request_ttl
                .and_then(|ttl| now.checked_add_signed(ttl)),
        };
        self.enqueue(request).await
    }

    /// Queues a fully built request, keeping its correlation id and expiry
    pub async fn enqueue(&self, request: TaskRequest) -> AgentResult<CorrelationId> {
        let correlation_id = request.correlation_id;
        {
            let mut inner = self.inner.write().await;
            if !inner.agents.contains_key(&request.recipient) {
                warn!(recipient = %request.recipient, task = %request.task, "Task sent to unregistered agent");
                return Err(AgentError::AgentNotFound(request.recipient));
            }
            inner.purge_expired(self.clock.now());
            inner.tasks.insert(
                correlation_id,
                Outstanding {
                    task: request.task.clone(),
                    requester: request.sender.clone(),
                    expires_at: request.expires_at,
                },
            );
            debug!(
                correlation_id = %correlation_id,
                sender = %request.sender,
                recipient = %request.recipient,
                task = %request.task,
                "Task request queued"
            );
            inner
                .mailboxes
                .entry(request.recipient.clone())
                .or_default()
                .queued
                .push_back(request);
        }
        self.notify();
        Ok(correlation_id)
    }

    /// Takes the next deliverable request without waiting
    ///
    /// The request stays in flight until acknowledged.
    pub async fn try_next_request(&self, recipient: &str) -> AgentResult<Option<TaskRequest>> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        if !inner.agents.contains_key(recipient) {
            return Err(AgentError::AgentNotFound(recipient.to_string()));
        }
        inner.purge_expired(now);
        let mailbox = inner.mailboxes.entry(recipient.to_string()).or_default();
        let next = mailbox.select(now);
        if let Some(request) = &next {
            mailbox.in_flight.push(request.clone());
        }
        Ok(next)
    }

    /// Waits up to `wait` for the next deliverable request
    pub async fn next_request(
        &self,
        recipient: &str,
        wait: Duration,
    ) -> AgentResult<Option<TaskRequest>> {
        let mut changes = self.changes.subscribe();
        let poll = async {
            loop {
                if let Some(request) = self.try_next_request(recipient).await? {
                    return Ok::<_, AgentError>(Some(request));
                }
                if changes.changed().await.is_err() {
                    return Ok(None);
                }
            }
        };
        match tokio::time::timeout(wait, poll).await {
            Ok(result) => result,
            Err(_) => Ok(None),
        }
    }

    /// Confirms a delivered request was handled
    pub async fn acknowledge(&self, recipient: &str, correlation_id: CorrelationId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(mailbox) = inner.mailboxes.get_mut(recipient) else {
            return false;
        };
        let before = mailbox.in_flight.len();
        mailbox
            .in_flight
            .retain(|r| r.correlation_id != correlation_id);
        before != mailbox.in_flight.len()
    }

    /// Puts unacknowledged requests back at the front of the queue
    pub async fn redeliver_unacknowledged(&self, recipient: &str) -> usize {
        let count = {
            let mut inner = self.inner.write().await;
            let Some(mailbox) = inner.mailboxes.get_mut(recipient) else {
                return 0;
            };
            let in_flight = std::mem::take(&mut mailbox.in_flight);
            let count = in_flight.len();
            for request in in_flight.into_iter().rev() {
                mailbox.queued.push_front(request);
            }
            count
        };
        if count > 0 {
            self.notify();
        }
        count
    }

    pub async fn pending_requests(&self, recipient: &str) -> usize {
        let inner = self.inner.read().await;
        inner
            .mailboxes
            .get(recipient)
            .map(|m| m.queued.len())
            .unwrap_or(0)
    }

    /// Delivers the result of a task back to the requester
    ///
    /// Only the first response to an outstanding request is kept. Responses
    /// for retired, expired or unknown correlation ids, or addressed to an
    /// agent other than the requester, are dropped.
    ///
    /// # Errors
    /// `AgentError::AgentNotFound` if the recipient was never registered.
    pub async fn send_task_response(
        &self,
        sender: &str,
        recipient: &str,
        correlation_id: CorrelationId,
        result: serde_json::Value,
    ) -> AgentResult<()> {
        let now = self.clock.now();
        {
            let mut inner = self.inner.write().await;
            if !inner.agents.contains_key(recipient) {
                return Err(AgentError::AgentNotFound(recipient.to_string()));
            }
            inner.purge_expired(now);
            let task = match inner.tasks.get(&correlation_id) {
                Some(outstanding) if outstanding.requester == recipient => outstanding.task.clone(),
                _ => {
                    debug!(correlation_id = %correlation_id, sender = %sender, "Response without an outstanding request dropped");
                    return Ok(());
                }
            };
            let mailbox = inner.mailboxes.entry(recipient.to_string()).or_default();
            mailbox
                .responses
                .entry(correlation_id)
                .or_insert_with(|| TaskResponse {
                    correlation_id,
                    sender: sender.to_string(),
                    recipient: recipient.to_string(),
                    task: Some(task),
                    result,
                    created_at: now,
                });
        }
        debug!(correlation_id = %correlation_id, sender = %sender, recipient = %recipient, "Task response delivered");
        self.notify();
        Ok(())
    }

    /// Returns the response for a correlation id, if one arrived
    pub async fn get_response(
        &self,
        recipient: &str,
        correlation_id: CorrelationId,
    ) -> Option<TaskResponse> {
        let inner = self.inner.read().await;
        inner
            .mailboxes
            .get(recipient)
            .and_then(|m| m.responses.get(&correlation_id))
            .cloned()
    }

    /// Removes and returns a parked response, retiring its correlation id
    pub async fn take_response(
        &self,
        recipient: &str,
        correlation_id: CorrelationId,
    ) -> Option<TaskResponse> {
        let mut inner = self.inner.write().await;
        let parked = inner
            .mailboxes
            .get(recipient)
            .map_or(false, |m| m.responses.contains_key(&correlation_id));
        if !parked {
            return None;
        }
        inner.retire(correlation_id)
    }

    /// Stops waiting on a request; a later response is dropped
    pub async fn abandon(&self, correlation_id: CorrelationId) {
        self.inner.write().await.retire(correlation_id);
    }

    /// Outstanding requests, answered or not
    pub async fn outstanding_requests(&self) -> usize {
        self.inner.read().await.tasks.len()
    }

    /// Parked responses waiting for `recipient` to take them
    pub async fn parked_responses(&self, recipient: &str) -> usize {
        let inner = self.inner.read().await;
        inner
            .mailboxes
            .get(recipient)
            .map(|m| m.responses.len())
            .unwrap_or(0)
    }

    /// Waits up to `wait` for a response; `None` on timeout
    ///
    /// A timeout abandons the request, so a late response is dropped.
    pub async fn await_response(
        &self,
        recipient: &str,
        correlation_id: CorrelationId,
        wait: Duration,
    ) -> Option<TaskResponse> {
        let mut changes = self.changes.subscribe();
        let poll = async {
            loop {
                if let Some(response) = self.take_response(recipient, correlation_id).await {
                    return Some(response);
                }
                if changes.changed().await.is_err() {
                    return None;
                }
            }
        };
        let response = tokio::time::timeout(wait, poll).await.ok().flatten();
        if response.is_none() {
            self.abandon(correlation_id).await;
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::{FixedClock, SystemClock};
    use serde_json::json;

    fn bus() -> MessageBus {
        MessageBus::new(BusConfig::default(), Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn register_is_an_idempotent_upsert() {
        let bus = bus();

        bus.register_agent("analyst", ["analysis"]).await;
        let second = bus.register_agent("analyst", ["analysis", "max_offer"]).await;

        assert_eq!(bus.list_active_agents().await.len(), 1);
        assert!(second.has_capability("max_offer"));
    }

    #[tokio::test]
    async fn unregistered_recipient_is_not_found() {
        let bus = bus();
        bus.register_agent("negotiator", ["negotiation"]).await;

        let result = bus
            .send_task_request("negotiator", "ghost", "max_offer", json!({}), TaskPriority::Normal)
            .await;

        assert!(matches!(result, Err(AgentError::AgentNotFound(name)) if name == "ghost"));
        assert_eq!(bus.pending_requests("ghost").await, 0);
    }

    #[tokio::test]
    async fn per_sender_order_is_kept_under_priority() {
        let bus = bus();
        bus.register_agent("analyst", ["analysis"]).await;

        let first = bus
            .send_task_request("negotiator", "analyst", "a", json!(1), TaskPriority::Low)
            .await
            .unwrap();
        let second = bus
            .send_task_request("negotiator", "analyst", "b", json!(2), TaskPriority::Urgent)
            .await
            .unwrap();
        let other = bus
            .send_task_request("contract", "analyst", "c", json!(3), TaskPriority::High)
            .await
            .unwrap();

        let order: Vec<_> = [
            bus.try_next_request("analyst").await.unwrap().unwrap(),
            bus.try_next_request("analyst").await.unwrap().unwrap(),
            bus.try_next_request("analyst").await.unwrap().unwrap(),
        ]
        .iter()
        .map(|r| r.correlation_id)
        .collect();

        // the urgent request may not overtake the earlier one from the same sender
        assert_eq!(order, vec![other, first, second]);
    }

    #[tokio::test]
    async fn unacknowledged_requests_are_redelivered() {
        let bus = bus();
        bus.register_agent("analyst", ["analysis"]).await;
        let id = bus
            .send_task_request("negotiator", "analyst", "max_offer", json!({}), TaskPriority::Normal)
            .await
            .unwrap();

        let delivered = bus.try_next_request("analyst").await.unwrap().unwrap();
        assert_eq!(delivered.correlation_id, id);
        assert_eq!(bus.redeliver_unacknowledged("analyst").await, 1);

        let again = bus.try_next_request("analyst").await.unwrap().unwrap();
        assert_eq!(again.correlation_id, id);
        assert!(bus.acknowledge("analyst", id).await);
        assert_eq!(bus.redeliver_unacknowledged("analyst").await, 0);
    }

    #[tokio::test]
    async fn expired_requests_are_dropped() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let bus = MessageBus::new(
            BusConfig {
                request_ttl: Some(chrono::Duration::seconds(5)),
                ..BusConfig::default()
            },
            clock.clone(),
        );
        bus.register_agent("analyst", ["analysis"]).await;
        bus.send_task_request("negotiator", "analyst", "max_offer", json!({}), TaskPriority::Normal)
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(6));

        assert!(bus.try_next_request("analyst").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_heartbeat_reports_inactive() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let bus = MessageBus::new(BusConfig::default(), clock.clone());
        bus.register_agent("scout", ["discovery"]).await;

        clock.advance(chrono::Duration::seconds(61));

        assert!(bus.list_active_agents().await.is_empty());
        assert_eq!(
            bus.get_agent_status("scout").await.unwrap().status,
            AgentStatus::Inactive
        );

        bus.heartbeat("scout").await.unwrap();
        assert_eq!(bus.list_active_agents().await.len(), 1);
    }

    #[tokio::test]
    async fn await_response_times_out_with_none() {
        let bus = bus();
        bus.register_agent("negotiator", ["negotiation"]).await;

        let response = bus
            .await_response("negotiator", CorrelationId::new(), Duration::from_millis(20))
            .await;

        assert!(response.is_none());
    }

    async fn pair() -> (MessageBus, CorrelationId) {
        let bus = bus();
        bus.register_agent("negotiator", ["negotiation"]).await;
        bus.register_agent("analyst", ["analysis"]).await;
        let id = bus
            .send_task_request("negotiator", "analyst", "max_offer", json!({}), TaskPriority::Normal)
            .await
            .unwrap();
        (bus, id)
    }

    #[tokio::test]
    async fn duplicate_responses_keep_the_first() {
        let (bus, id) = pair().await;

        bus.send_task_response("analyst", "negotiator", id, json!(1)).await.unwrap();
        bus.send_task_response("analyst", "negotiator", id, json!(2)).await.unwrap();

        let response = bus.take_response("negotiator", id).await.unwrap();
        assert_eq!(response.result, json!(1));
        assert!(bus.take_response("negotiator", id).await.is_none());
    }

    #[tokio::test]
    async fn response_after_take_is_dropped() {
        let (bus, id) = pair().await;
        bus.send_task_response("analyst", "negotiator", id, json!(1)).await.unwrap();
        bus.take_response("negotiator", id).await.unwrap();

        bus.send_task_response("analyst", "negotiator", id, json!(1)).await.unwrap();

        assert!(bus.get_response("negotiator", id).await.is_none());
        assert_eq!(bus.parked_responses("negotiator").await, 0);
        assert_eq!(bus.outstanding_requests().await, 0);
    }

    #[tokio::test]
    async fn late_response_after_timeout_is_dropped() {
        let (bus, id) = pair().await;

        let waited = bus
            .await_response("negotiator", id, Duration::from_millis(10))
            .await;
        assert!(waited.is_none());

        bus.send_task_response("analyst", "negotiator", id, json!(1)).await.unwrap();

        assert!(bus.get_response("negotiator", id).await.is_none());
        assert_eq!(bus.parked_responses("negotiator").await, 0);
        assert_eq!(bus.outstanding_requests().await, 0);
    }

    #[tokio::test]
    async fn responses_for_unknown_ids_are_dropped() {
        let bus = bus();
        bus.register_agent("negotiator", ["negotiation"]).await;
        let id = CorrelationId::new();

        bus.send_task_response("analyst", "negotiator", id, json!(1)).await.unwrap();

        assert!(bus.get_response("negotiator", id).await.is_none());
    }

    #[tokio::test]
    async fn expired_requests_are_retired() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let bus = MessageBus::new(
            BusConfig {
                request_ttl: Some(chrono::Duration::seconds(5)),
                ..BusConfig::default()
            },
            clock.clone(),
        );
        bus.register_agent("negotiator", ["negotiation"]).await;
        bus.register_agent("analyst", ["analysis"]).await;
        let answered = bus
            .send_task_request("negotiator", "analyst", "max_offer", json!({}), TaskPriority::Normal)
            .await
            .unwrap();
        bus.send_task_request("negotiator", "analyst", "max_offer", json!({}), TaskPriority::Normal)
            .await
            .unwrap();
        bus.send_task_response("analyst", "negotiator", answered, json!(1)).await.unwrap();
        assert_eq!(bus.outstanding_requests().await, 2);

        clock.advance(chrono::Duration::seconds(6));
        bus.send_task_response("analyst", "negotiator", answered, json!(2)).await.unwrap();

        assert_eq!(bus.outstanding_requests().await, 0);
        assert_eq!(bus.parked_responses("negotiator").await, 0);
    }
}
