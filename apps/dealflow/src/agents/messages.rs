// Agent message passing types
//
// Requests, responses and registrations carried by the MessageBus. These are
// separate from the run log: bus traffic never touches SharedState.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Links a task request to its eventual response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub correlation_id: CorrelationId,
    pub sender: String,
    pub recipient: String,
    pub task: String,
    pub payload: serde_json::Value,
    pub priority: TaskPriority,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TaskRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now > at).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub correlation_id: CorrelationId,
    pub sender: String,
    pub recipient: String,
    /// Task name of the originating request, when the bus still knows it
    pub task: Option<String>,
    pub result: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Inactive,
}

/// An agent known to the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub name: String,
    pub capabilities: BTreeSet<String>,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl WorkerRegistration {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Consumer-side de-duplication of at-least-once deliveries
///
/// Remembers a correlation id until its request expires; the bus never
/// redelivers an expired request, so the id can be forgotten after that.
#[derive(Debug, Default)]
pub struct TaskInbox {
    seen: HashMap<CorrelationId, Option<DateTime<Utc>>>,
}

impl TaskInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time a live request is seen
    pub fn accept(&mut self, request: &TaskRequest, now: DateTime<Utc>) -> bool {
        self.seen
            .retain(|_, expires_at| expires_at.map_or(true, |at| now <= at));
        if request.is_expired(now) || self.seen.contains_key(&request.correlation_id) {
            return false;
        }
        self.seen.insert(request.correlation_id, request.expires_at);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(expires_at: Option<DateTime<Utc>>) -> TaskRequest {
        TaskRequest {
            correlation_id: CorrelationId::new(),
            sender: "negotiator".to_string(),
            recipient: "analyst".to_string(),
            task: "max_offer".to_string(),
            payload: serde_json::json!({}),
            priority: TaskPriority::Normal,
            created_at: Utc::now(),
            expires_at,
        }
    }

    #[test]
    fn inbox_accepts_each_correlation_id_once() {
        let mut inbox = TaskInbox::new();
        let now = Utc::now();
        let req = request(None);

        assert!(inbox.accept(&req, now));
        assert!(!inbox.accept(&req.clone(), now));
        assert!(inbox.accept(&request(None), now));
    }

    #[test]
    fn inbox_forgets_expired_requests() {
        let mut inbox = TaskInbox::new();
        let now = Utc::now();
        let short = request(Some(now + Duration::seconds(5)));

        assert!(inbox.accept(&short, now));
        assert!(inbox.accept(&request(Some(now + Duration::seconds(60))), now));
        assert_eq!(inbox.len(), 2);

        let later = now + Duration::seconds(10);
        assert!(!inbox.accept(&short, later));
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn expiry_is_checked_against_given_time() {
        let now = Utc::now();
        let req = request(Some(now));

        assert!(!req.is_expired(now));
        assert!(req.is_expired(now + Duration::seconds(1)));
        assert!(!request(None).is_expired(now + Duration::days(365)));
    }
}
