use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value_objects::{MessageKind, MessagePriority, Role};
use crate::domain::deal::events::DealTransition;
use crate::domain::deal::value_objects::DealId;

/// An entry of the run log
///
/// Sealed by the orchestrator when appended; there are no setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    sequence: u64,
    author: Role,
    kind: MessageKind,
    body: String,
    payload: serde_json::Value,
    priority: MessagePriority,
    deal_id: Option<DealId>,
    emitted_at: DateTime<Utc>,
}

impl AgentMessage {
    pub(crate) fn seal(draft: MessageDraft, sequence: u64, emitted_at: DateTime<Utc>) -> Self {
        Self {
            sequence,
            author: draft.author,
            kind: draft.kind,
            body: draft.body,
            payload: draft.payload,
            priority: draft.priority,
            deal_id: draft.deal_id,
            emitted_at,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn author(&self) -> Role {
        self.author
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn priority(&self) -> MessagePriority {
        self.priority
    }

    pub fn deal_id(&self) -> Option<DealId> {
        self.deal_id
    }

    pub fn emitted_at(&self) -> DateTime<Utc> {
        self.emitted_at
    }
}

/// A message a worker wants appended to the run log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub author: Role,
    pub kind: MessageKind,
    pub body: String,
    pub payload: serde_json::Value,
    pub priority: MessagePriority,
    pub deal_id: Option<DealId>,
}

impl MessageDraft {
    pub fn new(author: Role, kind: MessageKind, body: impl Into<String>) -> Self {
        Self {
            author,
            kind,
            body: body.into(),
            payload: serde_json::Value::Null,
            priority: MessagePriority::Normal,
            deal_id: None,
        }
    }

    pub fn summary(author: Role, body: impl Into<String>) -> Self {
        Self::new(author, MessageKind::Summary, body)
    }

    pub fn detail(author: Role, body: impl Into<String>) -> Self {
        Self::new(author, MessageKind::Detail, body)
    }

    /// Records who moved a deal, from where to where, and why
    pub fn transition(transition: &DealTransition) -> Self {
        Self {
            author: transition.by,
            kind: MessageKind::Transition,
            body: format!(
                "Deal {} moved {} -> {}: {}",
                transition.deal_id, transition.from, transition.to, transition.reason
            ),
            payload: serde_json::json!({
                "deal_id": transition.deal_id,
                "from": transition.from,
                "to": transition.to,
                "reason": transition.reason,
            }),
            priority: MessagePriority::Normal,
            deal_id: Some(transition.deal_id),
        }
    }

    pub fn error(author: Role, body: impl Into<String>) -> Self {
        Self::new(author, MessageKind::Error, body).with_priority(MessagePriority::Error)
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn for_deal(mut self, deal_id: DealId) -> Self {
        self.deal_id = Some(deal_id);
        self
    }
}
