use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::deal::DealId;
use crate::domain::run::{MessageDraft, SharedState};

/// Per-invocation inputs handed to a worker next to the state snapshot
///
/// `now` is read from the clock once per step, so every retry of the same
/// step sees the same time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepContext {
    pub run_id: Uuid,
    pub now: DateTime<Utc>,
    /// Deal the Router selected for this step, if any
    pub focus_deal: Option<DealId>,
    pub attempt: u32,
}

/// What a worker hands back: the next state plus unsealed log entries
#[derive(Debug, Clone)]
pub struct WorkerOutput {
    pub state: SharedState,
    pub drafts: Vec<MessageDraft>,
}

impl WorkerOutput {
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            drafts: Vec::new(),
        }
    }

    pub fn push(&mut self, draft: MessageDraft) {
        self.drafts.push(draft);
    }
}
