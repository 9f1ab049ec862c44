use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::RunContext;
use super::escalation::{EscalationKey, PendingEscalation};
use super::message::{AgentMessage, MessageDraft};
use super::value_objects::{Role, WorkflowStatus};
use crate::domain::deal::{Deal, DealId};
use crate::domain::errors::DomainError;

/// The fatal error that ended a run, kept verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub node: Role,
    pub attempt: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Versioned run document threaded through every orchestrator step
///
/// Workers receive a borrowed snapshot and return a modified clone; only the
/// orchestrator commits a new version, appends to the message log and moves
/// the workflow status.
///
/// # Invariants
/// - `agent_messages` is append-only with non-decreasing timestamps
/// - Deal ids are unique
/// - `version` increases with every committed step
/// - A resolved escalation key never pauses the run again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    run_id: Uuid,
    version: u64,
    workflow_status: WorkflowStatus,
    current_step: Option<Role>,
    next_action: Option<Role>,
    focus_deal: Option<DealId>,
    operator_override: Option<Role>,
    agent_messages: Vec<AgentMessage>,
    deals: Vec<Deal>,
    human_approval_required: bool,
    escalation: Option<PendingEscalation>,
    resolved_escalations: Vec<EscalationKey>,
    failure: Option<FailureRecord>,
    context: RunContext,
    step_count: u64,
    route_evaluations: u64,
    discovery_rounds: u32,
    advisory_hint: Option<Role>,
    archived: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SharedState {
    /// Creates a run document at `Initializing`
    ///
    /// # Errors
    /// `DomainError::Validation` if the context is malformed.
    pub fn new(context: RunContext) -> Result<Self, DomainError> {
        context.validate()?;
        let now = Utc::now();
        Ok(Self {
            run_id: Uuid::new_v4(),
            version: 0,
            workflow_status: WorkflowStatus::Initializing,
            current_step: None,
            next_action: None,
            focus_deal: None,
            operator_override: None,
            agent_messages: Vec::new(),
            deals: Vec::new(),
            human_approval_required: false,
            escalation: None,
            resolved_escalations: Vec::new(),
            failure: None,
            context,
            step_count: 0,
            route_evaluations: 0,
            discovery_rounds: 0,
            advisory_hint: None,
            archived: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Seeds the document with deals carried over from elsewhere
    ///
    /// # Errors
    /// `DomainError::DuplicateDeal` if two deals share an id.
    pub fn with_deals(mut self, deals: Vec<Deal>) -> Result<Self, DomainError> {
        for deal in deals {
            self.add_deal(deal)?;
        }
        Ok(self)
    }

    // ===== Deals =====

    pub fn deals(&self) -> &[Deal] {
        &self.deals
    }

    pub fn deal(&self, id: DealId) -> Option<&Deal> {
        self.deals.iter().find(|d| d.id() == id)
    }

    pub fn deal_mut(&mut self, id: DealId) -> Option<&mut Deal> {
        self.deals.iter_mut().find(|d| d.id() == id)
    }

    /// # Errors
    /// `DomainError::DuplicateDeal` if a deal with the same id exists.
    pub fn add_deal(&mut self, deal: Deal) -> Result<(), DomainError> {
        if self.deal(deal.id()).is_some() {
            return Err(DomainError::DuplicateDeal(deal.id()));
        }
        self.deals.push(deal);
        Ok(())
    }

    /// Sequence number for the next created deal
    pub fn next_deal_sequence(&self) -> u64 {
        self.deals
            .iter()
            .map(|d| d.sequence() + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn committed_capital(&self) -> Decimal {
        self.deals.iter().filter_map(Deal::committed_amount).sum()
    }

    pub fn uncommitted_capital(&self) -> Decimal {
        self.context.available_capital - self.committed_capital()
    }

    pub fn record_discovery_round(&mut self) {
        self.discovery_rounds += 1;
    }

    pub fn set_advisory_hint(&mut self, hint: Option<Role>) {
        self.advisory_hint = hint;
    }

    // ===== Orchestrator-owned mutation =====

    /// # Errors
    /// `DomainError::Validation` if the lattice forbids the move.
    pub(crate) fn transition_to(&mut self, next: WorkflowStatus) -> Result<(), DomainError> {
        if self.workflow_status == next {
            return Ok(());
        }
        if !self.workflow_status.can_transition_to(next) {
            return Err(DomainError::Validation(format!(
                "Cannot move run from {} to {}",
                self.workflow_status, next
            )));
        }
        self.workflow_status = next;
        Ok(())
    }

    /// Seals a draft into the log and returns its sequence
    ///
    /// The timestamp is clamped so the log never goes back in time.
    pub(crate) fn append_message(&mut self, draft: MessageDraft, at: DateTime<Utc>) -> u64 {
        let sequence = self.agent_messages.len() as u64;
        let emitted_at = match self.agent_messages.last() {
            Some(last) if last.emitted_at() > at => last.emitted_at(),
            _ => at,
        };
        self.agent_messages
            .push(AgentMessage::seal(draft, sequence, emitted_at));
        sequence
    }

    pub(crate) fn set_current_step(&mut self, node: Role) {
        self.current_step = Some(node);
    }

    pub(crate) fn set_next_action(&mut self, next: Option<Role>, focus: Option<DealId>) {
        self.next_action = next;
        self.focus_deal = focus;
    }

    pub(crate) fn set_operator_override(&mut self, node: Option<Role>) {
        self.operator_override = node;
    }

    pub(crate) fn pause(&mut self, escalation: PendingEscalation) {
        self.human_approval_required = true;
        self.escalation = Some(escalation);
    }

    /// Clears the pause and remembers its key as resolved
    pub(crate) fn settle_escalation(&mut self) -> Option<PendingEscalation> {
        let escalation = self.escalation.take()?;
        if !self.resolved_escalations.contains(&escalation.key) {
            self.resolved_escalations.push(escalation.key);
        }
        self.human_approval_required = false;
        Some(escalation)
    }

    pub(crate) fn set_failure(&mut self, failure: FailureRecord) {
        self.failure = Some(failure);
    }

    pub(crate) fn commit(&mut self, at: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = at.max(self.updated_at);
    }

    pub(crate) fn start_clock(&mut self, at: DateTime<Utc>) {
        self.created_at = at;
        self.updated_at = at;
    }

    pub(crate) fn record_step(&mut self) {
        self.step_count += 1;
    }

    pub(crate) fn record_route_evaluation(&mut self) {
        self.route_evaluations += 1;
    }

    pub(crate) fn mark_archived(&mut self) {
        self.archived = true;
    }

    // ===== Getters =====

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn workflow_status(&self) -> WorkflowStatus {
        self.workflow_status
    }

    pub fn current_step(&self) -> Option<Role> {
        self.current_step
    }

    pub fn next_action(&self) -> Option<Role> {
        self.next_action
    }

    pub fn focus_deal(&self) -> Option<DealId> {
        self.focus_deal
    }

    pub fn operator_override(&self) -> Option<Role> {
        self.operator_override
    }

    pub fn agent_messages(&self) -> &[AgentMessage] {
        &self.agent_messages
    }

    pub fn human_approval_required(&self) -> bool {
        self.human_approval_required
    }

    pub fn escalation(&self) -> Option<&PendingEscalation> {
        self.escalation.as_ref()
    }

    pub fn resolved_escalations(&self) -> &[EscalationKey] {
        &self.resolved_escalations
    }

    pub fn is_resolved(&self, key: &EscalationKey) -> bool {
        self.resolved_escalations.contains(key)
    }

    pub fn failure(&self) -> Option<&FailureRecord> {
        self.failure.as_ref()
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn route_evaluations(&self) -> u64 {
        self.route_evaluations
    }

    pub fn discovery_rounds(&self) -> u32 {
        self.discovery_rounds
    }

    pub fn advisory_hint(&self) -> Option<Role> {
        self.advisory_hint
    }

    pub fn archived(&self) -> bool {
        self.archived
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
