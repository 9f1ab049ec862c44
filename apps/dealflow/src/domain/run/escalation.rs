use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value_objects::Role;
use crate::domain::deal::value_objects::DealId;

/// Compliance or safety conditions that block a deal until a human decides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceKind {
    /// Listing price exceeds uncommitted capital
    CapitalLimit,
    /// Seller accepted an offer; signing needs a human
    OfferSignoff,
    /// Contingencies could not be cleared before closing
    ContingencyUnresolved,
}

impl std::fmt::Display for ComplianceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComplianceKind::CapitalLimit => write!(f, "capital_limit"),
            ComplianceKind::OfferSignoff => write!(f, "offer_signoff"),
            ComplianceKind::ContingencyUnresolved => write!(f, "contingency_unresolved"),
        }
    }
}

/// How a human settled an escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Approved,
    Rejected,
    Overridden,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub outcome: ResolutionOutcome,
    pub reviewer: String,
    pub note: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

/// A blocking condition recorded on a deal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceIssue {
    pub kind: ComplianceKind,
    pub detail: String,
    pub raised_by: Role,
    pub resolution: Option<Resolution>,
}

impl ComplianceIssue {
    pub fn is_open(&self) -> bool {
        self.resolution.is_none()
    }

    pub fn is_approved(&self) -> bool {
        matches!(
            self.resolution.as_ref().map(|r| r.outcome),
            Some(ResolutionOutcome::Approved) | Some(ResolutionOutcome::Overridden)
        )
    }
}

/// Why a run paused for a human
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "kind", rename_all = "snake_case")]
pub enum EscalationCause {
    Compliance(ComplianceKind),
    /// The analyst could not decide between proceed and pass
    AmbiguousRecommendation,
}

impl std::fmt::Display for EscalationCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationCause::Compliance(kind) => write!(f, "compliance:{}", kind),
            EscalationCause::AmbiguousRecommendation => write!(f, "ambiguous_recommendation"),
        }
    }
}

/// Identity of an escalation; a resolved key never escalates again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EscalationKey {
    pub cause: EscalationCause,
    pub deal_id: Option<DealId>,
}

/// The saved continuation of a paused run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEscalation {
    pub key: EscalationKey,
    pub detail: String,
    pub raised_at: DateTime<Utc>,
    /// Node that was executing when the Router escalated
    pub paused_at: Role,
}

/// Decision supplied when resuming a paused run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum HumanDecision {
    Approve,
    Reject,
    Override { next: Role },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanInput {
    pub decision: HumanDecision,
    pub reviewer: String,
    pub note: Option<String>,
}

impl HumanInput {
    pub fn approve(reviewer: impl Into<String>) -> Self {
        Self {
            decision: HumanDecision::Approve,
            reviewer: reviewer.into(),
            note: None,
        }
    }

    pub fn reject(reviewer: impl Into<String>) -> Self {
        Self {
            decision: HumanDecision::Reject,
            reviewer: reviewer.into(),
            note: None,
        }
    }

    pub fn override_to(reviewer: impl Into<String>, next: Role) -> Self {
        Self {
            decision: HumanDecision::Override { next },
            reviewer: reviewer.into(),
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn outcome(&self) -> ResolutionOutcome {
        match self.decision {
            HumanDecision::Approve => ResolutionOutcome::Approved,
            HumanDecision::Reject => ResolutionOutcome::Rejected,
            HumanDecision::Override { .. } => ResolutionOutcome::Overridden,
        }
    }
}
