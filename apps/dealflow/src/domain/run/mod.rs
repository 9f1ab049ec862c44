// Run domain module
// The shared run document threaded through every orchestrator step

pub mod context;
pub mod escalation;
pub mod message;
pub mod shared_state;
pub mod value_objects;

pub use context::{InvestmentCriteria, MarketConditions, RunContext};
pub use escalation::{
    ComplianceIssue, ComplianceKind, EscalationCause, EscalationKey, HumanDecision, HumanInput,
    PendingEscalation, Resolution, ResolutionOutcome,
};
pub use message::{AgentMessage, MessageDraft};
pub use shared_state::{FailureRecord, SharedState};
pub use value_objects::{MessageKind, MessagePriority, Role, WorkflowStatus};
