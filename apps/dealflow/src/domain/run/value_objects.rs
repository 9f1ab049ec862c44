use serde::{Deserialize, Serialize};

/// Lifecycle status of a run
///
/// # Status Transitions
/// ```text
/// Initializing -> Running <-> HumanEscalation
///                    ├---> Completed
///                    └---> Failed
/// (any non-terminal) ---> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Initializing,
    Running,
    HumanEscalation,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Initializing, Running)
                | (Initializing, Failed)
                | (Running, HumanEscalation)
                | (Running, Completed)
                | (Running, Failed)
                | (HumanEscalation, Running)
                | (Initializing, Cancelled)
                | (Running, Cancelled)
                | (HumanEscalation, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Initializing => write!(f, "initializing"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::HumanEscalation => write!(f, "human_escalation"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Worker roles; each role is one node of the workflow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Supervisor,
    Scout,
    Analyst,
    Negotiator,
    Contract,
    Portfolio,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Supervisor,
        Role::Scout,
        Role::Analyst,
        Role::Negotiator,
        Role::Contract,
        Role::Portfolio,
    ];

    /// Bus name under which the role registers
    pub fn agent_name(&self) -> &'static str {
        match self {
            Role::Supervisor => "supervisor",
            Role::Scout => "scout",
            Role::Analyst => "analyst",
            Role::Negotiator => "negotiator",
            Role::Contract => "contract",
            Role::Portfolio => "portfolio",
        }
    }

    /// Capabilities advertised on the message bus
    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            Role::Supervisor => &["routing", "escalation"],
            Role::Scout => &["discovery", "lead_scoring"],
            Role::Analyst => &["analysis", "scoring", "max_offer"],
            Role::Negotiator => &["negotiation", "outreach"],
            Role::Contract => &["contract_drafting", "closing"],
            Role::Portfolio => &["portfolio_integration"],
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.agent_name())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "supervisor" => Ok(Role::Supervisor),
            "scout" => Ok(Role::Scout),
            "analyst" => Ok(Role::Analyst),
            "negotiator" => Ok(Role::Negotiator),
            "contract" => Ok(Role::Contract),
            "portfolio" => Ok(Role::Portfolio),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// Priority of a run-log message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Urgent,
    Error,
}

/// What a run-log message records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// The one-per-invocation worker summary
    Summary,
    /// A deal status change, with the deal and the reason
    Transition,
    Detail,
    Routing,
    Escalation,
    HumanInput,
    Error,
}
