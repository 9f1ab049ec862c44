// Agent system modules
//
// Worker roles, the routing table that chooses between them, the message
// bus they talk over and the service ports they call out to.

pub mod advisor;
pub mod bus;
pub mod errors;
pub mod messages;
pub mod prompts;
pub mod registry;
pub mod responder;
pub mod roles;
pub mod router;
pub mod services;
pub mod types;
pub mod worker;

// Re-export main types
pub use advisor::{Advisor, GenerationConfig, TextGenerator};
pub use bus::{BusConfig, MessageBus};
pub use errors::{AgentError, AgentResult, WorkerError};
pub use messages::{CorrelationId, TaskPriority, TaskRequest, TaskResponse, WorkerRegistration};
pub use registry::Registry;
pub use router::{Next, Router, RoutingDecision, RoutingError, RoutingPolicy, RoutingRule};
pub use services::{DomainServices, ServiceError, ServiceResult};
pub use types::{StepContext, WorkerOutput};
pub use worker::{RoleWorker, Worker};
