use serde::{Deserialize, Serialize};

use super::value_objects::{DealId, DealStatus};
use crate::domain::run::Role;

/// A deal moved one edge along its status lattice
///
/// Workers turn every transition into a run-log message, so no deal changes
/// status without a record of who moved it and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealTransition {
    pub deal_id: DealId,
    pub from: DealStatus,
    pub to: DealStatus,
    pub by: Role,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::run::message::MessageDraft;
    use crate::domain::run::MessageKind;

    #[test]
    fn transition_draft_names_the_deal_and_worker() {
        let deal_id = DealId::from_listing("mls", "42");
        let transition = DealTransition {
            deal_id,
            from: DealStatus::Discovered,
            to: DealStatus::Analyzed,
            by: Role::Analyst,
            reason: "scored 8.5".to_string(),
        };

        let draft = MessageDraft::transition(&transition);

        assert_eq!(draft.kind, MessageKind::Transition);
        assert_eq!(draft.author, Role::Analyst);
        assert_eq!(draft.deal_id, Some(deal_id));
        assert_eq!(draft.payload["to"], "analyzed");
    }
}
