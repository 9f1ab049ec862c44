use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::agents::errors::WorkerError;
use crate::agents::services::ContractService;
use crate::agents::types::{StepContext, WorkerOutput};
use crate::agents::worker::RoleWorker;
use crate::domain::deal::{ContractFile, DealStatus, DraftedDocument};
use crate::domain::run::{ComplianceKind, MessageDraft, Role, SharedState};

use super::focus_deal;

/// Takes a signed-off deal under contract, drafts its paperwork and closes it
pub struct ContractWorker {
    contracts: Arc<dyn ContractService>,
    required_documents: Vec<String>,
    contingency_period: chrono::Duration,
}

impl ContractWorker {
    pub fn new(
        contracts: Arc<dyn ContractService>,
        required_documents: Vec<String>,
        contingency_period: chrono::Duration,
    ) -> Self {
        Self {
            contracts,
            required_documents,
            contingency_period,
        }
    }
}

#[async_trait]
impl RoleWorker for ContractWorker {
    fn role(&self) -> Role {
        Role::Contract
    }

    async fn execute(
        &self,
        state: &SharedState,
        ctx: &StepContext,
    ) -> Result<WorkerOutput, WorkerError> {
        let deal_id = focus_deal(state, ctx, Role::Contract)?;
        let mut next = state.clone();
        let mut drafts = Vec::new();

        let vanished = || WorkerError::Fatal(format!("deal {} vanished", deal_id));
        let deal = next.deal_mut(deal_id).ok_or_else(vanished)?;

        if deal.status() == DealStatus::Negotiating {
            if !deal.issue_approved(ComplianceKind::OfferSignoff) {
                return Err(WorkerError::Fatal(format!(
                    "deal {} has no signed-off offer",
                    deal_id
                )));
            }
            let contract_price = deal
                .outreach()
                .and_then(|o| o.agreed_price)
                .ok_or_else(|| {
                    WorkerError::Fatal(format!("deal {} has no agreed price", deal_id))
                })?;
            let contingency_deadline = ctx
                .now
                .checked_add_signed(self.contingency_period)
                .ok_or_else(|| {
                    WorkerError::Fatal(format!(
                        "contingency period {} is out of range",
                        self.contingency_period
                    ))
                })?;
            deal.open_contract(ContractFile {
                contract_price,
                pending_documents: self.required_documents.clone(),
                drafted_documents: Vec::new(),
                contingency_deadline,
                contingencies_cleared: false,
            });
            let under_contract = deal.advance(
                DealStatus::UnderContract,
                Role::Contract,
                format!("contract opened at {}", contract_price),
            )?;
            drafts.push(MessageDraft::transition(&under_contract));
        }

        if deal.status() != DealStatus::UnderContract {
            return Err(WorkerError::Fatal(format!(
                "deal {} is {} and has no contract work",
                deal_id,
                deal.status()
            )));
        }

        let snapshot = deal.clone();
        let pending = snapshot
            .contract()
            .map(|c| c.pending_documents.clone())
            .unwrap_or_default();
        let mut drafted = Vec::new();
        for kind in &pending {
            let reference = self.contracts.draft_document(&snapshot, kind).await?;
            drafted.push(DraftedDocument {
                kind: kind.clone(),
                reference,
            });
        }

        let waived = snapshot.issue_approved(ComplianceKind::ContingencyUnresolved);
        let cleared = if waived {
            true
        } else {
            self.contracts.clear_contingencies(&snapshot, ctx.now).await?
        };

        let deal = next.deal_mut(deal_id).ok_or_else(vanished)?;
        for document in &drafted {
            drafts.push(
                MessageDraft::detail(
                    Role::Contract,
                    format!("Drafted {} ({})", document.kind, document.reference),
                )
                .for_deal(deal_id),
            );
        }
        if let Some(contract) = deal.contract_mut() {
            contract.pending_documents.clear();
            contract.drafted_documents.extend(drafted.iter().cloned());
            contract.contingencies_cleared = cleared;
        }

        let summary = if cleared {
            let reason = if waived {
                "documents complete, contingencies waived by reviewer"
            } else {
                "documents complete, contingencies cleared"
            };
            let closed = deal.advance(DealStatus::Closed, Role::Contract, reason)?;
            drafts.push(MessageDraft::transition(&closed));
            info!(run_id = %ctx.run_id, deal_id = %deal_id, waived, "Deal closed");
            format!("Closed deal after drafting {} documents", drafted.len())
        } else {
            let detail = "Contingencies could not be cleared before closing".to_string();
            deal.raise_issue(
                ComplianceKind::ContingencyUnresolved,
                detail.clone(),
                Role::Contract,
            );
            drafts.push(MessageDraft::detail(Role::Contract, detail).for_deal(deal_id));
            format!(
                "Drafted {} documents; closing blocked on contingencies",
                drafted.len()
            )
        };

        let mut output = WorkerOutput::new(next);
        output.drafts = drafts;
        output.push(
            MessageDraft::summary(Role::Contract, summary)
                .for_deal(deal_id)
                .with_payload(json!({
                    "documents_drafted": drafted.len(),
                    "contingencies_cleared": cleared,
                    "waived": waived,
                })),
        );
        Ok(output)
    }
}
