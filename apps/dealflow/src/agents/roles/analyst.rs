use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::agents::errors::WorkerError;
use crate::agents::services::FinancialAnalysis;
use crate::agents::types::{StepContext, WorkerOutput};
use crate::agents::worker::RoleWorker;
use crate::domain::deal::{Analysis, Deal, DealScore, DealStatus, Recommendation};
use crate::domain::run::{InvestmentCriteria, MessageDraft, Role, SharedState};

/// Scores every discovered deal and recommends what to do with it
pub struct AnalystWorker {
    analysis: Arc<dyn FinancialAnalysis>,
}

impl AnalystWorker {
    pub fn new(analysis: Arc<dyn FinancialAnalysis>) -> Self {
        Self { analysis }
    }
}

pub fn recommend(score: &DealScore, criteria: &InvestmentCriteria) -> Recommendation {
    if score.overall_score >= criteria.min_score && score.confidence_level >= criteria.min_confidence
    {
        Recommendation::Proceed
    } else if score.overall_score < criteria.review_floor {
        Recommendation::Pass
    } else {
        Recommendation::Review
    }
}

#[async_trait]
impl RoleWorker for AnalystWorker {
    fn role(&self) -> Role {
        Role::Analyst
    }

    async fn execute(
        &self,
        state: &SharedState,
        ctx: &StepContext,
    ) -> Result<WorkerOutput, WorkerError> {
        let context = state.context();
        let criteria = &context.investment_criteria;

        let mut pending: Vec<&Deal> = state
            .deals()
            .iter()
            .filter(|d| d.is_live() && d.status() == DealStatus::Discovered)
            .collect();
        pending.sort_by_key(|d| d.sequence());

        let mut next = state.clone();
        let mut drafts = Vec::new();
        let (mut proceed, mut review, mut pass) = (0, 0, 0);

        for deal in pending {
            let report = self.analysis.analyze(deal, context).await?;
            let score = DealScore::compute(
                report.components,
                &criteria.weights,
                report.confidence_level,
            )?;
            let recommendation = recommend(&score, criteria);
            debug!(
                run_id = %ctx.run_id,
                deal_id = %deal.id(),
                score = score.overall_score,
                confidence = score.confidence_level,
                %recommendation,
                "Deal analyzed"
            );

            let target = next
                .deal_mut(deal.id())
                .ok_or_else(|| WorkerError::Fatal(format!("deal {} vanished", deal.id())))?;
            target.record_analysis(Analysis {
                score,
                recommendation,
                renovation_estimate: report.renovation_estimate,
                projected_roi: report.projected_roi,
                reviewed_by: None,
            });
            let analyzed = target.advance(
                DealStatus::Analyzed,
                Role::Analyst,
                format!(
                    "scored {:.2} at confidence {:.2}, recommend {}",
                    score.overall_score, score.confidence_level, recommendation
                ),
            )?;
            drafts.push(MessageDraft::transition(&analyzed));

            match recommendation {
                Recommendation::Proceed => proceed += 1,
                Recommendation::Review => review += 1,
                Recommendation::Pass => {
                    pass += 1;
                    let rejected = target.advance(
                        DealStatus::Rejected,
                        Role::Analyst,
                        format!("score {:.2} below review floor", score.overall_score),
                    )?;
                    drafts.push(MessageDraft::transition(&rejected));
                }
            }
        }

        let mut output = WorkerOutput::new(next);
        output.drafts = drafts;
        output.push(
            MessageDraft::summary(
                Role::Analyst,
                format!(
                    "Analyzed {} deals: {} proceed, {} review, {} pass",
                    proceed + review + pass,
                    proceed,
                    review,
                    pass
                ),
            )
            .with_payload(json!({ "proceed": proceed, "review": review, "pass": pass })),
        );
        Ok(output)
    }
}
