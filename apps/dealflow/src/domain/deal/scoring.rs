use std::cmp::Ordering;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;

/// Upper bound of every score component and of the overall score
pub const MAX_COMPONENT: f64 = 10.0;

/// The four normalized inputs of a deal score, each in `[0, 10]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub profit_potential: f64,
    pub deal_feasibility: f64,
    pub seller_motivation: f64,
    pub market_conditions: f64,
}

impl ScoreComponents {
    pub fn uniform(value: f64) -> Self {
        Self {
            profit_potential: value,
            deal_feasibility: value,
            seller_motivation: value,
            market_conditions: value,
        }
    }

    fn as_array(&self) -> [f64; 4] {
        [
            self.profit_potential,
            self.deal_feasibility,
            self.seller_motivation,
            self.market_conditions,
        ]
    }
}

/// Relative weights of the score components
///
/// Weights are normalized to sum to one before use, so only their ratios
/// matter. The default weighs every component equally.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub profit_potential: f64,
    pub deal_feasibility: f64,
    pub seller_motivation: f64,
    pub market_conditions: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            profit_potential: 1.0,
            deal_feasibility: 1.0,
            seller_motivation: 1.0,
            market_conditions: 1.0,
        }
    }
}

impl ScoringWeights {
    /// Returns the weights scaled to sum to one
    ///
    /// # Errors
    /// `DomainError::Validation` if any weight is negative or non-finite, or
    /// if all weights are zero.
    pub fn normalized(&self) -> Result<[f64; 4], DomainError> {
        let raw = [
            self.profit_potential,
            self.deal_feasibility,
            self.seller_motivation,
            self.market_conditions,
        ];
        if raw.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(DomainError::Validation(
                "Scoring weights must be finite and non-negative".to_string(),
            ));
        }
        let total: f64 = raw.iter().sum();
        if total <= 0.0 {
            return Err(DomainError::Validation(
                "Scoring weights must not all be zero".to_string(),
            ));
        }
        Ok(raw.map(|w| w / total))
    }
}

/// Weighted deal score plus an independent confidence level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DealScore {
    pub components: ScoreComponents,
    pub overall_score: f64,
    pub confidence_level: f64,
}

impl DealScore {
    /// Computes `overall_score = Σ weight_i * component_i`
    ///
    /// Components are clamped to `[0, 10]` and confidence to `[0, 1]`.
    ///
    /// # Errors
    /// `DomainError::Validation` for non-finite inputs or invalid weights.
    pub fn compute(
        components: ScoreComponents,
        weights: &ScoringWeights,
        confidence_level: f64,
    ) -> Result<Self, DomainError> {
        if components.as_array().iter().any(|c| !c.is_finite()) {
            return Err(DomainError::Validation(
                "Score components must be finite".to_string(),
            ));
        }
        if !confidence_level.is_finite() {
            return Err(DomainError::Validation(
                "Confidence level must be finite".to_string(),
            ));
        }

        let clamped = ScoreComponents {
            profit_potential: clamp_component(components.profit_potential),
            deal_feasibility: clamp_component(components.deal_feasibility),
            seller_motivation: clamp_component(components.seller_motivation),
            market_conditions: clamp_component(components.market_conditions),
        };
        let weights = weights.normalized()?;
        let overall: f64 = clamped
            .as_array()
            .iter()
            .zip(weights.iter())
            .map(|(c, w)| c * w)
            .sum();

        Ok(Self {
            components: clamped,
            overall_score: round4(overall),
            confidence_level: confidence_level.clamp(0.0, 1.0),
        })
    }
}

fn clamp_component(value: f64) -> f64 {
    value.clamp(0.0, MAX_COMPONENT)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Anything that can be ranked by score, confidence and price
pub trait Ranked {
    fn overall_score(&self) -> f64;
    fn confidence_level(&self) -> f64;
    fn listing_price(&self) -> Decimal;
}

/// Best first: higher score, then higher confidence, then lower price
pub fn ranking_order<T: Ranked>(a: &T, b: &T) -> Ordering {
    b.overall_score()
        .total_cmp(&a.overall_score())
        .then_with(|| b.confidence_level().total_cmp(&a.confidence_level()))
        .then_with(|| a.listing_price().cmp(&b.listing_price()))
}
