use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::deal::scoring::{ScoringWeights, MAX_COMPONENT};
use crate::domain::errors::DomainError;

/// Snapshot of the market the run operates in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConditions {
    /// Overall market attractiveness in `[0, 10]`
    pub market_score: f64,
    /// Annual mortgage rate as a fraction, e.g. `0.065`
    pub interest_rate: f64,
    pub notes: Option<String>,
}

impl Default for MarketConditions {
    fn default() -> Self {
        Self {
            market_score: 5.0,
            interest_rate: 0.065,
            notes: None,
        }
    }
}

/// Investor thresholds applied by the scout, analyst and negotiator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentCriteria {
    pub max_price: Option<Decimal>,
    /// Empty means every market is acceptable
    pub target_markets: Vec<String>,
    pub min_score: f64,
    pub min_confidence: f64,
    /// Scores below this are passed on outright
    pub review_floor: f64,
    /// Fallback max offer as a fraction of listing price when no valuation arrives
    pub default_offer_ratio: Decimal,
    pub weights: ScoringWeights,
}

impl Default for InvestmentCriteria {
    fn default() -> Self {
        Self {
            max_price: None,
            target_markets: Vec::new(),
            min_score: 7.0,
            min_confidence: 0.7,
            review_floor: 5.0,
            default_offer_ratio: Decimal::new(90, 2),
            weights: ScoringWeights::default(),
        }
    }
}

impl InvestmentCriteria {
    pub fn accepts_market(&self, market: &str) -> bool {
        self.target_markets.is_empty()
            || self
                .target_markets
                .iter()
                .any(|m| m.eq_ignore_ascii_case(market))
    }
}

/// Read-only context of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub market_conditions: MarketConditions,
    pub investment_criteria: InvestmentCriteria,
    pub available_capital: Decimal,
}

impl RunContext {
    pub fn new(available_capital: Decimal) -> Self {
        Self {
            market_conditions: MarketConditions::default(),
            investment_criteria: InvestmentCriteria::default(),
            available_capital,
        }
    }

    pub fn with_market_conditions(mut self, market_conditions: MarketConditions) -> Self {
        self.market_conditions = market_conditions;
        self
    }

    pub fn with_criteria(mut self, investment_criteria: InvestmentCriteria) -> Self {
        self.investment_criteria = investment_criteria;
        self
    }

    /// # Errors
    /// `DomainError::Validation` describing the first malformed field.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.available_capital <= Decimal::ZERO {
            return Err(DomainError::Validation(
                "Available capital must be positive".to_string(),
            ));
        }
        let market = self.market_conditions.market_score;
        if !market.is_finite() || !(0.0..=MAX_COMPONENT).contains(&market) {
            return Err(DomainError::Validation(
                "Market score must be within [0, 10]".to_string(),
            ));
        }
        let criteria = &self.investment_criteria;
        if let Some(max_price) = criteria.max_price {
            if max_price <= Decimal::ZERO {
                return Err(DomainError::Validation(
                    "Max price must be positive".to_string(),
                ));
            }
        }
        if !(0.0..=1.0).contains(&criteria.min_confidence) {
            return Err(DomainError::Validation(
                "Minimum confidence must be within [0, 1]".to_string(),
            ));
        }
        if criteria.review_floor > criteria.min_score {
            return Err(DomainError::Validation(
                "Review floor cannot exceed the minimum score".to_string(),
            ));
        }
        if criteria.default_offer_ratio <= Decimal::ZERO || criteria.default_offer_ratio > Decimal::ONE
        {
            return Err(DomainError::Validation(
                "Default offer ratio must be within (0, 1]".to_string(),
            ));
        }
        criteria.weights.normalized()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context_is_valid() {
        assert!(RunContext::new(Decimal::from(500_000)).validate().is_ok());
    }

    #[test]
    fn zero_capital_is_invalid() {
        let result = RunContext::new(Decimal::ZERO).validate();

        assert!(matches!(result, Err(DomainError::Validation(msg)) if msg.contains("capital")));
    }

    #[test]
    fn inverted_thresholds_are_invalid() {
        let criteria = InvestmentCriteria {
            min_score: 4.0,
            review_floor: 6.0,
            ..InvestmentCriteria::default()
        };

        let result = RunContext::new(Decimal::from(100_000))
            .with_criteria(criteria)
            .validate();

        assert!(result.is_err());
    }

    #[test]
    fn empty_target_markets_accept_anything() {
        let mut criteria = InvestmentCriteria::default();
        assert!(criteria.accepts_market("Austin"));

        criteria.target_markets = vec!["austin".to_string()];
        assert!(criteria.accepts_market("Austin"));
        assert!(!criteria.accepts_market("Denver"));
    }
}
