use crate::models::{BookDepth, Direction, Pair, Precision};
use bigdecimal::BigDecimal;
use std::time::SystemTime;

/// Thresholds a candidate must clear before it is traded.
#[derive(Debug, Clone)]
pub struct ArbitrageConfig {
    pub min_profit_fraction: f64,
    pub min_profit_base: BigDecimal,
    pub base_currency: String,
}

/// Amounts a round trip can move without overdrawing either venue.
#[derive(Debug, Clone, PartialEq)]
pub struct TradableAmount {
    pub base: BigDecimal,
    pub alt: BigDecimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMetadata {
    pub taken_at: SystemTime,
    pub primary_venue: String,
    pub secondary_venue: String,
    /// Buying venue's book for the pair when the candidate was priced.
    pub raw_orderbook: BookDepth,
}

/// Best-ranked opportunity of one evaluation cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfitCandidate {
    pub pair: Pair,
    pub direction: Direction,
    /// Spread before trading fees.
    pub raw_fraction: f64,
    pub fee_adjusted_fraction: f64,
    /// Absolute profit in base-currency units after fees and transfers.
    pub expected_profit: BigDecimal,
    pub tradable_base: BigDecimal,
    pub tradable_alt: BigDecimal,
    pub precision: Precision,
    pub metadata: CandidateMetadata,
}

impl ProfitCandidate {
    pub fn qualifies(&self, config: &ArbitrageConfig) -> bool {
        self.fee_adjusted_fraction >= config.min_profit_fraction
            && self.expected_profit >= config.min_profit_base
    }
}

/// Outcome of one maximizer pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Best candidate clearing both thresholds.
    Qualified(ProfitCandidate),
    /// Nothing cleared both thresholds; the best candidate seen, for reporting.
    BelowThreshold(ProfitCandidate),
    Nothing,
}
