pub mod evaluator;
pub mod executor;
pub mod types;

pub use evaluator::{absolute_profit, fee_adjusted_fraction, find_min_balance, select_best};
pub use executor::{ExecutionOutcome, TradeExecutor, TradeLeg, TradeRecord};
pub use types::{ArbitrageConfig, CandidateMetadata, ProfitCandidate, Selection, TradableAmount};
