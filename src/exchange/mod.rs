//! Exchange capability interface.
//!
//! Responsibilities:
//! • Expose one venue's balances, averaged orderbooks, fees and precision.
//! • Place the two conversion legs and withdrawals of a round trip.
//! • Report failures with the venue's own message and retry hint.
//!
//! Signing, rate limiting and HTTP retries belong to the implementations;
//! the engine only sees this uniform surface.

use crate::config::VenueConfig;
use crate::errors::Result;
use crate::models::{
    ConversionReceipt, Currency, DepositAddress, OrderRef, OrderbookQuote, Pair, Precision,
    SettlementRecord, TradingFee,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod paper;

pub use paper::{PaperCall, PaperExchange, PaperFactory, PaperSnapshot};

/// Failure reported by a venue call.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct VenueError {
    pub message: String,
    /// Venue-suggested wait before retrying, when it gives one.
    pub retry_after: Option<Duration>,
}

impl VenueError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn retry_after(message: impl Into<String>, wait: Duration) -> Self {
        Self {
            message: message.into(),
            retry_after: Some(wait),
        }
    }
}

pub type VenueResult<T> = std::result::Result<T, VenueError>;

/// One exchange account, consumed uniformly by the engine.
#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> &str;

    /// Available amount per currency.
    async fn balance(&self) -> VenueResult<HashMap<Currency, BigDecimal>>;

    /// Average executable ask/bid for `volume` units of the base currency, per pair.
    async fn average_orderbook(
        &self,
        pairs: &[Pair],
        volume: &BigDecimal,
    ) -> VenueResult<HashMap<Pair, OrderbookQuote>>;

    async fn trading_fee(&self) -> VenueResult<TradingFee>;

    /// Withdrawal fee per currency.
    async fn transaction_fee(&self) -> VenueResult<HashMap<Currency, BigDecimal>>;

    async fn precision(&self, pair: &Pair) -> VenueResult<Precision>;

    async fn deposit_addresses(&self) -> VenueResult<HashMap<Currency, DepositAddress>>;

    /// Buys `alt_amount` of the pair's coin with up to `base_amount` of its market currency.
    async fn convert_base_to_alt(
        &self,
        pair: &Pair,
        base_amount: &BigDecimal,
        alt_amount: &BigDecimal,
        fee_self: f64,
        fee_peer: f64,
    ) -> VenueResult<ConversionReceipt>;

    /// Sells `alt_amount` of the pair's coin back into its market currency.
    async fn convert_alt_to_base(
        &self,
        pair: &Pair,
        base_amount: &BigDecimal,
        alt_amount: &BigDecimal,
    ) -> VenueResult<ConversionReceipt>;

    async fn withdraw(
        &self,
        currency: &str,
        amount: &BigDecimal,
        destination: &DepositAddress,
    ) -> VenueResult<()>;

    async fn check_order(&self, order: &OrderRef) -> Option<SettlementRecord>;
}

/// Builds venue handles from their configured identity and opaque credentials.
pub trait ExchangeFactory: Send + Sync {
    fn connect(&self, venue: &VenueConfig) -> Result<Arc<dyn Exchange>>;
}
