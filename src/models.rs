//! Shared data structures used throughout the application.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Currency ticker, e.g. "BTC" or "ETH".
pub type Currency = String;

/// Venue-reported fill/order detail attached to a candidate after a trade.
pub type SettlementRecord = serde_json::Value;

/// Market/coin pair in `MARKET_COIN` form, e.g. `BTC_ETH`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pair {
    pub market: Currency,
    pub coin: Currency,
}

impl Pair {
    pub fn new(market: impl Into<Currency>, coin: impl Into<Currency>) -> Self {
        Self {
            market: market.into(),
            coin: coin.into(),
        }
    }

    /// Parses `MARKET_COIN`; both halves must be non-empty.
    pub fn parse(symbol: &str) -> Option<Self> {
        let (market, coin) = symbol.split_once('_')?;
        if market.is_empty() || coin.is_empty() || coin.contains('_') {
            return None;
        }
        Some(Self::new(market, coin))
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.market, self.coin)
    }
}

impl TryFrom<String> for Pair {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Pair::parse(&value).ok_or_else(|| format!("invalid pair symbol: {value}"))
    }
}

impl From<Pair> for String {
    fn from(pair: Pair) -> Self {
        pair.to_string()
    }
}

/// Direction of the round trip: which venue buys the alt first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    PrimaryToSecondary,
    SecondaryToPrimary,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::PrimaryToSecondary, Direction::SecondaryToPrimary];
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::PrimaryToSecondary => f.write_str("primary_to_secondary"),
            Direction::SecondaryToPrimary => f.write_str("secondary_to_primary"),
        }
    }
}

/// Raw orderbook levels as (price, quantity), kept for audit and slippage reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookDepth {
    pub timestamp: u64,
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

/// Average executable prices for a target volume plus the book they came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderbookQuote {
    pub ask: BigDecimal,
    pub bid: BigDecimal,
    pub raw: BookDepth,
}

/// Trading fee fraction and how many times it is charged in one round trip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradingFee {
    pub rate: f64,
    pub applications: u32,
}

/// Decimal exponents of the smallest tradable unit (`-8` means `1e-8`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precision {
    pub base: i64,
    pub alt: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositAddress {
    pub address: String,
    #[serde(default)]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderRef(pub String);

/// Result of a conversion leg: the amount actually realized and the order it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionReceipt {
    pub amount: BigDecimal,
    pub order: OrderRef,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_parses_market_coin_symbols() {
        let pair = Pair::parse("BTC_ETH").expect("valid symbol");
        assert_eq!(pair.market, "BTC");
        assert_eq!(pair.coin, "ETH");
        assert_eq!(pair.to_string(), "BTC_ETH");
        assert!(Pair::parse("BTCETH").is_none());
        assert!(Pair::parse("_ETH").is_none());
        assert!(Pair::parse("BTC_ETH_X").is_none());
    }

    #[test]
    fn pair_serializes_as_symbol() {
        let json = serde_json::to_string(&Pair::new("BTC", "XRP")).unwrap();
        assert_eq!(json, "\"BTC_XRP\"");
        let back: Pair = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Pair::new("BTC", "XRP"));
    }
}
