//! Per-venue account state.
//!
//! One `AccountState` per venue, written back only from successful paired
//! refreshes; everything else reads it through accessors.

use crate::exchange::{Exchange, VenueResult};
use crate::models::{Currency, DepositAddress, OrderbookQuote, Pair, TradingFee};
use crate::telemetry::Telemetry;
use bigdecimal::BigDecimal;
use num_traits::Zero;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct AccountState {
    name: String,
    balances: HashMap<Currency, BigDecimal>,
    orderbooks: HashMap<Pair, OrderbookQuote>,
    trading_fee: Option<TradingFee>,
    transaction_fees: HashMap<Currency, BigDecimal>,
    deposit_addresses: Option<HashMap<Currency, DepositAddress>>,
}

impl AccountState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn balances(&self) -> &HashMap<Currency, BigDecimal> {
        &self.balances
    }

    /// Available amount, zero when the venue does not list the currency.
    pub fn balance(&self, currency: &str) -> BigDecimal {
        self.balances
            .get(currency)
            .cloned()
            .unwrap_or_else(BigDecimal::zero)
    }

    pub fn orderbook(&self, pair: &Pair) -> Option<&OrderbookQuote> {
        self.orderbooks.get(pair)
    }

    pub fn trading_fee(&self) -> Option<TradingFee> {
        self.trading_fee
    }

    pub fn transaction_fee(&self, currency: &str) -> Option<&BigDecimal> {
        self.transaction_fees.get(currency)
    }

    pub fn deposit_address(&self, currency: &str) -> Option<&DepositAddress> {
        self.deposit_addresses.as_ref()?.get(currency)
    }

    pub fn has_deposit_addresses(&self) -> bool {
        self.deposit_addresses.is_some()
    }

    /// Balances and orderbooks from the same refresh round, stored together.
    pub(crate) fn commit_round(
        &mut self,
        balances: HashMap<Currency, BigDecimal>,
        orderbooks: HashMap<Pair, OrderbookQuote>,
    ) {
        self.balances = balances;
        self.orderbooks = orderbooks;
    }

    pub(crate) fn set_fees(
        &mut self,
        trading_fee: TradingFee,
        transaction_fees: HashMap<Currency, BigDecimal>,
    ) {
        self.trading_fee = Some(trading_fee);
        self.transaction_fees = transaction_fees;
    }

    pub(crate) fn set_deposit_addresses(&mut self, addresses: HashMap<Currency, DepositAddress>) {
        self.deposit_addresses = Some(addresses);
    }
}

/// A venue's capability handle together with its account state.
pub struct Venue {
    pub exchange: Arc<dyn Exchange>,
    pub state: AccountState,
}

impl Venue {
    pub fn new(exchange: Arc<dyn Exchange>) -> Self {
        let state = AccountState::new(exchange.name());
        Self { exchange, state }
    }

    pub fn name(&self) -> &str {
        self.state.name()
    }
}

/// Pairs the results of a call made on both venues; any failure fails both.
pub(crate) fn both<T>(
    telemetry: &Telemetry,
    what: &str,
    primary: (&str, VenueResult<T>),
    secondary: (&str, VenueResult<T>),
) -> Option<(T, T)> {
    let (primary_name, primary) = primary;
    let (secondary_name, secondary) = secondary;
    for (name, res) in [(primary_name, &primary), (secondary_name, &secondary)] {
        if let Err(e) = res {
            telemetry.error(format!("[{what}] {name}: {}", e.message));
        }
    }
    match (primary, secondary) {
        (Ok(p), Ok(s)) => Some((p, s)),
        _ => None,
    }
}

/// Fetches both venues' balances concurrently. Nothing is stored here; the
/// caller commits them once the rest of the round has succeeded too.
pub async fn fetch_balances(
    primary: &Venue,
    secondary: &Venue,
    telemetry: &Telemetry,
) -> Option<(HashMap<Currency, BigDecimal>, HashMap<Currency, BigDecimal>)> {
    let (p, s) = futures::join!(primary.exchange.balance(), secondary.exchange.balance());
    both(
        telemetry,
        "BALANCE",
        (primary.name(), p),
        (secondary.name(), s),
    )
}

/// Non-base currencies listed on both venues, in stable order.
pub fn shared_currencies(
    primary: &HashMap<Currency, BigDecimal>,
    secondary: &HashMap<Currency, BigDecimal>,
    base: &str,
) -> Vec<Currency> {
    let primary: BTreeSet<&Currency> = primary.keys().collect();
    secondary
        .keys()
        .filter(|c| c.as_str() != base && primary.contains(c))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::VenueError;
    use std::str::FromStr;

    fn balances(entries: &[(&str, &str)]) -> HashMap<Currency, BigDecimal> {
        entries
            .iter()
            .map(|(c, a)| (c.to_string(), BigDecimal::from_str(a).unwrap()))
            .collect()
    }

    #[test]
    fn shared_currencies_excludes_base_and_one_sided() {
        let p = balances(&[("BTC", "1"), ("ETH", "2"), ("XRP", "3"), ("LTC", "1")]);
        let s = balances(&[("BTC", "1"), ("XRP", "0"), ("ETH", "1"), ("ADA", "5")]);
        assert_eq!(shared_currencies(&p, &s, "BTC"), vec!["ETH", "XRP"]);
    }

    #[test]
    fn pairing_fails_closed() {
        let telemetry = Telemetry::disabled();
        let ok: VenueResult<u8> = Ok(1);
        let bad: VenueResult<u8> = Err(VenueError::new("down"));
        assert!(both(&telemetry, "T", ("a", ok.clone()), ("b", bad.clone())).is_none());
        assert!(both(&telemetry, "T", ("a", bad), ("b", ok.clone())).is_none());
        assert_eq!(both(&telemetry, "T", ("a", ok.clone()), ("b", ok)), Some((1, 1)));
    }

    #[test]
    fn missing_balance_reads_as_zero() {
        let state = AccountState::new("venue");
        assert!(state.balance("ETH").is_zero());
        assert!(state.deposit_address("ETH").is_none());
        assert!(!state.has_deposit_addresses());
    }
}
