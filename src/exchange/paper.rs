//! In-memory paper venue.
//!
//! Fills against a static orderbook snapshot, moves balances the way a real
//! account would and keeps a ledger of withdrawals. Calls can be scripted to
//! fail so that fail-closed paths are reproducible.

use super::{Exchange, ExchangeFactory, VenueError, VenueResult};
use crate::config::VenueConfig;
use crate::errors::{AppError, Result};
use crate::models::{
    BookDepth, ConversionReceipt, Currency, DepositAddress, OrderRef, OrderbookQuote, Pair,
    Precision, SettlementRecord, TradingFee,
};
use crate::utils::{decimal_from_f64, decimal_to_f64};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_PRECISION: Precision = Precision { base: -8, alt: -8 };

/// Account and market state a paper venue starts from.
#[derive(Debug, Clone, Deserialize)]
pub struct PaperSnapshot {
    #[serde(default)]
    pub balances: HashMap<Currency, BigDecimal>,
    #[serde(default)]
    pub orderbooks: HashMap<Pair, BookDepth>,
    pub trading_fee: TradingFee,
    #[serde(default)]
    pub transaction_fees: HashMap<Currency, BigDecimal>,
    #[serde(default)]
    pub precision: HashMap<Pair, Precision>,
    #[serde(default)]
    pub deposit_addresses: HashMap<Currency, DepositAddress>,
}

/// Capability calls that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaperCall {
    Balance,
    Orderbook,
    TradingFee,
    TransactionFee,
    Precision,
    DepositAddresses,
    BuyAlt,
    SellAlt,
    Withdraw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaperWithdrawal {
    pub currency: Currency,
    pub amount: BigDecimal,
    pub destination: DepositAddress,
}

#[derive(Debug)]
struct PaperState {
    snapshot: PaperSnapshot,
    failures: HashMap<PaperCall, VecDeque<VenueError>>,
    calls: HashMap<PaperCall, usize>,
    orders: HashMap<OrderRef, SettlementRecord>,
    withdrawals: Vec<PaperWithdrawal>,
    next_order: u64,
}

#[derive(Debug)]
pub struct PaperExchange {
    name: String,
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new(name: impl Into<String>, snapshot: PaperSnapshot) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(PaperState {
                snapshot,
                failures: HashMap::new(),
                calls: HashMap::new(),
                orders: HashMap::new(),
                withdrawals: Vec::new(),
                next_order: 1,
            }),
        }
    }

    /// Loads a JSON snapshot from disk.
    pub fn from_file(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let snapshot: PaperSnapshot = serde_json::from_str(&raw)?;
        Ok(Self::new(name, snapshot))
    }

    /// Makes the next `times` invocations of `call` fail with `error`.
    pub fn fail_next(&self, call: PaperCall, times: usize, error: VenueError) {
        let mut state = self.lock();
        let queue = state.failures.entry(call).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    pub fn call_count(&self, call: PaperCall) -> usize {
        self.lock().calls.get(&call).copied().unwrap_or(0)
    }

    pub fn withdrawals(&self) -> Vec<PaperWithdrawal> {
        self.lock().withdrawals.clone()
    }

    pub fn balance_of(&self, currency: &str) -> BigDecimal {
        self.lock()
            .snapshot
            .balances
            .get(currency)
            .cloned()
            .unwrap_or_else(BigDecimal::zero)
    }

    /// Overwrites a balance, as a deposit or an outside trade would.
    pub fn set_balance(&self, currency: impl Into<Currency>, amount: BigDecimal) {
        self.lock().snapshot.balances.insert(currency.into(), amount);
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Counts the call and pops a scripted failure if one is queued.
    fn enter(&self, call: PaperCall) -> VenueResult<MutexGuard<'_, PaperState>> {
        let mut state = self.lock();
        *state.calls.entry(call).or_default() += 1;
        if let Some(err) = state.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }
}

impl PaperState {
    fn book(&self, pair: &Pair) -> VenueResult<&BookDepth> {
        self.snapshot
            .orderbooks
            .get(pair)
            .ok_or_else(|| VenueError::new(format!("no orderbook for {pair}")))
    }

    fn debit(&mut self, currency: &str, amount: &BigDecimal) -> VenueResult<()> {
        let available = self
            .snapshot
            .balances
            .get(currency)
            .cloned()
            .unwrap_or_else(BigDecimal::zero);
        if available < *amount {
            return Err(VenueError::new(format!(
                "insufficient {currency} balance: {available} < {amount}"
            )));
        }
        self.snapshot
            .balances
            .insert(currency.to_string(), available - amount);
        Ok(())
    }

    fn credit(&mut self, currency: &str, amount: &BigDecimal) {
        let entry = self
            .snapshot
            .balances
            .entry(currency.to_string())
            .or_insert_with(BigDecimal::zero);
        *entry += amount;
    }

    fn record_order(&mut self, detail: serde_json::Value) -> OrderRef {
        let order = OrderRef(format!("paper-{}", self.next_order));
        self.next_order += 1;
        let mut detail = detail;
        if let Some(obj) = detail.as_object_mut() {
            obj.insert("order_id".into(), serde_json::Value::String(order.0.clone()));
        }
        self.orders.insert(order.clone(), detail);
        order
    }
}

/// Average fill price when spending `base_volume` of the market currency
/// across `levels`; falls back to the depth available if the book is thin.
pub fn average_fill_price(levels: &[(f64, f64)], base_volume: f64) -> Option<f64> {
    let mut spent = 0.0;
    let mut filled = 0.0;
    for &(price, qty) in levels {
        if price <= 0.0 || qty <= 0.0 {
            continue;
        }
        let remaining = base_volume - spent;
        if remaining <= 0.0 {
            break;
        }
        let take = qty.min(remaining / price);
        spent += take * price;
        filled += take;
    }
    (filled > 0.0).then(|| spent / filled)
}

fn price(value: f64, pair: &Pair) -> VenueResult<BigDecimal> {
    decimal_from_f64(value).ok_or_else(|| VenueError::new(format!("invalid price for {pair}")))
}

#[async_trait]
impl Exchange for PaperExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn balance(&self) -> VenueResult<HashMap<Currency, BigDecimal>> {
        let state = self.enter(PaperCall::Balance)?;
        Ok(state.snapshot.balances.clone())
    }

    async fn average_orderbook(
        &self,
        pairs: &[Pair],
        volume: &BigDecimal,
    ) -> VenueResult<HashMap<Pair, OrderbookQuote>> {
        let state = self.enter(PaperCall::Orderbook)?;
        let volume = decimal_to_f64(volume)
            .ok_or_else(|| VenueError::new(format!("volume {volume} out of range")))?;
        let mut quotes = HashMap::with_capacity(pairs.len());
        for pair in pairs {
            let book = state.book(pair)?;
            let ask = average_fill_price(&book.asks, volume)
                .ok_or_else(|| VenueError::new(format!("empty ask side for {pair}")))?;
            let bid = average_fill_price(&book.bids, volume)
                .ok_or_else(|| VenueError::new(format!("empty bid side for {pair}")))?;
            quotes.insert(
                pair.clone(),
                OrderbookQuote {
                    ask: price(ask, pair)?,
                    bid: price(bid, pair)?,
                    raw: book.clone(),
                },
            );
        }
        Ok(quotes)
    }

    async fn trading_fee(&self) -> VenueResult<TradingFee> {
        let state = self.enter(PaperCall::TradingFee)?;
        Ok(state.snapshot.trading_fee)
    }

    async fn transaction_fee(&self) -> VenueResult<HashMap<Currency, BigDecimal>> {
        let state = self.enter(PaperCall::TransactionFee)?;
        Ok(state.snapshot.transaction_fees.clone())
    }

    async fn precision(&self, pair: &Pair) -> VenueResult<Precision> {
        let state = self.enter(PaperCall::Precision)?;
        Ok(state
            .snapshot
            .precision
            .get(pair)
            .copied()
            .unwrap_or(DEFAULT_PRECISION))
    }

    async fn deposit_addresses(&self) -> VenueResult<HashMap<Currency, DepositAddress>> {
        let state = self.enter(PaperCall::DepositAddresses)?;
        Ok(state.snapshot.deposit_addresses.clone())
    }

    async fn convert_base_to_alt(
        &self,
        pair: &Pair,
        _base_amount: &BigDecimal,
        alt_amount: &BigDecimal,
        fee_self: f64,
        _fee_peer: f64,
    ) -> VenueResult<ConversionReceipt> {
        let mut state = self.enter(PaperCall::BuyAlt)?;
        let ask = state
            .book(pair)?
            .asks
            .first()
            .map(|&(p, _)| p)
            .ok_or_else(|| VenueError::new(format!("empty ask side for {pair}")))?;
        let ask = price(ask, pair)?;
        let cost = alt_amount * &ask;
        let kept = price(1.0 - fee_self, pair)?;
        let realized = alt_amount * kept;

        state.debit(&pair.market, &cost)?;
        state.credit(&pair.coin, &realized);
        let order = state.record_order(serde_json::json!({
            "side": "buy",
            "pair": pair.to_string(),
            "price": ask.to_string(),
            "amount": realized.to_string(),
            "cost": cost.to_string(),
        }));
        Ok(ConversionReceipt {
            amount: realized,
            order,
        })
    }

    async fn convert_alt_to_base(
        &self,
        pair: &Pair,
        _base_amount: &BigDecimal,
        alt_amount: &BigDecimal,
    ) -> VenueResult<ConversionReceipt> {
        let mut state = self.enter(PaperCall::SellAlt)?;
        let bid = state
            .book(pair)?
            .bids
            .first()
            .map(|&(p, _)| p)
            .ok_or_else(|| VenueError::new(format!("empty bid side for {pair}")))?;
        let bid = price(bid, pair)?;
        let kept = price(1.0 - state.snapshot.trading_fee.rate, pair)?;
        let proceeds = alt_amount * &bid * kept;

        state.debit(&pair.coin, alt_amount)?;
        state.credit(&pair.market, &proceeds);
        let order = state.record_order(serde_json::json!({
            "side": "sell",
            "pair": pair.to_string(),
            "price": bid.to_string(),
            "amount": alt_amount.to_string(),
            "proceeds": proceeds.to_string(),
        }));
        Ok(ConversionReceipt {
            amount: proceeds,
            order,
        })
    }

    async fn withdraw(
        &self,
        currency: &str,
        amount: &BigDecimal,
        destination: &DepositAddress,
    ) -> VenueResult<()> {
        let mut state = self.enter(PaperCall::Withdraw)?;
        state.debit(currency, amount)?;
        state.withdrawals.push(PaperWithdrawal {
            currency: currency.to_string(),
            amount: amount.clone(),
            destination: destination.clone(),
        });
        Ok(())
    }

    async fn check_order(&self, order: &OrderRef) -> Option<SettlementRecord> {
        self.lock().orders.get(order).cloned()
    }
}

/// Hands out preloaded paper venues by name, or loads one from the snapshot
/// path given as the venue's credentials.
#[derive(Default)]
pub struct PaperFactory {
    venues: HashMap<String, Arc<PaperExchange>>,
}

impl PaperFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_venue(mut self, venue: Arc<PaperExchange>) -> Self {
        self.venues.insert(venue.name().to_string(), venue);
        self
    }
}

impl ExchangeFactory for PaperFactory {
    fn connect(&self, venue: &VenueConfig) -> Result<Arc<dyn Exchange>> {
        if let Some(existing) = self.venues.get(&venue.name) {
            return Ok(existing.clone());
        }
        if venue.credentials.is_empty() {
            return Err(AppError::Config(format!(
                "no paper snapshot configured for {}",
                venue.name
            )));
        }
        let exchange = PaperExchange::from_file(&venue.name, &venue.credentials)?;
        Ok(Arc::new(exchange))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn snapshot() -> PaperSnapshot {
        serde_json::from_str(
            r#"{
                "balances": {"BTC": "1.0", "ETH": "10"},
                "orderbooks": {
                    "BTC_ETH": {"timestamp": 1, "bids": [[0.05, 100.0]], "asks": [[0.051, 100.0]]}
                },
                "trading_fee": {"rate": 0.001, "applications": 2},
                "transaction_fees": {"BTC": "0.0005", "ETH": "0.01"},
                "deposit_addresses": {"ETH": {"address": "0xabc"}}
            }"#,
        )
        .expect("snapshot json")
    }

    #[test]
    fn average_price_walks_levels() {
        let levels = [(10.0, 1.0), (20.0, 1.0)];
        // 30 units of base buys one of each level
        assert_eq!(average_fill_price(&levels, 30.0), Some(15.0));
        // 5 units of base only touches the first level
        assert_eq!(average_fill_price(&levels, 5.0), Some(10.0));
        assert_eq!(average_fill_price(&[], 5.0), None);
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let venue = PaperExchange::new("paper", snapshot());
        venue.fail_next(PaperCall::Balance, 1, VenueError::new("maintenance"));
        let first = venue.balance().await;
        assert_eq!(first.unwrap_err().message, "maintenance");
        let second = venue.balance().await.expect("second call succeeds");
        assert_eq!(second["BTC"], dec("1.0"));
        assert_eq!(venue.call_count(PaperCall::Balance), 2);
    }

    #[tokio::test]
    async fn buy_leg_moves_balances_and_records_order() {
        let venue = PaperExchange::new("paper", snapshot());
        let pair = Pair::new("BTC", "ETH");
        let receipt = venue
            .convert_base_to_alt(&pair, &dec("0.5"), &dec("2"), 0.001, 0.001)
            .await
            .expect("buy fills");
        assert_eq!(receipt.amount, dec("1.998"));
        assert_eq!(venue.balance_of("BTC"), dec("0.898"));
        assert_eq!(venue.balance_of("ETH"), dec("11.998"));

        let detail = venue.check_order(&receipt.order).await.expect("order kept");
        assert_eq!(detail["side"], "buy");
        assert_eq!(detail["order_id"], receipt.order.0.as_str());
    }

    #[tokio::test]
    async fn withdraw_rejects_overdraft() {
        let venue = PaperExchange::new("paper", snapshot());
        let to = DepositAddress {
            address: "bc1q".into(),
            tag: None,
        };
        assert!(venue.withdraw("BTC", &dec("2"), &to).await.is_err());
        venue.withdraw("BTC", &dec("0.4"), &to).await.expect("fits");
        assert_eq!(venue.withdrawals().len(), 1);
        assert_eq!(venue.balance_of("BTC"), dec("0.6"));
    }
}
