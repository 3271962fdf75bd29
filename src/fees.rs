//! Trading/transaction fee refresh, shared precision and deposit addresses.

use crate::account::{Venue, both};
use crate::errors::{AppError, Result};
use crate::models::{Pair, Precision};
use crate::telemetry::Telemetry;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub struct FeeResolver {
    interval: Duration,
    last_refresh: Option<Instant>,
    /// Shared precision per pair, valid until the next fee refresh.
    precisions: HashMap<Pair, Precision>,
    telemetry: Telemetry,
}

impl FeeResolver {
    pub fn new(interval: Duration, telemetry: Telemetry) -> Self {
        Self {
            interval,
            last_refresh: None,
            precisions: HashMap::new(),
            telemetry,
        }
    }

    pub fn is_due(&self) -> bool {
        match self.last_refresh {
            Some(at) => at.elapsed() >= self.interval,
            None => true,
        }
    }

    /// Refreshes both venues' trading and transaction fees when due.
    ///
    /// Returns whether the fee fields are usable for this round. All four
    /// calls must succeed; otherwise nothing is written and the round is skipped.
    pub async fn refresh_fees(&mut self, primary: &mut Venue, secondary: &mut Venue) -> bool {
        if !self.is_due() {
            return true;
        }
        let (p_td, s_td, p_tx, s_tx) = futures::join!(
            primary.exchange.trading_fee(),
            secondary.exchange.trading_fee(),
            primary.exchange.transaction_fee(),
            secondary.exchange.transaction_fee(),
        );
        let trading = both(
            &self.telemetry,
            "FEE",
            (primary.name(), p_td),
            (secondary.name(), s_td),
        );
        let transaction = both(
            &self.telemetry,
            "FEE",
            (primary.name(), p_tx),
            (secondary.name(), s_tx),
        );
        let (Some((p_td, s_td)), Some((p_tx, s_tx))) = (trading, transaction) else {
            return false;
        };

        primary.state.set_fees(p_td, p_tx);
        secondary.state.set_fees(s_td, s_tx);
        self.last_refresh = Some(Instant::now());
        self.precisions.clear();
        debug!(
            primary_fee = p_td.rate,
            primary_fee_cnt = p_td.applications,
            secondary_fee = s_td.rate,
            secondary_fee_cnt = s_td.applications,
            "[FEE] refreshed"
        );
        self.telemetry.info("[FEE] trading and transaction fees refreshed");
        true
    }

    /// Shared precision for the pair, fetched at most once per refresh interval.
    /// Failed lookups are not cached.
    pub async fn precision(
        &mut self,
        primary: &Venue,
        secondary: &Venue,
        pair: &Pair,
    ) -> Result<Precision> {
        if let Some(cached) = self.precisions.get(pair) {
            return Ok(*cached);
        }
        let shared = self.resolve_precision(primary, secondary, pair).await?;
        self.precisions.insert(pair.clone(), shared);
        Ok(shared)
    }

    /// Coarser of both venues' precision for the pair, for base and alt alike,
    /// so an amount valid on one venue is valid on the other.
    pub async fn resolve_precision(
        &self,
        primary: &Venue,
        secondary: &Venue,
        pair: &Pair,
    ) -> Result<Precision> {
        let (p, s) = futures::join!(
            primary.exchange.precision(pair),
            secondary.exchange.precision(pair)
        );
        let failure = match (&p, &s) {
            (Err(e), _) => Some(AppError::venue(primary.name(), e.clone())),
            (_, Err(e)) => Some(AppError::venue(secondary.name(), e.clone())),
            _ => None,
        };
        match both(
            &self.telemetry,
            "PRECISION",
            (primary.name(), p),
            (secondary.name(), s),
        ) {
            Some((p, s)) => Ok(shared_precision(p, s)),
            None => Err(failure.unwrap_or_else(|| AppError::Other(format!("precision for {pair}")))),
        }
    }

    /// Fetches deposit addresses from both venues once. On failure neither
    /// venue's addresses are stored.
    pub async fn load_deposit_addresses(&self, primary: &mut Venue, secondary: &mut Venue) -> bool {
        let (p, s) = futures::join!(
            primary.exchange.deposit_addresses(),
            secondary.exchange.deposit_addresses()
        );
        let Some((p, s)) = both(
            &self.telemetry,
            "DEPOSIT",
            (primary.name(), p),
            (secondary.name(), s),
        ) else {
            return false;
        };
        primary.state.set_deposit_addresses(p);
        secondary.state.set_deposit_addresses(s);
        true
    }
}

pub fn shared_precision(a: Precision, b: Precision) -> Precision {
    Precision {
        base: a.base.max(b.base),
        alt: a.alt.max(b.alt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{PaperCall, PaperExchange, PaperSnapshot, VenueError};
    use std::sync::Arc;

    fn snapshot(rate: f64, precision: Precision) -> PaperSnapshot {
        let mut snapshot: PaperSnapshot = serde_json::from_value(serde_json::json!({
            "balances": {"BTC": "1"},
            "trading_fee": {"rate": rate, "applications": 2},
            "transaction_fees": {"BTC": "0.0005", "ETH": "0.01"},
            "deposit_addresses": {"BTC": {"address": "bc1q"}}
        }))
        .unwrap();
        snapshot.precision.insert(Pair::new("BTC", "ETH"), precision);
        snapshot
    }

    fn venues() -> (Arc<PaperExchange>, Arc<PaperExchange>, Venue, Venue) {
        let a = Arc::new(PaperExchange::new(
            "A",
            snapshot(0.001, Precision { base: -8, alt: -6 }),
        ));
        let b = Arc::new(PaperExchange::new(
            "B",
            snapshot(0.0025, Precision { base: -6, alt: -8 }),
        ));
        let (va, vb) = (Venue::new(a.clone()), Venue::new(b.clone()));
        (a, b, va, vb)
    }

    #[test]
    fn shared_precision_takes_coarser_per_currency() {
        let p = shared_precision(Precision { base: -8, alt: -2 }, Precision { base: -6, alt: -4 });
        assert_eq!(p, Precision { base: -6, alt: -2 });
    }

    #[tokio::test(start_paused = true)]
    async fn fee_refresh_is_rate_limited() {
        let (a, _b, mut va, mut vb) = venues();
        let mut resolver = FeeResolver::new(Duration::from_secs(600), Telemetry::disabled());

        assert!(resolver.refresh_fees(&mut va, &mut vb).await);
        assert_eq!(va.state.trading_fee().unwrap().rate, 0.001);
        assert_eq!(vb.state.trading_fee().unwrap().rate, 0.0025);

        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(resolver.refresh_fees(&mut va, &mut vb).await);
        assert_eq!(a.call_count(PaperCall::TradingFee), 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(resolver.refresh_fees(&mut va, &mut vb).await);
        assert_eq!(a.call_count(PaperCall::TradingFee), 2);
    }

    #[tokio::test]
    async fn fee_refresh_fails_closed() {
        let (_a, b, mut va, mut vb) = venues();
        b.fail_next(PaperCall::TransactionFee, 1, VenueError::new("rate limited"));
        let mut resolver = FeeResolver::new(Duration::from_secs(600), Telemetry::disabled());

        assert!(!resolver.refresh_fees(&mut va, &mut vb).await);
        assert!(va.state.trading_fee().is_none());
        assert!(vb.state.transaction_fee("BTC").is_none());
        assert!(resolver.is_due());

        assert!(resolver.refresh_fees(&mut va, &mut vb).await);
        assert!(vb.state.transaction_fee("BTC").is_some());
    }

    #[tokio::test]
    async fn precision_failure_surfaces_venue_message() {
        let (a, _b, va, vb) = venues();
        a.fail_next(PaperCall::Precision, 1, VenueError::new("unknown market"));
        let resolver = FeeResolver::new(Duration::from_secs(600), Telemetry::disabled());
        let pair = Pair::new("BTC", "ETH");

        let err = resolver.resolve_precision(&va, &vb, &pair).await.unwrap_err();
        assert!(err.to_string().contains("unknown market"));

        let shared = resolver.resolve_precision(&va, &vb, &pair).await.unwrap();
        assert_eq!(shared, Precision { base: -6, alt: -6 });
    }

    #[tokio::test(start_paused = true)]
    async fn precision_is_cached_until_the_next_fee_refresh() {
        let (a, b, mut va, mut vb) = venues();
        let mut resolver = FeeResolver::new(Duration::from_secs(600), Telemetry::disabled());
        let pair = Pair::new("BTC", "ETH");
        assert!(resolver.refresh_fees(&mut va, &mut vb).await);

        for _ in 0..5 {
            let shared = resolver.precision(&va, &vb, &pair).await.unwrap();
            assert_eq!(shared, Precision { base: -6, alt: -6 });
            tokio::time::advance(Duration::from_secs(60)).await;
            assert!(resolver.refresh_fees(&mut va, &mut vb).await);
        }
        assert_eq!(a.call_count(PaperCall::Precision), 1);
        assert_eq!(b.call_count(PaperCall::Precision), 1);

        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(resolver.refresh_fees(&mut va, &mut vb).await);
        resolver.precision(&va, &vb, &pair).await.unwrap();
        assert_eq!(a.call_count(PaperCall::Precision), 2);
    }

    #[tokio::test]
    async fn failed_precision_lookup_is_retried() {
        let (a, _b, va, vb) = venues();
        a.fail_next(PaperCall::Precision, 1, VenueError::new("unknown market"));
        let mut resolver = FeeResolver::new(Duration::from_secs(600), Telemetry::disabled());
        let pair = Pair::new("BTC", "ETH");

        assert!(resolver.precision(&va, &vb, &pair).await.is_err());
        assert!(resolver.precision(&va, &vb, &pair).await.is_ok());
        assert!(resolver.precision(&va, &vb, &pair).await.is_ok());
        assert_eq!(a.call_count(PaperCall::Precision), 2);
    }

    #[tokio::test]
    async fn deposit_addresses_need_both_venues() {
        let (_a, b, mut va, mut vb) = venues();
        b.fail_next(PaperCall::DepositAddresses, 1, VenueError::new("2fa required"));
        let resolver = FeeResolver::new(Duration::from_secs(600), Telemetry::disabled());

        assert!(!resolver.load_deposit_addresses(&mut va, &mut vb).await);
        assert!(!va.state.has_deposit_addresses());

        assert!(resolver.load_deposit_addresses(&mut va, &mut vb).await);
        assert_eq!(vb.state.deposit_address("BTC").unwrap().address, "bc1q");
    }
}
