use super::types::{ArbitrageConfig, CandidateMetadata, ProfitCandidate, Selection, TradableAmount};
use crate::account::Venue;
use crate::fees::FeeResolver;
use crate::models::{Currency, Direction, Pair, Precision, TradingFee};
use crate::orderbook::Comparison;
use crate::telemetry::Telemetry;
use crate::utils::{decimal_from_f64, quantize_down};
use bigdecimal::BigDecimal;
use num_traits::Zero;
use std::collections::HashSet;
use tracing::debug;

/// Spread after compounding each venue's trading fee over the number of
/// times it is charged in the round trip.
pub fn fee_adjusted_fraction(raw_fraction: f64, fee_a: TradingFee, fee_b: TradingFee) -> f64 {
    let kept_a = (1.0 - fee_a.rate).powi(fee_a.applications as i32);
    let kept_b = (1.0 - fee_b.rate).powi(fee_b.applications as i32);
    (1.0 + raw_fraction) * kept_a * kept_b - 1.0
}

/// Sizes the round trip by whichever side binds first: the buying venue's
/// base balance, or the selling venue's alt holdings valued at its bid.
/// Both amounts are truncated to the shared precision.
pub fn find_min_balance(
    source_base: &BigDecimal,
    dest_alt: &BigDecimal,
    dest_bid: &BigDecimal,
    precision: Precision,
) -> TradableAmount {
    if *dest_bid <= BigDecimal::zero() {
        return TradableAmount {
            base: BigDecimal::zero(),
            alt: BigDecimal::zero(),
        };
    }
    let alt_value = dest_alt * dest_bid;
    if *source_base < alt_value {
        TradableAmount {
            base: quantize_down(source_base, precision.base),
            alt: quantize_down(&(source_base / dest_bid), precision.alt),
        }
    } else {
        TradableAmount {
            base: quantize_down(&alt_value, precision.base),
            alt: quantize_down(dest_alt, precision.alt),
        }
    }
}

/// Profit in base units after paying the alt withdrawal (valued at the buy
/// price) and the base withdrawal.
pub fn absolute_profit(
    tradable_base: &BigDecimal,
    fee_adjusted_fraction: &BigDecimal,
    source_alt_tx_fee: &BigDecimal,
    source_ask: &BigDecimal,
    dest_base_tx_fee: &BigDecimal,
) -> BigDecimal {
    tradable_base * fee_adjusted_fraction - source_alt_tx_fee * source_ask - dest_base_tx_fee
}

/// Ranks every (direction, currency held on both venues) by absolute profit.
/// Ties keep the earlier candidate.
pub async fn select_best(
    primary: &Venue,
    secondary: &Venue,
    comparison: &Comparison,
    currencies: &[Currency],
    resolver: &mut FeeResolver,
    config: &ArbitrageConfig,
    telemetry: &Telemetry,
) -> Selection {
    let base = config.base_currency.as_str();
    let held: Vec<&Currency> = currencies
        .iter()
        .filter(|coin| {
            [primary, secondary].into_iter().all(|venue| {
                let funded = !venue.state.balance(coin).is_zero();
                if !funded {
                    telemetry.info(format!("[PROFIT] {} has no {coin} balance", venue.name()));
                }
                funded
            })
        })
        .collect();
    let mut no_precision: HashSet<Pair> = HashSet::new();
    let mut best_seen: Option<ProfitCandidate> = None;
    let mut best_qualified: Option<ProfitCandidate> = None;

    for direction in Direction::ALL {
        let (source, dest) = match direction {
            Direction::PrimaryToSecondary => (primary, secondary),
            Direction::SecondaryToPrimary => (secondary, primary),
        };
        let (source_quotes, dest_quotes) = comparison.quotes(direction);

        for coin in held.iter().copied() {
            let pair = Pair::new(base, coin.as_str());
            let Some(spread) = comparison.spread(direction, &pair) else {
                continue;
            };
            telemetry.info(format!(
                "[PROFIT] {} -> {} {pair}: expected {:.4}%",
                source.name(),
                dest.name(),
                spread.profit_fraction * 100.0
            ));
            if spread.profit_fraction < config.min_profit_fraction {
                continue;
            }

            let (Some(source_fee), Some(dest_fee)) =
                (source.state.trading_fee(), dest.state.trading_fee())
            else {
                telemetry.error(format!("[PROFIT] trading fees not loaded, skipping {pair}"));
                continue;
            };
            let real_diff = fee_adjusted_fraction(spread.profit_fraction, source_fee, dest_fee);

            if no_precision.contains(&pair) {
                continue;
            }
            let precision = match resolver.precision(primary, secondary, &pair).await {
                Ok(precision) => precision,
                Err(e) => {
                    telemetry.error(format!("[PROFIT] precision unavailable for {pair}: {e}"));
                    no_precision.insert(pair);
                    continue;
                }
            };

            let (Some(source_quote), Some(dest_quote)) =
                (source_quotes.get(&pair), dest_quotes.get(&pair))
            else {
                continue;
            };
            let tradable = find_min_balance(
                &source.state.balance(base),
                &dest.state.balance(coin),
                &dest_quote.bid,
                precision,
            );
            if tradable.base.is_zero() || tradable.alt.is_zero() {
                debug!(%pair, %direction, "[PROFIT] nothing tradable after rounding");
                continue;
            }
            telemetry.info(format!(
                "[PROFIT] {} -> {} {coin}: tradable {} {coin} / {} {base}",
                source.name(),
                dest.name(),
                tradable.alt,
                tradable.base
            ));

            let (Some(alt_tx_fee), Some(base_tx_fee)) = (
                source.state.transaction_fee(coin),
                dest.state.transaction_fee(base),
            ) else {
                telemetry.error(format!(
                    "[PROFIT] transaction fees missing for {pair}, skipping"
                ));
                continue;
            };
            let Some(real_diff_dec) = decimal_from_f64(real_diff) else {
                continue;
            };
            let profit = absolute_profit(
                &tradable.base,
                &real_diff_dec,
                alt_tx_fee,
                &source_quote.ask,
                base_tx_fee,
            );
            telemetry.info(format!(
                "[PROFIT] {} -> {} {coin}: {profit} {base} ({:.4}% after fees)",
                source.name(),
                dest.name(),
                real_diff * 100.0
            ));

            let candidate = ProfitCandidate {
                pair,
                direction,
                raw_fraction: spread.profit_fraction,
                fee_adjusted_fraction: real_diff,
                expected_profit: profit,
                tradable_base: tradable.base,
                tradable_alt: tradable.alt,
                precision,
                metadata: CandidateMetadata {
                    taken_at: comparison.taken_at,
                    primary_venue: primary.name().to_string(),
                    secondary_venue: secondary.name().to_string(),
                    raw_orderbook: spread.raw.clone(),
                },
            };
            if candidate.qualifies(config) && beats(&candidate, best_qualified.as_ref()) {
                best_qualified = Some(candidate.clone());
            }
            if beats(&candidate, best_seen.as_ref()) {
                best_seen = Some(candidate);
            }
        }
    }

    match (best_qualified, best_seen) {
        (Some(best), _) => Selection::Qualified(best),
        (None, Some(best)) => Selection::BelowThreshold(best),
        (None, None) => Selection::Nothing,
    }
}

fn beats(candidate: &ProfitCandidate, incumbent: Option<&ProfitCandidate>) -> bool {
    incumbent.is_none_or(|best| candidate.expected_profit > best.expected_profit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{PaperCall, PaperExchange, PaperSnapshot, VenueError};
    use crate::models::{BookDepth, OrderbookQuote};
    use std::str::FromStr;
    use std::sync::Arc;
    use std::time::Duration;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    const FEE: TradingFee = TradingFee {
        rate: 0.001,
        applications: 2,
    };

    #[test]
    fn scenario_a_fee_adjusted_fraction() {
        let real = fee_adjusted_fraction(0.02, FEE, FEE);
        let expected = 1.02 * 0.999f64.powi(4) - 1.0;
        assert!((real - expected).abs() < 1e-12);
        assert!((real - 0.0159).abs() < 1e-4);
    }

    #[test]
    fn more_fee_applications_never_increase_profit() {
        for raw in [-0.01, 0.0, 0.005, 0.02, 0.3] {
            let mut previous = f64::INFINITY;
            for cnt in 0..6 {
                let fee = TradingFee {
                    rate: 0.0025,
                    applications: cnt,
                };
                let real = fee_adjusted_fraction(raw, fee, FEE);
                assert!(real <= previous, "raw {raw} cnt {cnt}");
                previous = real;
            }
        }
    }

    #[test]
    fn base_balance_binds_when_smaller() {
        let precision = Precision { base: -8, alt: -4 };
        // 10 ETH at 0.05 is worth 0.5 BTC; only 0.3 BTC on the buying side.
        let t = find_min_balance(&dec("0.3"), &dec("10"), &dec("0.05"), precision);
        assert_eq!(t.base, dec("0.3"));
        assert_eq!(t.alt, dec("6"));

        let t = find_min_balance(&dec("0.1"), &dec("10"), &dec("0.03"), precision);
        assert_eq!(t.alt, dec("3.3333"));
    }

    #[test]
    fn alt_balance_binds_when_smaller() {
        let precision = Precision { base: -3, alt: -2 };
        let t = find_min_balance(&dec("1.0"), &dec("10.129"), &dec("0.05"), precision);
        assert_eq!(t.alt, dec("10.12"));
        // 10.129 * 0.05 = 0.50645, truncated to 3 places
        assert_eq!(t.base, dec("0.506"));
    }

    #[test]
    fn tradable_amounts_never_exceed_inputs() {
        let bids = ["0.0312345", "0.05", "1.5", "0.00000123"];
        let bases = ["0", "0.00000001", "0.5", "1.0", "7.77777777"];
        let alts = ["0", "0.1", "10", "12345.678901"];
        for exp in [-8, -6, -2, 0] {
            let precision = Precision { base: exp, alt: exp };
            for bid in bids {
                for base in bases {
                    for alt in alts {
                        let (bid, base, alt) = (dec(bid), dec(base), dec(alt));
                        let t = find_min_balance(&base, &alt, &bid, precision);
                        assert!(t.base <= base, "base {} > {}", t.base, base);
                        assert!(t.base <= &alt * &bid);
                        assert!(t.alt <= alt || &t.alt * &bid <= base);
                        assert_eq!(t.base, quantize_down(&t.base, exp));
                        assert_eq!(t.alt, quantize_down(&t.alt, exp));
                        assert!(t.base >= BigDecimal::zero() && t.alt >= BigDecimal::zero());
                    }
                }
            }
        }
    }

    #[test]
    fn absolute_profit_subtracts_both_transfers() {
        let profit = absolute_profit(&dec("0.5"), &dec("0.02"), &dec("0.01"), &dec("0.05"), &dec("0.0005"));
        // 0.01 - 0.0005 - 0.0005
        assert_eq!(profit, dec("0.009"));
    }

    fn snapshot(
        balances: serde_json::Value,
        bid: f64,
        ask: f64,
    ) -> PaperSnapshot {
        serde_json::from_value(serde_json::json!({
            "balances": balances,
            "orderbooks": {"BTC_ETH": {"timestamp": 0, "bids": [[bid, 16.0]], "asks": [[ask, 16.0]]}},
            "trading_fee": {"rate": 0.001, "applications": 2},
            "transaction_fees": {"BTC": "0.0005", "ETH": "0.01"}
        }))
        .unwrap()
    }

    struct Fixture {
        a: Arc<PaperExchange>,
        primary: Venue,
        secondary: Venue,
        resolver: FeeResolver,
    }

    async fn fixture(secondary_eth: &str) -> Fixture {
        let a = Arc::new(PaperExchange::new(
            "A",
            snapshot(serde_json::json!({"BTC": "1.0", "ETH": "10"}), 0.049, 0.050),
        ));
        let b = Arc::new(PaperExchange::new(
            "B",
            snapshot(serde_json::json!({"BTC": "0.5", "ETH": secondary_eth}), 0.051, 0.052),
        ));
        let mut primary = Venue::new(a.clone());
        let mut secondary = Venue::new(b);
        let mut resolver = FeeResolver::new(Duration::from_secs(600), Telemetry::disabled());
        assert!(resolver.refresh_fees(&mut primary, &mut secondary).await);
        Fixture {
            a,
            primary,
            secondary,
            resolver,
        }
    }

    async fn evaluate(f: &mut Fixture, config: &ArbitrageConfig) -> Selection {
        evaluate_with(f, config, &Telemetry::disabled()).await
    }

    async fn evaluate_with(
        f: &mut Fixture,
        config: &ArbitrageConfig,
        telemetry: &Telemetry,
    ) -> Selection {
        let pair = Pair::new("BTC", "ETH");
        let (pb, sb) = crate::account::fetch_balances(&f.primary, &f.secondary, telemetry)
            .await
            .unwrap();
        let cmp = crate::orderbook::compare_orderbooks(
            &f.primary,
            &f.secondary,
            std::slice::from_ref(&pair),
            &dec("1.5"),
            telemetry,
        )
        .await
        .unwrap();
        f.primary.state.commit_round(pb, cmp.primary.clone());
        f.secondary.state.commit_round(sb, cmp.secondary.clone());
        let coins = vec!["ETH".to_string()];
        select_best(
            &f.primary,
            &f.secondary,
            &cmp,
            &coins,
            &mut f.resolver,
            config,
            telemetry,
        )
        .await
    }

    fn config(min_fraction: f64, min_base: &str) -> ArbitrageConfig {
        ArbitrageConfig {
            min_profit_fraction: min_fraction,
            min_profit_base: dec(min_base),
            base_currency: "BTC".into(),
        }
    }

    #[tokio::test]
    async fn scenario_a_candidate_qualifies() {
        let mut f = fixture("10").await;
        let Selection::Qualified(c) = evaluate(&mut f, &config(0.01, "0")).await else {
            panic!("expected a qualified candidate");
        };
        assert_eq!(c.direction, Direction::PrimaryToSecondary);
        assert!((c.raw_fraction - 0.02).abs() < 1e-12);
        assert!((c.fee_adjusted_fraction - 0.0159).abs() < 1e-4);
        // B holds 10 ETH worth 0.51 BTC at its bid; A only has 1.0 BTC, so ETH binds
        assert_eq!(c.tradable_alt, dec("10"));
        assert_eq!(c.tradable_base, dec("0.51"));
        assert!(c.expected_profit > BigDecimal::zero());
        assert!(c.fee_adjusted_fraction >= 0.01);
        assert_eq!(c.metadata.primary_venue, "A");
    }

    #[tokio::test]
    async fn scenario_b_zero_alt_balance_skips_currency() {
        let mut f = fixture("0").await;
        assert_eq!(evaluate(&mut f, &config(0.01, "0")).await, Selection::Nothing);
    }

    #[tokio::test]
    async fn high_absolute_minimum_reports_below_threshold() {
        let mut f = fixture("10").await;
        match evaluate(&mut f, &config(0.01, "5")).await {
            Selection::BelowThreshold(c) => assert!(c.expected_profit < dec("5")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn precision_failure_skips_currency() {
        let mut f = fixture("10").await;
        f.a.fail_next(PaperCall::Precision, 1, VenueError::new("no market"));
        assert_eq!(evaluate(&mut f, &config(0.01, "0")).await, Selection::Nothing);
    }

    #[tokio::test]
    async fn fee_erosion_below_minimum_is_not_qualified() {
        let mut f = fixture("10").await;
        // raw 2% clears 1.9%, but four 0.1% fees bring it to about 1.59%
        match evaluate(&mut f, &config(0.019, "0")).await {
            Selection::BelowThreshold(c) => {
                assert!(c.raw_fraction >= 0.019);
                assert!(c.fee_adjusted_fraction < 0.019);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_balance_is_logged_once_per_round() {
        let mut f = fixture("0").await;
        let (telemetry, mut events) = Telemetry::channel();
        assert_eq!(
            evaluate_with(&mut f, &config(0.01, "0"), &telemetry).await,
            Selection::Nothing
        );

        let mut mentions = 0;
        while let Ok(event) = events.try_recv() {
            if let crate::telemetry::SessionEvent::Log { message, .. } = event {
                if message.contains("has no ETH balance") {
                    mentions += 1;
                }
            }
        }
        assert_eq!(mentions, 1);
    }

    #[tokio::test]
    async fn precision_is_fetched_once_across_rounds() {
        let mut f = fixture("10").await;
        for _ in 0..3 {
            assert!(matches!(
                evaluate(&mut f, &config(0.01, "0")).await,
                Selection::Qualified(_)
            ));
        }
        assert_eq!(f.a.call_count(PaperCall::Precision), 1);
    }
}
