//! Cross-venue orderbook comparison.

use crate::account::{Venue, both};
use crate::models::{BookDepth, Direction, OrderbookQuote, Pair};
use crate::telemetry::Telemetry;
use crate::utils::decimal_to_f64;
use bigdecimal::BigDecimal;
use num_traits::Zero;
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::debug;

/// Raw profit of buying on one venue's ask and selling on the other's bid.
#[derive(Debug, Clone, PartialEq)]
pub struct Spread {
    pub profit_fraction: f64,
    /// Book of the buying venue for the pair.
    pub raw: BookDepth,
}

#[derive(Debug, Clone)]
pub struct Comparison {
    pub taken_at: SystemTime,
    pub primary: HashMap<Pair, OrderbookQuote>,
    pub secondary: HashMap<Pair, OrderbookQuote>,
    pub spreads: HashMap<Direction, HashMap<Pair, Spread>>,
}

impl Comparison {
    /// Builds both directions' spreads. Pairs missing from either side are left out.
    pub fn new(
        primary: HashMap<Pair, OrderbookQuote>,
        secondary: HashMap<Pair, OrderbookQuote>,
        pairs: &[Pair],
    ) -> Self {
        let mut spreads: HashMap<Direction, HashMap<Pair, Spread>> = HashMap::new();
        for direction in Direction::ALL {
            let (buy_side, sell_side) = match direction {
                Direction::PrimaryToSecondary => (&primary, &secondary),
                Direction::SecondaryToPrimary => (&secondary, &primary),
            };
            let per_pair = spreads.entry(direction).or_default();
            for pair in pairs {
                let (Some(buy), Some(sell)) = (buy_side.get(pair), sell_side.get(pair)) else {
                    debug!(%pair, %direction, "[ORDERBOOK] pair missing on one venue");
                    continue;
                };
                let Some(profit_fraction) = directional_fraction(&buy.ask, &sell.bid) else {
                    continue;
                };
                per_pair.insert(
                    pair.clone(),
                    Spread {
                        profit_fraction,
                        raw: buy.raw.clone(),
                    },
                );
            }
        }
        Self {
            taken_at: SystemTime::now(),
            primary,
            secondary,
            spreads,
        }
    }

    pub fn spread(&self, direction: Direction, pair: &Pair) -> Option<&Spread> {
        self.spreads.get(&direction)?.get(pair)
    }

    /// Quotes of the (buying, selling) venue for a direction.
    pub fn quotes(
        &self,
        direction: Direction,
    ) -> (&HashMap<Pair, OrderbookQuote>, &HashMap<Pair, OrderbookQuote>) {
        match direction {
            Direction::PrimaryToSecondary => (&self.primary, &self.secondary),
            Direction::SecondaryToPrimary => (&self.secondary, &self.primary),
        }
    }
}

/// `(bid - ask) / ask`; `None` for a non-positive ask or a spread with no `f64` form.
pub fn directional_fraction(ask: &BigDecimal, bid: &BigDecimal) -> Option<f64> {
    if *ask <= BigDecimal::zero() {
        return None;
    }
    decimal_to_f64(&((bid - ask) / ask))
}

/// Fetches both venues' average books for `volume` concurrently and compares
/// them. Either fetch failing fails the whole comparison.
pub async fn compare_orderbooks(
    primary: &Venue,
    secondary: &Venue,
    pairs: &[Pair],
    volume: &BigDecimal,
    telemetry: &Telemetry,
) -> Option<Comparison> {
    let (p, s) = futures::join!(
        primary.exchange.average_orderbook(pairs, volume),
        secondary.exchange.average_orderbook(pairs, volume)
    );
    let (p, s) = both(
        telemetry,
        "ORDERBOOK",
        (primary.name(), p),
        (secondary.name(), s),
    )?;
    Some(Comparison::new(p, s, pairs))
}
