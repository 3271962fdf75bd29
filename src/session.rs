//! Trading session: the arbitrage loop and its control surface.
//!
//! Responsibilities:
//! • Validate configuration and build both venues before trading.
//! • Refresh fees, balances and orderbooks each round, failing closed.
//! • Hand the best candidate to the executor and report the result.
//! • Stop cooperatively and always announce why the session halted.

use crate::account::{Venue, fetch_balances, shared_currencies};
use crate::arbitrage::{
    ArbitrageConfig, ExecutionOutcome, ProfitCandidate, Selection, TradeExecutor, TradeRecord,
    select_best,
};
use crate::config::SessionConfig;
use crate::errors::{AppError, Result};
use crate::exchange::ExchangeFactory;
use crate::fees::FeeResolver;
use crate::models::Pair;
use crate::orderbook::{Comparison, compare_orderbooks};
use crate::telemetry::{ExpectedProfitReport, SessionEvent, SlippageReport, Telemetry};
use crate::utils::decimal_from_f64;
use crate::withdrawal::{ManualTransfer, WithdrawalCoordinator};
use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Cooperative cancellation shared by the loop and the withdrawal retries.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `stop` has been called.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum HaltReason {
    Stopped,
    /// Transfers that have to be completed by hand.
    ManualFallback(Vec<ManualTransfer>),
    Fatal(String),
    StartupFailed(String),
}

pub struct Session;

impl Session {
    /// Validates the configuration and spawns the session loop.
    ///
    /// A configuration error is returned directly: the session never starts.
    pub fn start(config: SessionConfig, factory: Arc<dyn ExchangeFactory>) -> Result<SessionHandle> {
        config.validate()?;
        let (telemetry, events) = Telemetry::channel();
        let stop = StopSignal::new();
        let task = tokio::spawn(run_session(config, factory, telemetry, stop.clone()));
        Ok(SessionHandle {
            stop,
            events: Some(events),
            task,
        })
    }
}

pub struct SessionHandle {
    stop: StopSignal,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    task: JoinHandle<HaltReason>,
}

impl SessionHandle {
    /// Requests a stop; a round trip in flight still completes first.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Event stream for the single consumer; `None` once taken.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events.take()
    }

    /// Waits for the session to halt completely.
    pub async fn halted(self) -> HaltReason {
        match self.task.await {
            Ok(reason) => reason,
            Err(e) => HaltReason::Fatal(format!("session task failed: {e}")),
        }
    }
}

async fn run_session(
    config: SessionConfig,
    factory: Arc<dyn ExchangeFactory>,
    telemetry: Telemetry,
    stop: StopSignal,
) -> HaltReason {
    let connected = ArbitrageLoop::connect(config, &*factory, telemetry.clone(), stop.clone());
    let reason = match connected {
        Ok(mut arbitrage) => arbitrage.run().await,
        Err(e) => {
            telemetry.error(format!("[INIT] could not connect venues: {e}"));
            HaltReason::StartupFailed(e.to_string())
        }
    };
    stop.stop();
    match &reason {
        HaltReason::Stopped => telemetry.info("[HALT] session stopped"),
        HaltReason::ManualFallback(transfers) => {
            telemetry.error("[HALT] session halted for manual transfer");
            for transfer in transfers {
                telemetry.info(format!("[HALT] manually {transfer}"));
            }
        }
        HaltReason::Fatal(message) | HaltReason::StartupFailed(message) => {
            telemetry.error(format!("[HALT] session halted: {message}"))
        }
    }
    telemetry.emit(SessionEvent::Halted(reason.clone()));
    reason
}

enum Step {
    Continue,
    Halt(HaltReason),
}

/// One session's control loop over a primary/secondary venue pair.
pub struct ArbitrageLoop {
    config: SessionConfig,
    primary: Venue,
    secondary: Venue,
    fees: FeeResolver,
    coordinator: WithdrawalCoordinator,
    telemetry: Telemetry,
    stop: StopSignal,
}

impl ArbitrageLoop {
    pub fn connect(
        config: SessionConfig,
        factory: &dyn ExchangeFactory,
        telemetry: Telemetry,
        stop: StopSignal,
    ) -> Result<Self> {
        let primary = Venue::new(factory.connect(&config.primary)?);
        let secondary = Venue::new(factory.connect(&config.secondary)?);
        Ok(Self::new(config, primary, secondary, telemetry, stop))
    }

    pub fn new(
        config: SessionConfig,
        primary: Venue,
        secondary: Venue,
        telemetry: Telemetry,
        stop: StopSignal,
    ) -> Self {
        let fees = FeeResolver::new(config.fee_refresh_interval, telemetry.clone());
        let coordinator = WithdrawalCoordinator::new(
            config.auto_withdrawal,
            config.tag_coins.clone(),
            stop.clone(),
            telemetry.clone(),
        );
        Self {
            config,
            primary,
            secondary,
            fees,
            coordinator,
            telemetry,
            stop,
        }
    }

    pub async fn run(&mut self) -> HaltReason {
        self.telemetry.info(format!(
            "[INIT] minimum profit {:.4}%",
            self.config.min_profit_fraction * 100.0
        ));
        self.telemetry.info(format!(
            "[INIT] minimum profit {} {}",
            self.config.min_profit_base, self.config.base_currency
        ));
        self.telemetry
            .info(format!("[INIT] auto-withdrawal: {}", self.config.auto_withdrawal));

        if self.config.auto_withdrawal {
            self.telemetry.info("[INIT] loading deposit addresses");
            if self
                .fees
                .load_deposit_addresses(&mut self.primary, &mut self.secondary)
                .await
            {
                self.telemetry.info("[INIT] deposit addresses loaded");
            } else {
                self.telemetry
                    .error("[INIT] deposit addresses unavailable; trades will halt the session");
            }
        }
        self.telemetry.info(format!(
            "[INIT] trading {} <-> {}",
            self.primary.name(),
            self.secondary.name()
        ));

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while !self.stop.is_stopped() {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.stop.stopped() => break,
            }
            match self.iteration().await {
                Ok(Step::Continue) => {}
                Ok(Step::Halt(reason)) => return reason,
                Err(e) => {
                    self.telemetry.error(format!("[TRADE] round trip interrupted: {e}"));
                    return HaltReason::Fatal(e.to_string());
                }
            }
        }
        HaltReason::Stopped
    }

    async fn iteration(&mut self) -> Result<Step> {
        if !self
            .fees
            .refresh_fees(&mut self.primary, &mut self.secondary)
            .await
        {
            return Ok(Step::Continue);
        }

        let Some((primary_balance, secondary_balance)) =
            fetch_balances(&self.primary, &self.secondary, &self.telemetry).await
        else {
            return Ok(Step::Continue);
        };
        let base = self.config.base_currency.clone();
        let coins = shared_currencies(&primary_balance, &secondary_balance, &base);
        if coins.is_empty() {
            self.telemetry
                .info("[BALANCE] no currency is held on both venues");
            return Ok(Step::Continue);
        }

        let volume = self.target_volume(
            primary_balance.get(&base),
            secondary_balance.get(&base),
        )?;
        if volume.is_zero() {
            self.telemetry
                .info(format!("[BALANCE] no {base} balance on either venue"));
            return Ok(Step::Continue);
        }

        let pairs: Vec<Pair> = coins.iter().map(|c| Pair::new(base.as_str(), c.as_str())).collect();
        let Some(comparison) = compare_orderbooks(
            &self.primary,
            &self.secondary,
            &pairs,
            &volume,
            &self.telemetry,
        )
        .await
        else {
            return Ok(Step::Continue);
        };
        self.primary
            .state
            .commit_round(primary_balance, comparison.primary.clone());
        self.secondary
            .state
            .commit_round(secondary_balance, comparison.secondary.clone());
        debug!(pairs = pairs.len(), %volume, "[ORDERBOOK] round committed");

        let thresholds = ArbitrageConfig {
            min_profit_fraction: self.config.min_profit_fraction,
            min_profit_base: self.config.min_profit_base.clone(),
            base_currency: base,
        };
        let selection = select_best(
            &self.primary,
            &self.secondary,
            &comparison,
            &coins,
            &mut self.fees,
            &thresholds,
            &self.telemetry,
        )
        .await;

        let candidate = match selection {
            Selection::Nothing => {
                self.telemetry.info("[PROFIT] no profitable currency this round");
                return Ok(Step::Continue);
            }
            Selection::BelowThreshold(candidate) => {
                self.telemetry.info(format!(
                    "[PROFIT] best {} ({} {}) is below the configured minimum",
                    candidate.pair, candidate.expected_profit, thresholds.base_currency
                ));
                self.report_expected(&candidate);
                return Ok(Step::Continue);
            }
            Selection::Qualified(candidate) => candidate,
        };

        let executor = TradeExecutor::new(
            &self.coordinator,
            &self.telemetry,
            &thresholds.base_currency,
            self.config.auto_withdrawal,
        );
        let outcome = executor
            .execute(&self.primary, &self.secondary, &candidate)
            .await;
        self.report_expected(&candidate);

        match outcome? {
            ExecutionOutcome::Completed(record) => {
                self.telemetry.info(format!("[TRADE] {} round trip completed", record.candidate.pair));
                self.report_slippage(&record, &comparison);
                Ok(Step::Continue)
            }
            ExecutionOutcome::Rejected { leg, reason } => {
                self.telemetry
                    .error(format!("[TRADE] {} {leg} leg failed: {reason}", candidate.pair));
                Ok(Step::Continue)
            }
            ExecutionOutcome::ManualFallback { record, transfers } => {
                self.report_slippage(&record, &comparison);
                Ok(Step::Halt(HaltReason::ManualFallback(transfers)))
            }
        }
    }

    /// Orderbook averaging volume: the larger base balance times the multiplier.
    fn target_volume(
        &self,
        primary: Option<&BigDecimal>,
        secondary: Option<&BigDecimal>,
    ) -> Result<BigDecimal> {
        let zero = BigDecimal::zero();
        let primary = primary.unwrap_or(&zero);
        let secondary = secondary.unwrap_or(&zero);
        let largest = if primary > secondary { primary } else { secondary };
        let multiplier = decimal_from_f64(self.config.target_volume_multiplier).ok_or_else(|| {
            AppError::Config("target volume multiplier is not finite".into())
        })?;
        Ok(largest * multiplier)
    }

    fn report_expected(&self, candidate: &ProfitCandidate) {
        self.telemetry.emit(SessionEvent::ExpectedProfit(
            ExpectedProfitReport::from_candidate(&self.config.operator_id, candidate),
        ));
    }

    fn report_slippage(&self, record: &TradeRecord, comparison: &Comparison) {
        let pair = &record.candidate.pair;
        for (venue, quotes) in [
            (self.primary.name(), &comparison.primary),
            (self.secondary.name(), &comparison.secondary),
        ] {
            let Some(quote) = quotes.get(pair) else {
                continue;
            };
            self.telemetry.emit(SessionEvent::Slippage(SlippageReport {
                operator_id: self.config.operator_id.clone(),
                market: pair.market.clone(),
                coin: pair.coin.clone(),
                venue: venue.to_string(),
                trading_type: record.candidate.direction,
                tradings: record.settlement.clone(),
                orderbook: quote.raw.clone(),
                timestamp: SystemTime::now(),
            }));
        }
        info!(%pair, "[TRADE] slippage reported");
    }
}
