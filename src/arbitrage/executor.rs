//! Round-trip execution: buy, transfer alt, sell, transfer base back.

use super::types::ProfitCandidate;
use crate::account::Venue;
use crate::errors::{AppError, Result};
use crate::models::{Direction, SettlementRecord};
use crate::telemetry::Telemetry;
use crate::utils::quantize_down;
use crate::withdrawal::{ManualTransfer, TransferOutcome, TransferRequest, WithdrawalCoordinator};
use bigdecimal::BigDecimal;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeLeg {
    Buy,
    Sell,
}

impl fmt::Display for TradeLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TradeLeg::Buy => "buy",
            TradeLeg::Sell => "sell",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub candidate: ProfitCandidate,
    /// Fill detail of the buy order, when the venue returns it.
    pub settlement: Option<SettlementRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(TradeRecord),
    /// A venue refused a conversion leg; no further funds were moved for it.
    Rejected { leg: TradeLeg, reason: String },
    /// Trades went through but a transfer has to be finished by hand.
    ManualFallback {
        record: TradeRecord,
        transfers: Vec<ManualTransfer>,
    },
}

pub struct TradeExecutor<'a> {
    coordinator: &'a WithdrawalCoordinator,
    telemetry: &'a Telemetry,
    base_currency: &'a str,
    auto_withdrawal: bool,
}

impl<'a> TradeExecutor<'a> {
    pub fn new(
        coordinator: &'a WithdrawalCoordinator,
        telemetry: &'a Telemetry,
        base_currency: &'a str,
        auto_withdrawal: bool,
    ) -> Self {
        Self {
            coordinator,
            telemetry,
            base_currency,
            auto_withdrawal,
        }
    }

    /// Executes the candidate's round trip.
    ///
    /// `Err` means the sequence broke after funds were committed and the
    /// session must halt rather than continue.
    pub async fn execute(
        &self,
        primary: &Venue,
        secondary: &Venue,
        candidate: &ProfitCandidate,
    ) -> Result<ExecutionOutcome> {
        if self.auto_withdrawal
            && !(primary.state.has_deposit_addresses() && secondary.state.has_deposit_addresses())
        {
            return Err(AppError::MissingDepositAddresses);
        }
        let (from, to) = match candidate.direction {
            Direction::PrimaryToSecondary => (primary, secondary),
            Direction::SecondaryToPrimary => (secondary, primary),
        };
        let pair = &candidate.pair;
        let coin = pair.coin.as_str();
        let base = self.base_currency;
        let (from_fee, to_fee) = match (from.state.trading_fee(), to.state.trading_fee()) {
            (Some(f), Some(t)) => (f, t),
            _ => return Err(AppError::Other("trading fees not loaded".into())),
        };

        self.telemetry.info(format!(
            "[TRADE] {pair}: buy {} {coin} on {} for up to {} {base}, sell on {}",
            candidate.tradable_alt,
            from.name(),
            candidate.tradable_base,
            to.name()
        ));

        // 1. buy alt at the source venue
        let bought = match from
            .exchange
            .convert_base_to_alt(
                pair,
                &candidate.tradable_base,
                &candidate.tradable_alt,
                from_fee.rate,
                to_fee.rate,
            )
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                self.telemetry
                    .error(format!("[TRADE] buy {pair} on {} rejected: {}", from.name(), e.message));
                return Ok(ExecutionOutcome::Rejected {
                    leg: TradeLeg::Buy,
                    reason: e.message,
                });
            }
        };
        debug!(venue = from.name(), amount = %bought.amount, order = %bought.order.0, "[TRADE] bought alt");

        // 2. move the alt to the destination
        let alt_fee = transaction_fee(from, coin)?;
        let alt_request = TransferRequest {
            from,
            to,
            currency: coin,
            amount: quantize_down(&(&bought.amount - alt_fee), candidate.precision.alt),
        };
        let mut manual = Vec::new();
        if let TransferOutcome::Manual { transfer, .. } = self.coordinator.transfer(&alt_request).await {
            manual.push(transfer);
        }

        // 3. sell alt at the destination
        if let Err(e) = to
            .exchange
            .convert_alt_to_base(pair, &candidate.tradable_base, &bought.amount)
            .await
        {
            self.telemetry
                .error(format!("[TRADE] sell {pair} on {} rejected: {}", to.name(), e.message));
            if manual.is_empty() {
                return Ok(ExecutionOutcome::Rejected {
                    leg: TradeLeg::Sell,
                    reason: e.message,
                });
            }
            let record = TradeRecord {
                candidate: candidate.clone(),
                settlement: None,
            };
            return Ok(ExecutionOutcome::ManualFallback {
                record,
                transfers: manual,
            });
        }
        debug!(venue = to.name(), "[TRADE] sold alt");

        // 4. return the base proceeds to the source
        let base_fee = transaction_fee(to, base)?;
        let base_request = TransferRequest {
            from: to,
            to: from,
            currency: base,
            amount: quantize_down(&(&candidate.tradable_base - base_fee), candidate.precision.base),
        };
        if manual.is_empty() {
            if let TransferOutcome::Manual { transfer, .. } =
                self.coordinator.transfer(&base_request).await
            {
                manual.push(transfer);
            }
        } else {
            let transfer = base_request.manual();
            self.telemetry.info(format!("[WITHDRAW] manually {transfer}"));
            manual.push(transfer);
        }

        // 5. settlement detail of the buy order
        let record = TradeRecord {
            candidate: candidate.clone(),
            settlement: from.exchange.check_order(&bought.order).await,
        };
        if manual.is_empty() {
            Ok(ExecutionOutcome::Completed(record))
        } else {
            Ok(ExecutionOutcome::ManualFallback {
                record,
                transfers: manual,
            })
        }
    }
}

fn transaction_fee<'v>(venue: &'v Venue, currency: &str) -> Result<&'v BigDecimal> {
    venue
        .state
        .transaction_fee(currency)
        .ok_or_else(|| AppError::MissingTransactionFee {
            venue: venue.name().to_string(),
            currency: currency.to_string(),
        })
}
