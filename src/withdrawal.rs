//! Fund transfers between the two venues.
//!
//! Each transfer runs a small state machine:
//!
//! ```text
//! CheckAddress ──▶ Send ──▶ Success
//!      │            │  ▲
//!      │            ▼  │
//!      │         RetryWait
//!      ▼            │ (stop)
//! ManualFallback ◀──┘
//! ```
//!
//! Manual fallback stops the session: once one leg of a round trip needs a
//! human, nothing else is moved automatically.

use crate::account::Venue;
use crate::models::DepositAddress;
use crate::session::StopSignal;
use crate::telemetry::Telemetry;
use bigdecimal::BigDecimal;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Wait used when a venue rejects a withdrawal without suggesting one.
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(5);

/// Instruction for a transfer the operator has to make by hand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualTransfer {
    pub from_venue: String,
    pub to_venue: String,
    pub currency: String,
    pub amount: BigDecimal,
}

impl fmt::Display for ManualTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "send {} {} from {} to {}",
            self.amount, self.currency, self.from_venue, self.to_venue
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FallbackReason {
    AutoWithdrawalDisabled,
    MissingAddress,
    MissingTag,
    Stopped,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FallbackReason::AutoWithdrawalDisabled => "auto-withdrawal is disabled",
            FallbackReason::MissingAddress => "no deposit address",
            FallbackReason::MissingTag => "no deposit tag",
            FallbackReason::Stopped => "session stopped",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferState {
    CheckAddress,
    Send(DepositAddress),
    RetryWait {
        wait: Duration,
        destination: DepositAddress,
    },
    Success,
    ManualFallback(FallbackReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    Sent { failed_attempts: u32 },
    Manual {
        transfer: ManualTransfer,
        reason: FallbackReason,
    },
}

pub struct TransferRequest<'a> {
    pub from: &'a Venue,
    pub to: &'a Venue,
    pub currency: &'a str,
    pub amount: BigDecimal,
}

impl TransferRequest<'_> {
    pub fn manual(&self) -> ManualTransfer {
        ManualTransfer {
            from_venue: self.from.name().to_string(),
            to_venue: self.to.name().to_string(),
            currency: self.currency.to_string(),
            amount: self.amount.clone(),
        }
    }
}

pub struct WithdrawalCoordinator {
    auto_withdrawal: bool,
    tag_coins: Vec<String>,
    stop: StopSignal,
    telemetry: Telemetry,
}

impl WithdrawalCoordinator {
    pub fn new(
        auto_withdrawal: bool,
        tag_coins: Vec<String>,
        stop: StopSignal,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            auto_withdrawal,
            tag_coins,
            stop,
            telemetry,
        }
    }

    /// Moves `request.amount` of `request.currency` from one venue to the
    /// other, retrying rejected withdrawals for as long as the session runs.
    pub async fn transfer(&self, request: &TransferRequest<'_>) -> TransferOutcome {
        let mut state = if self.auto_withdrawal {
            TransferState::CheckAddress
        } else {
            TransferState::ManualFallback(FallbackReason::AutoWithdrawalDisabled)
        };
        let mut failed_attempts = 0u32;

        loop {
            state = match state {
                TransferState::CheckAddress => {
                    if self.stop.is_stopped() {
                        TransferState::ManualFallback(FallbackReason::Stopped)
                    } else {
                        match self.destination(request) {
                            Ok(address) => TransferState::Send(address),
                            Err(reason) => TransferState::ManualFallback(reason),
                        }
                    }
                }
                TransferState::Send(destination) => {
                    match request
                        .from
                        .exchange
                        .withdraw(request.currency, &request.amount, &destination)
                        .await
                    {
                        Ok(()) => TransferState::Success,
                        Err(e) => {
                            failed_attempts += 1;
                            let wait = e.retry_after.unwrap_or(DEFAULT_RETRY_WAIT);
                            self.telemetry.error(format!(
                                "[WITHDRAW] {} -> {} {} failed (attempt {failed_attempts}): {}",
                                request.from.name(),
                                request.to.name(),
                                request.currency,
                                e.message
                            ));
                            self.telemetry.info(format!(
                                "[WITHDRAW] retrying in {}s; stop the session to finish manually",
                                wait.as_secs()
                            ));
                            TransferState::RetryWait { wait, destination }
                        }
                    }
                }
                TransferState::RetryWait { wait, destination } => {
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {
                            if self.stop.is_stopped() {
                                TransferState::ManualFallback(FallbackReason::Stopped)
                            } else {
                                TransferState::Send(destination)
                            }
                        }
                        _ = self.stop.stopped() => TransferState::ManualFallback(FallbackReason::Stopped),
                    }
                }
                TransferState::Success => {
                    self.telemetry.info(format!(
                        "[WITHDRAW] sent {} {} from {} to {}",
                        request.amount,
                        request.currency,
                        request.from.name(),
                        request.to.name()
                    ));
                    return TransferOutcome::Sent { failed_attempts };
                }
                TransferState::ManualFallback(reason) => {
                    return self.fallback(request, reason);
                }
            };
        }
    }

    fn destination(&self, request: &TransferRequest<'_>) -> Result<DepositAddress, FallbackReason> {
        let address = request
            .to
            .state
            .deposit_address(request.currency)
            .filter(|a| !a.address.trim().is_empty())
            .ok_or(FallbackReason::MissingAddress)?;
        let needs_tag = self.tag_coins.iter().any(|c| c == request.currency);
        if needs_tag && address.tag.as_deref().is_none_or(|t| t.trim().is_empty()) {
            return Err(FallbackReason::MissingTag);
        }
        Ok(address.clone())
    }

    fn fallback(&self, request: &TransferRequest<'_>, reason: FallbackReason) -> TransferOutcome {
        let transfer = request.manual();
        self.telemetry.error(format!(
            "[WITHDRAW] {} for {} on {}; manual transfer required",
            reason,
            request.currency,
            request.to.name()
        ));
        self.telemetry.info(format!("[WITHDRAW] manually {transfer}"));
        self.stop.stop();
        TransferOutcome::Manual { transfer, reason }
    }
}
