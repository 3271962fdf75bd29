//! Outbound session telemetry.
//!
//! Operator-facing log lines, expected-profit and slippage reports, and the
//! final halt notification all travel on one unbounded channel so that
//! emitting never blocks the trading loop.

use crate::arbitrage::ProfitCandidate;
use crate::models::{BookDepth, Direction, SettlementRecord};
use crate::session::HaltReason;
use bigdecimal::BigDecimal;
use serde::Serialize;
use std::time::SystemTime;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

/// Expected profit of an evaluated candidate, traded or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpectedProfitReport {
    pub operator_id: String,
    pub pair: String,
    pub direction: Direction,
    pub profit_fraction: f64,
    pub profit_base: BigDecimal,
    pub timestamp: SystemTime,
    pub primary_venue: String,
    pub secondary_venue: String,
    pub raw_orderbook: BookDepth,
}

impl ExpectedProfitReport {
    pub fn from_candidate(operator_id: &str, candidate: &ProfitCandidate) -> Self {
        Self {
            operator_id: operator_id.to_string(),
            pair: candidate.pair.to_string(),
            direction: candidate.direction,
            profit_fraction: candidate.fee_adjusted_fraction,
            profit_base: candidate.expected_profit.clone(),
            timestamp: candidate.metadata.taken_at,
            primary_venue: candidate.metadata.primary_venue.clone(),
            secondary_venue: candidate.metadata.secondary_venue.clone(),
            raw_orderbook: candidate.metadata.raw_orderbook.clone(),
        }
    }
}

/// Realized fills next to the book they were quoted from, one per venue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlippageReport {
    pub operator_id: String,
    pub market: String,
    pub coin: String,
    pub venue: String,
    pub trading_type: Direction,
    pub tradings: Option<SettlementRecord>,
    pub orderbook: BookDepth,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionEvent {
    Log { level: LogLevel, message: String },
    ExpectedProfit(ExpectedProfitReport),
    Slippage(SlippageReport),
    Halted(HaltReason),
}

/// Cheap cloneable sender; a closed or absent receiver is ignored.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl Telemetry {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Logs through `tracing` only.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.emit(SessionEvent::Log {
            level: LogLevel::Info,
            message,
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{message}");
        self.emit(SessionEvent::Log {
            level: LogLevel::Error,
            message,
        });
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
