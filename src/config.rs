//! Session configuration loader and validation.

use crate::errors::{AppError, Result};
use bigdecimal::BigDecimal;
use num_traits::Zero;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_TAG_COINS: &[&str] = &["XRP", "XLM", "EOS", "BNB", "ATOM"];

/// Venue identity plus credentials passed through untouched to the exchange factory.
#[derive(Clone)]
pub struct VenueConfig {
    pub name: String,
    pub credentials: String,
}

impl std::fmt::Debug for VenueConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueConfig")
            .field("name", &self.name)
            .field("credentials", &"<redacted>")
            .finish()
    }
}

/// Consolidated configuration for one trading session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Identity attached to outbound profit and slippage reports.
    pub operator_id: String,
    /// Minimum fee-adjusted profit as a fraction (1% = 0.01).
    pub min_profit_fraction: f64,
    /// Minimum absolute profit in base-currency units.
    pub min_profit_base: BigDecimal,
    pub auto_withdrawal: bool,
    pub primary: VenueConfig,
    pub secondary: VenueConfig,
    /// Settlement currency, e.g. "BTC".
    pub base_currency: String,
    /// Coins whose deposits need a tag/memo alongside the address.
    pub tag_coins: Vec<String>,
    pub fee_refresh_interval: Duration,
    pub poll_interval: Duration,
    /// Orderbook averaging volume = max base balance × this multiplier.
    pub target_volume_multiplier: f64,
}

impl SessionConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| AppError::Config(format!("{key} must be set")))
        };

        let min_profit_fraction = parse_percent(&required("MIN_PROFIT_PERCENT")?)?;
        let min_profit_base = parse_min_base(&required("MIN_PROFIT_BASE")?)?;
        let auto_withdrawal = match lookup("AUTO_WITHDRAWAL") {
            Some(raw) => parse_bool(&raw)?,
            None => false,
        };
        let primary = VenueConfig {
            name: required("PRIMARY_VENUE")?,
            credentials: lookup("PRIMARY_CREDENTIALS").unwrap_or_default(),
        };
        let secondary = VenueConfig {
            name: required("SECONDARY_VENUE")?,
            credentials: lookup("SECONDARY_CREDENTIALS").unwrap_or_default(),
        };
        let tag_coins = match lookup("TAG_COINS") {
            Some(raw) => raw
                .split(',')
                .map(|c| c.trim().to_uppercase())
                .filter(|c| !c.is_empty())
                .collect(),
            None => DEFAULT_TAG_COINS.iter().map(|c| c.to_string()).collect(),
        };
        let fee_refresh_secs: u64 = parse_or(&lookup, "FEE_REFRESH_SECS", 600)?;
        let poll_interval_ms: u64 = parse_or(&lookup, "POLL_INTERVAL_MS", 1000)?;
        let target_volume_multiplier: f64 = parse_or(&lookup, "TARGET_VOLUME_MULTIPLIER", 1.5)?;

        let config = Self {
            operator_id: lookup("OPERATOR_ID").unwrap_or_else(|| "anonymous".into()),
            min_profit_fraction,
            min_profit_base,
            auto_withdrawal,
            primary,
            secondary,
            base_currency: lookup("BASE_CURRENCY")
                .map(|c| c.trim().to_uppercase())
                .unwrap_or_else(|| "BTC".into()),
            tag_coins,
            fee_refresh_interval: Duration::from_secs(fee_refresh_secs),
            poll_interval: Duration::from_millis(poll_interval_ms),
            target_volume_multiplier,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants a session relies on before any network call.
    pub fn validate(&self) -> Result<()> {
        if !(self.min_profit_fraction.is_finite() && self.min_profit_fraction > 0.0) {
            return Err(AppError::Config(format!(
                "minimum profit fraction must be positive, got {}",
                self.min_profit_fraction
            )));
        }
        if self.min_profit_base < BigDecimal::zero() {
            return Err(AppError::Config(format!(
                "minimum absolute profit must not be negative, got {}",
                self.min_profit_base
            )));
        }
        if self.primary.name.trim().is_empty() || self.secondary.name.trim().is_empty() {
            return Err(AppError::Config("venue names must not be empty".into()));
        }
        if self.primary.name == self.secondary.name {
            return Err(AppError::Config(format!(
                "primary and secondary venue are both {}",
                self.primary.name
            )));
        }
        if self.base_currency.is_empty() {
            return Err(AppError::Config("base currency must not be empty".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(AppError::Config("poll interval must be non-zero".into()));
        }
        if !(self.target_volume_multiplier.is_finite() && self.target_volume_multiplier > 0.0) {
            return Err(AppError::Config(
                "target volume multiplier must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Parses a percentage such as "1.5" or "1.5%" into a fraction.
pub fn parse_percent(raw: &str) -> Result<f64> {
    let trimmed = raw.trim().trim_end_matches('%').trim();
    let percent: f64 = trimmed
        .parse()
        .map_err(|_| AppError::Config(format!("minimum profit percent is not a number: {raw:?}")))?;
    if !(percent.is_finite() && percent > 0.0) {
        return Err(AppError::Config(format!(
            "minimum profit percent must be positive: {raw:?}"
        )));
    }
    Ok(percent / 100.0)
}

fn parse_min_base(raw: &str) -> Result<BigDecimal> {
    BigDecimal::from_str(raw.trim())
        .map_err(|_| AppError::Config(format!("minimum absolute profit is not a number: {raw:?}")))
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AppError::Config(format!(
            "AUTO_WITHDRAWAL must be a boolean, got {other:?}"
        ))),
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw:?}"))),
        None => Ok(default),
    }
}
