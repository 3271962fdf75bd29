//! Miscellaneous helper utilities.

use bigdecimal::BigDecimal;
use num_traits::{ToPrimitive, Zero};
use std::str::FromStr;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize `tracing` subscriber with env-based filter.
///
/// If `RUST_LOG` is not set, defaults to `info` level.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Truncates `amount` to a multiple of `10^exponent`, never rounding up.
///
/// Amounts at or below zero collapse to zero: there is nothing to trade or send.
pub fn quantize_down(amount: &BigDecimal, exponent: i64) -> BigDecimal {
    if *amount <= BigDecimal::zero() {
        return BigDecimal::zero().with_scale(-exponent);
    }
    // with_scale truncates toward zero, which is downward for positive values
    amount.with_scale(-exponent)
}

/// Converts a finite `f64` using its shortest round-trip representation.
pub fn decimal_from_f64(value: f64) -> Option<BigDecimal> {
    if !value.is_finite() {
        return None;
    }
    BigDecimal::from_str(&value.to_string()).ok()
}

/// `None` when the value has no finite `f64` form.
pub fn decimal_to_f64(value: &BigDecimal) -> Option<f64> {
    value.to_f64().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn quantize_truncates_instead_of_rounding() {
        assert_eq!(quantize_down(&dec("1.23456789"), -4), dec("1.2345"));
        assert_eq!(quantize_down(&dec("0.99999"), -2), dec("0.99"));
        assert_eq!(quantize_down(&dec("5"), -8), dec("5"));
        assert_eq!(quantize_down(&dec("123.9"), 1), dec("120"));
    }

    #[test]
    fn quantize_floors_negative_amounts_at_zero() {
        assert_eq!(quantize_down(&dec("-0.5"), -4), BigDecimal::zero());
    }

    #[test]
    fn f64_conversion_rejects_non_finite() {
        assert!(decimal_from_f64(f64::NAN).is_none());
        assert!(decimal_from_f64(f64::INFINITY).is_none());
        assert_eq!(decimal_from_f64(0.0159), Some(dec("0.0159")));
    }

    #[test]
    fn out_of_range_decimals_have_no_f64() {
        assert_eq!(decimal_to_f64(&dec("0.02")), Some(0.02));
        assert!(decimal_to_f64(&dec("1e400")).is_none());
    }
}
