//! Cross-venue arbitrage engine.
//!
//! Watches the same market/coin pairs on two venues, picks the most
//! profitable round trip after fees and transfer costs, and executes it:
//! buy on one venue, move the coin, sell on the other, move the base back.

pub mod account;
pub mod arbitrage;
pub mod config;
pub mod errors;
pub mod exchange;
pub mod fees;
pub mod models;
pub mod orderbook;
pub mod session;
pub mod telemetry;
pub mod utils;
pub mod withdrawal;
