use anyhow::{Context, Result};
use diff_trader::{
    config::SessionConfig,
    exchange::PaperFactory,
    session::{HaltReason, Session},
    telemetry::SessionEvent,
    utils,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    utils::init_logging();

    let config = SessionConfig::from_env().context("loading session configuration")?;
    tracing::info!(
        primary = %config.primary.name,
        secondary = %config.secondary.name,
        base = %config.base_currency,
        "[INIT] diff-trader starting"
    );

    // Venue credentials name the paper snapshot each venue trades against
    let factory = Arc::new(PaperFactory::new());
    let mut handle = Session::start(config, factory)?;

    // Report consumer --------------------------------------------------------
    let reports = handle.take_events().map(|mut events| {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match &event {
                    SessionEvent::ExpectedProfit(report) => match serde_json::to_string(report) {
                        Ok(json) => tracing::info!(report = %json, "[REPORT] expected profit"),
                        Err(e) => tracing::warn!(error = %e, "[REPORT] unserializable report"),
                    },
                    SessionEvent::Slippage(report) => match serde_json::to_string(report) {
                        Ok(json) => tracing::info!(report = %json, "[REPORT] slippage"),
                        Err(e) => tracing::warn!(error = %e, "[REPORT] unserializable report"),
                    },
                    SessionEvent::Log { .. } | SessionEvent::Halted(_) => {}
                }
            }
        })
    });

    // Ctrl-C stops the session after the current round
    let stop = handle.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("[SHUTDOWN] stop requested");
            stop.stop();
        }
    });

    let reason = handle.halted().await;
    if let Some(task) = reports {
        let _ = task.await;
    }
    match reason {
        HaltReason::Stopped => Ok(()),
        HaltReason::ManualFallback(transfers) => {
            for transfer in &transfers {
                tracing::warn!("[SHUTDOWN] pending manual transfer: {transfer}");
            }
            Ok(())
        }
        HaltReason::Fatal(message) => anyhow::bail!("session halted: {message}"),
        HaltReason::StartupFailed(message) => anyhow::bail!("session failed to start: {message}"),
    }
}
