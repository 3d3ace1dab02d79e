//! Run Command
//!
//! Start the worker pool and the zone ticker, serve until Ctrl-C, then shut
//! down within the configured grace period.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::ui::Output;
use crate::config::Config;
use crate::context::AppContext;
use crate::types::Result;

pub async fn run(config: Config) -> Result<()> {
    let output = Output::new();
    let ctx = AppContext::from_config(config)?;

    if ctx.config.zones.is_empty() {
        output.warning("No zones configured; add [[zones]] entries to the config file");
    }
    output.success(&format!(
        "Watching {} zone(s) with {} worker(s). Press Ctrl-C to stop.",
        ctx.config.zones.len(),
        ctx.scheduler.stats().workers
    ));

    let stop = CancellationToken::new();
    let ticker = tokio::spawn(ctx.ticker().run(stop.child_token()));

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");

    stop.cancel();
    let report = ctx.shutdown().await;
    join_ticker(ticker).await;

    let metrics = ctx.metrics.snapshot();
    output.section("Session");
    output.field("completed", metrics.requests_completed);
    output.field("failed", metrics.requests_failed);
    output.field("cancelled", metrics.requests_cancelled);
    output.field("fallbacks", metrics.fallback_results);
    output.field("provider calls", metrics.provider_calls);
    let cache = ctx.cache.stats();
    output.field(
        "cache hits",
        format!("{} ({:.0}%)", cache.hits, cache.hit_rate() * 100.0),
    );
    for key in ctx.ledger.statuses() {
        output.field(&key.key_id, format!("{} left today", key.daily_remaining));
    }
    if report.interrupted > 0 {
        output.warning(&format!(
            "{} analysis(es) interrupted by the shutdown deadline",
            report.interrupted
        ));
    }
    Ok(())
}

/// A ticker that panicked or was aborted is reported, not propagated
async fn join_ticker(ticker: JoinHandle<()>) -> bool {
    match ticker.await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Ticker task failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_ticker_reports_failure() {
        assert!(join_ticker(tokio::spawn(async {})).await);

        let crashed = tokio::spawn(async { panic!("tick failed") });
        assert!(!join_ticker(crashed).await);
    }
}
