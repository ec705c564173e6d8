//! Serve command - periodic refresh loop

use anyhow::Result;
use news_pulse_domain::usecases::NewsService;
use news_pulse_domain::{Market, SystemClock};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tokio::time::{MissedTickBehavior, interval};

use crate::args::ServeArgs;
use crate::commands::build_service;
use crate::config::AppConfig;

pub async fn execute(args: ServeArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    let service = build_service(&config).await?;

    let mut markets = config.default_markets()?;
    if markets.is_empty() {
        markets = service.markets();
    }

    tracing::info!(
        markets = ?markets,
        once = args.once,
        "Starting news-pulse serve"
    );

    if args.once {
        refresh(&service, &markets).await;
    } else {
        let refresh_interval = config.refresh_interval();
        let mut ticker = interval(refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            tracing::info!("Shutdown signal received");
        };

        tokio::pin!(shutdown);

        tracing::info!(interval_secs = refresh_interval.as_secs(), "Refresh loop running");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    refresh(&service, &markets).await;
                }
                _ = &mut shutdown => {
                    tracing::info!("Shutting down gracefully");
                    break;
                }
            }
        }
    }

    tracing::info!("news-pulse serve completed");
    Ok(())
}

async fn refresh(service: &NewsService<SystemClock>, markets: &BTreeSet<Market>) {
    match service.refresh(markets).await {
        Ok(report) => {
            tracing::info!(
                run_id = %report.run_id,
                partial = report.partial,
                failed = ?report.failed_adapters,
                refreshed = ?report.refreshed_markets,
                raw_items = report.raw_items,
                canonical_items = report.canonical_items,
                "Refresh complete"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Refresh failed");
        }
    }
}
