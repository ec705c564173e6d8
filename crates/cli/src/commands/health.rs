//! Health command - print the health snapshot

use anyhow::Result;
use news_pulse_domain::{HealthSnapshot, HealthStatus};
use std::path::PathBuf;

use crate::args::HealthArgs;
use crate::commands::build_service;
use crate::config::AppConfig;

pub async fn execute(args: HealthArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    let service = build_service(&config).await?;
    let snapshot = service.health_snapshot();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }

    if snapshot.status == HealthStatus::Unhealthy {
        std::process::exit(1);
    }

    Ok(())
}

fn symbol(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "✓",
        HealthStatus::Degraded => "⚠",
        HealthStatus::Unhealthy => "✗",
    }
}

fn print_snapshot(snapshot: &HealthSnapshot) {
    println!("news-pulse Health");
    println!("=================");
    println!();

    println!("Markets:");
    for market in &snapshot.markets {
        let refreshed = market
            .last_refreshed_at
            .map(|t| t.to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{} {}: {:?}, {} items, last refresh {}",
            symbol(market.status),
            market.market,
            market.freshness,
            market.item_count,
            refreshed
        );
    }

    println!();
    println!("Sources:");
    for adapter in &snapshot.adapters {
        let error = adapter
            .last_error
            .as_ref()
            .map(|e| format!(", last error: {}", e.message))
            .unwrap_or_default();
        println!(
            "  {} ({}): circuit {:?}, {} failures{}",
            adapter.adapter,
            adapter.kind,
            adapter.circuit.status,
            adapter.circuit.consecutive_failures,
            error
        );
    }

    println!();
    println!("{} Overall: {}", symbol(snapshot.status), snapshot.status.to_string().to_uppercase());
}
