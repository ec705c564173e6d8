//! Fetch command - one-shot news query

use anyhow::{Context, Result};
use news_pulse_domain::{Market, NewsResponse};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::args::FetchArgs;
use crate::commands::build_service;
use crate::config::AppConfig;

pub async fn execute(args: FetchArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    let service = build_service(&config).await?;

    let markets: BTreeSet<Market> = if args.markets.is_empty() {
        config.default_markets()?
    } else {
        args.markets.into_iter().collect()
    };
    let limit = args.limit.unwrap_or(config.general.default_limit);

    let response = service
        .get_news(&markets, limit)
        .await
        .context("News query failed")?;

    tracing::info!(
        items = response.items.len(),
        partial = response.partial,
        served_from = ?response.served_from,
        "Query complete"
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }

    Ok(())
}

fn print_response(response: &NewsResponse) {
    if response.items.is_empty() {
        println!("No items.");
    }

    for item in &response.items {
        let markets = item
            .qualified_markets
            .iter()
            .map(Market::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let mood = item
            .sentiment
            .map(|s| format!(" {:?}", s.label).to_lowercase())
            .unwrap_or_default();
        println!(
            "{:.2}  [{}] {} ({}){}",
            item.relevance_score, markets, item.item.title, item.item.source, mood
        );
        println!("      {}", item.item.url);
    }

    if response.partial {
        println!();
        if response.failed_adapters.is_empty() {
            println!("Partial result: some markets are stale or have no source");
        } else {
            println!(
                "Partial result, failed sources: {}",
                response.failed_adapters.join(", ")
            );
        }
    }
}
