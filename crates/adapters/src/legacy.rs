//! Compatibility shim for call sites written against the older feed interface
//!
//! Older consumers asked for "enhanced news" as a flat list of JSON objects
//! and read adapter health from a map keyed by adapter name. Both calls are
//! translated onto [`NewsService`] here; nothing in the pipeline depends on
//! this module.

use news_pulse_domain::usecases::NewsService;
use news_pulse_domain::{CircuitStatus, Clock, Market, ScoredItem, SentimentLabel};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use time::OffsetDateTime;

/// Markets older callers implicitly asked for
pub const LEGACY_MARKETS: [Market; 3] = [Market::Global, Market::Us, Market::AShare];

/// One article in the shape older consumers expect
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacyArticle {
    pub title: String,
    pub description: String,
    pub url: String,
    pub source: String,
    pub author: Option<String>,
    /// First market the item qualified in
    pub market: Option<Market>,
    pub markets: BTreeSet<Market>,
    #[serde(rename = "publishedAt", with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    pub relevance_score: f64,
    pub sentiment_score: Option<f64>,
    pub sentiment_label: Option<SentimentLabel>,
    #[serde(rename = "fetchedAt", with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
}

impl LegacyArticle {
    fn from_scored(scored: ScoredItem, fetched_at: OffsetDateTime) -> Self {
        let item = scored.item;
        Self {
            title: item.title,
            description: item.snippet,
            url: item.url,
            source: item.source,
            author: item.author,
            market: scored.qualified_markets.iter().next().copied(),
            markets: scored.qualified_markets,
            published_at: item.published_at,
            relevance_score: scored.relevance_score,
            sentiment_score: scored.sentiment.map(|s| s.score),
            sentiment_label: scored.sentiment.map(|s| s.label),
            fetched_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct LegacyAdapterHealth {
    healthy: bool,
    last_error: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    last_success: Option<OffsetDateTime>,
    items_last_fetch: usize,
    latency_ms: Option<u64>,
}

pub struct LegacyNewsFeed<Cl>
where
    Cl: Clock + ?Sized,
{
    service: Arc<NewsService<Cl>>,
    markets: BTreeSet<Market>,
}

impl<Cl> LegacyNewsFeed<Cl>
where
    Cl: Clock + ?Sized,
{
    pub fn new(service: Arc<NewsService<Cl>>) -> Self {
        Self::with_markets(service, LEGACY_MARKETS.into_iter().collect())
    }

    pub fn with_markets(service: Arc<NewsService<Cl>>, markets: BTreeSet<Market>) -> Self {
        Self { service, markets }
    }

    /// Up to `target_count` articles; errors are logged and yield an empty list
    pub async fn enhanced_news(&self, target_count: usize) -> Vec<LegacyArticle> {
        match self.service.get_news(&self.markets, target_count).await {
            Ok(response) => {
                if !response.failed_adapters.is_empty() {
                    tracing::warn!(
                        failed = ?response.failed_adapters,
                        "Serving partial news to legacy caller"
                    );
                }
                let fetched_at = response.generated_at;
                response
                    .items
                    .into_iter()
                    .map(|item| LegacyArticle::from_scored(item, fetched_at))
                    .collect()
            }
            Err(error) => {
                tracing::error!(error = %error, "Legacy news request failed");
                Vec::new()
            }
        }
    }

    /// Adapter health keyed by adapter name, plus a `last_fetch` timestamp
    pub fn health_map(&self) -> Map<String, Value> {
        let snapshot = self.service.health_snapshot();
        let mut map = Map::new();

        for record in snapshot.adapters {
            let health = LegacyAdapterHealth {
                healthy: record.circuit.status == CircuitStatus::Closed
                    && record.circuit.consecutive_failures == 0,
                last_error: record.last_error.map(|e| e.message),
                last_success: record.last_success_at,
                items_last_fetch: record.items_last_fetch,
                latency_ms: record.latency_ms,
            };
            let value = serde_json::to_value(health).unwrap_or(Value::Null);
            map.insert(record.adapter, value);
        }

        let last_fetch = snapshot
            .markets
            .iter()
            .filter_map(|m| m.last_refreshed_at)
            .max()
            .and_then(|at| at.format(&time::format_description::well_known::Rfc3339).ok());
        map.insert("last_fetch".to_string(), json!(last_fetch));
        map
    }
}
