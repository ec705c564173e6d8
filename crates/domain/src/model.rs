//! Domain models and value objects

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::text;

/// Identifier of a configured adapter (the registry key, e.g. `reuters_markets`)
pub type AdapterId = String;

/// Maximum snippet length kept on a raw item, in characters
pub const MAX_SNIPPET_CHARS: usize = 800;

/// Market tag attached to items, adapters and queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    Global,
    Us,
    Japan,
    Korea,
    AShare,
    Europe,
    India,
    Australia,
    Crypto,
}

impl Market {
    pub const ALL: [Market; 9] = [
        Market::Global,
        Market::Us,
        Market::Japan,
        Market::Korea,
        Market::AShare,
        Market::Europe,
        Market::India,
        Market::Australia,
        Market::Crypto,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Global => "global",
            Market::Us => "us",
            Market::Japan => "japan",
            Market::Korea => "korea",
            Market::AShare => "a_share",
            Market::Europe => "europe",
            Market::India => "india",
            Market::Australia => "australia",
            Market::Crypto => "crypto",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a market tag cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown market '{0}'")]
pub struct UnknownMarket(pub String);

impl FromStr for Market {
    type Err = UnknownMarket;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "global" | "world" => Ok(Market::Global),
            "us" | "usa" => Ok(Market::Us),
            "japan" | "jp" => Ok(Market::Japan),
            "korea" | "kr" => Ok(Market::Korea),
            "a_share" | "ashare" | "cn" | "china" => Ok(Market::AShare),
            "europe" | "eu" => Ok(Market::Europe),
            "india" | "in" => Ok(Market::India),
            "australia" | "au" => Ok(Market::Australia),
            "crypto" => Ok(Market::Crypto),
            _ => Err(UnknownMarket(s.to_string())),
        }
    }
}

/// Adapter family; drives the static source trust weight in scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Rss,
    NewsService,
    Social,
    Stub,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Rss => "rss",
            AdapterKind::NewsService => "news_service",
            AdapterKind::Social => "social",
            AdapterKind::Stub => "stub",
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An item as produced by an adapter. Never mutated after the adapter returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    /// Adapter that produced the item
    pub source: AdapterId,
    pub source_kind: AdapterKind,
    pub title: String,
    pub url: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    pub author: Option<String>,
    /// Summary text, at most [`MAX_SNIPPET_CHARS`] characters
    pub snippet: String,
    pub markets: BTreeSet<Market>,
}

impl RawItem {
    pub fn new(
        source: impl Into<AdapterId>,
        source_kind: AdapterKind,
        title: impl AsRef<str>,
        url: impl Into<String>,
        markets: BTreeSet<Market>,
    ) -> Self {
        Self {
            source: source.into(),
            source_kind,
            title: text::clean_text(title.as_ref()),
            url: url.into().trim().to_string(),
            published_at: None,
            author: None,
            snippet: String::new(),
            markets,
        }
    }

    pub fn with_snippet(mut self, snippet: impl AsRef<str>) -> Self {
        self.snippet = text::truncate_chars(&text::clean_text(snippet.as_ref()), MAX_SNIPPET_CHARS);
        self
    }

    pub fn with_author(mut self, author: Option<String>) -> Self {
        self.author = author
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());
        self
    }

    pub fn with_published_at(mut self, published_at: Option<OffsetDateTime>) -> Self {
        self.published_at = published_at;
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.url, &self.title)
    }
}

/// Dedup key over the normalized URL and the normalized title
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Stable for a given (normalized URL, normalized title) pair
    pub fn compute(url: &str, title: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text::normalize_url_key(url).as_bytes());
        hasher.update(b"\n");
        hasher.update(text::normalize_title_key(title).as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Surviving representative of a fingerprint cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalItem {
    pub fingerprint: Fingerprint,
    /// Adapter whose fields are currently representative
    pub source: AdapterId,
    pub source_kind: AdapterKind,
    pub title: String,
    pub url: String,
    /// Earliest known timestamp across the cluster
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    pub author: Option<String>,
    pub snippet: String,
    pub markets: BTreeSet<Market>,
    /// Every adapter that contributed to the cluster; never empty
    pub sources: BTreeSet<AdapterId>,
    pub source_kinds: BTreeSet<AdapterKind>,
}

impl From<RawItem> for CanonicalItem {
    fn from(raw: RawItem) -> Self {
        let fingerprint = raw.fingerprint();
        Self {
            fingerprint,
            sources: BTreeSet::from([raw.source.clone()]),
            source_kinds: BTreeSet::from([raw.source_kind]),
            source: raw.source,
            source_kind: raw.source_kind,
            title: raw.title,
            url: raw.url,
            published_at: raw.published_at,
            author: raw.author,
            snippet: raw.snippet,
            markets: raw.markets,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    /// Compound polarity within 0.05 of zero is neutral
    pub fn from_compound(compound: f64) -> Self {
        if compound > 0.05 {
            SentimentLabel::Positive
        } else if compound < -0.05 {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }
}

/// Lexicon sentiment of an item's title and snippet
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub label: SentimentLabel,
    /// Compound polarity in `[-1, 1]`
    pub score: f64,
    pub positive: f64,
    pub negative: f64,
    pub neutral: f64,
}

/// Canonical item plus its market-aware relevance score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    #[serde(flatten)]
    pub item: CanonicalItem,
    /// In `[0, 1]`
    pub relevance_score: f64,
    /// Markets the item was scored for and qualified in
    pub qualified_markets: BTreeSet<Market>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
}

/// Circuit breaker position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

/// Per-adapter breaker state, owned by the circuit tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CircuitState {
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub opened_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub next_retry_at: Option<OffsetDateTime>,
    /// Current cooldown window length
    pub backoff_secs: u64,
}

/// Whether a cache entry came from a live run or from the warm-start snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOfTruth {
    Live,
    WarmStart,
}

/// Latest scored result set for one market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub market: Market,
    /// Ordered: score desc, published desc, fingerprint asc
    pub items: Vec<ScoredItem>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_refreshed_at: OffsetDateTime,
    pub source_of_truth: SourceOfTruth,
}

/// Persisted form of one market's entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub items: Vec<ScoredItem>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_refreshed_at: OffsetDateTime,
}

/// Warm-start snapshot written after every successful run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub version: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub taken_at: OffsetDateTime,
    pub markets: BTreeMap<Market, PersistedEntry>,
}

impl CacheSnapshot {
    pub const FORMAT_VERSION: u32 = 1;

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

/// Parsed source-registry entry handed to the adapter factory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Registry key; becomes the adapter id
    pub name: AdapterId,
    /// Adapter type key (`rss`, `news_service`, `social`, `stub`)
    pub adapter_type: String,
    pub markets: BTreeSet<Market>,
    /// Connection parameters, interpreted by the adapter builder
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Outcome of one orchestrator run, before dedup and scoring
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub items: Vec<RawItem>,
    /// True whenever at least one adapter failed or was skipped
    pub partial: bool,
    /// Failed, timed out, cancelled, or skipped on an open circuit
    pub failed_adapters: Vec<AdapterId>,
    /// Subset of `failed_adapters` that were never invoked
    pub skipped_adapters: Vec<AdapterId>,
    pub succeeded_adapters: Vec<AdapterId>,
    /// Subset of `succeeded_adapters` whose previous items were reused because
    /// their poll interval had not elapsed
    pub reused_adapters: Vec<AdapterId>,
    /// Requested markets served by at least one successful adapter
    pub refreshed_markets: BTreeSet<Market>,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
}

/// Where a `get_news` answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServedFrom {
    /// Every market had a fresh live entry
    Cache,
    /// A refresh ran for this request
    Live,
}

/// Answer to a news query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsResponse {
    pub items: Vec<ScoredItem>,
    pub partial: bool,
    pub failed_adapters: Vec<AdapterId>,
    pub served_from: ServedFrom,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
}

/// Last error seen for an adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterError {
    pub kind: crate::ports::FetchErrorKind,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

/// Per-adapter health record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub adapter: AdapterId,
    pub kind: AdapterKind,
    pub markets: BTreeSet<Market>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_success_at: Option<OffsetDateTime>,
    pub last_error: Option<AdapterError>,
    pub circuit: CircuitState,
    pub items_last_fetch: usize,
    pub latency_ms: Option<u64>,
}

/// Overall status; ordered so that the worst status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Freshness of a market's cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketFreshness {
    Fresh,
    Stale,
    WarmStart,
    Missing,
}

/// Per-market health line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketHealth {
    pub market: Market,
    pub freshness: MarketFreshness,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_refreshed_at: Option<OffsetDateTime>,
    pub item_count: usize,
    pub status: HealthStatus,
}

/// Health report exposed verbatim to probes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub status: HealthStatus,
    pub adapters: Vec<HealthRecord>,
    pub markets: Vec<MarketHealth>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_parses_aliases_case_insensitively() {
        assert_eq!("A-Share".parse::<Market>().unwrap(), Market::AShare);
        assert_eq!("a_share".parse::<Market>().unwrap(), Market::AShare);
        assert_eq!("US".parse::<Market>().unwrap(), Market::Us);
        assert!("mars".parse::<Market>().is_err());
    }

    #[test]
    fn market_serializes_snake_case() {
        let json = serde_json::to_string(&Market::AShare).unwrap();
        assert_eq!(json, "\"a_share\"");
    }

    #[test]
    fn fingerprint_ignores_case_punctuation_and_query() {
        let a = Fingerprint::compute("https://a.com/1", "Fed raises rates");
        let b = Fingerprint::compute("https://a.com/1?utm=x", "fed  raises rates!");
        assert_eq!(a, b);

        let c = Fingerprint::compute("https://a.com/2", "Fed raises rates");
        assert_ne!(a, c);
    }

    #[test]
    fn raw_item_snippet_is_bounded_and_cleaned() {
        let item = RawItem::new(
            "src",
            AdapterKind::Rss,
            "  Title  ",
            "https://a.com/x",
            BTreeSet::from([Market::Us]),
        )
        .with_snippet(format!("<p>{}</p>", "x".repeat(2000)));

        assert_eq!(item.title, "Title");
        assert_eq!(item.snippet.chars().count(), MAX_SNIPPET_CHARS);
        assert!(!item.snippet.contains('<'));
    }

    #[test]
    fn canonical_from_raw_has_one_source() {
        let raw = RawItem::new(
            "src",
            AdapterKind::Social,
            "Post",
            "https://x.com/a/status/1",
            BTreeSet::from([Market::Global]),
        );
        let canonical = CanonicalItem::from(raw.clone());
        assert_eq!(canonical.sources.len(), 1);
        assert_eq!(canonical.fingerprint, raw.fingerprint());
    }

    #[test]
    fn health_status_orders_worst_last() {
        assert!(HealthStatus::Unhealthy > HealthStatus::Degraded);
        assert!(HealthStatus::Degraded > HealthStatus::Healthy);
    }
}
