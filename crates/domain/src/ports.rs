//! Port definitions (traits) for external dependencies
//!
//! These traits define the boundaries between the pipeline core and the
//! outside world. Adapters implement them to connect to real upstreams and
//! storage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

use crate::model::{AdapterKind, CacheSnapshot, Market, RawItem};

/// Category of an adapter fetch failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Timeout,
    RateLimited,
    UpstreamError,
    ParseError,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::RateLimited => "rate_limited",
            FetchErrorKind::UpstreamError => "upstream_error",
            FetchErrorKind::ParseError => "parse_error",
        };
        f.write_str(s)
    }
}

/// Error type for adapter fetches; isolated per adapter, never aborts a run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::RateLimited, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::UpstreamError, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::ParseError, message)
    }
}

/// Port for one upstream source of market items
///
/// Implementations skip malformed individual entries instead of failing the
/// whole call.
#[async_trait]
pub trait NewsAdapter: Send + Sync {
    /// Registry name of this adapter
    fn id(&self) -> &str;

    fn kind(&self) -> AdapterKind;

    /// Markets this adapter can serve
    fn markets(&self) -> &BTreeSet<Market>;

    /// Per-call timeout the adapter recommends; the orchestrator may cap it
    fn recommended_timeout(&self) -> Duration {
        Duration::from_secs(20)
    }

    /// Fetch up to `limit` items per market for the intersection of `markets`
    /// and [`Self::markets`]
    async fn fetch(
        &self,
        markets: &BTreeSet<Market>,
        limit: usize,
    ) -> Result<Vec<RawItem>, FetchError>;
}

/// Keep at most `limit` items per market of `markets`, preserving order
///
/// An item tagged with several markets stays while any of them has room and
/// then counts against all of them. Items tagged with none of `markets` are
/// dropped.
pub fn cap_per_market(items: Vec<RawItem>, markets: &BTreeSet<Market>, limit: usize) -> Vec<RawItem> {
    let mut counts: BTreeMap<Market, usize> = BTreeMap::new();
    items
        .into_iter()
        .filter(|item| {
            let tags: Vec<Market> = item.markets.intersection(markets).copied().collect();
            let room = tags
                .iter()
                .any(|m| counts.get(m).copied().unwrap_or(0) < limit);
            if room {
                for market in tags {
                    *counts.entry(market).or_insert(0) += 1;
                }
            }
            room
        })
        .collect()
}

/// Error type for the source registry; fatal at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown adapter type '{adapter_type}' for source '{source_name}'")]
    UnknownAdapterType {
        source_name: String,
        adapter_type: String,
    },
    #[error("Invalid parameters for source '{source_name}': {message}")]
    InvalidParams {
        source_name: String,
        message: String,
    },
    #[error("Source '{0}' declares no markets")]
    NoMarkets(String),
    #[error("Duplicate source '{0}'")]
    DuplicateSource(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Error type for warm-start snapshot persistence
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Database(String),
    /// Persisted data exists but cannot be decoded; startup falls back to an empty cache
    #[error("Snapshot corrupted: {0}")]
    Corrupt(String),
}

/// Port for persisting the warm-start snapshot
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the last persisted snapshot, `None` if nothing was ever written
    async fn load(&self) -> Result<Option<CacheSnapshot>, SnapshotError>;

    /// Replace the persisted snapshot
    async fn save(&self, snapshot: &CacheSnapshot) -> Result<(), SnapshotError>;

    /// Human-readable location, for logs and doctor output
    fn describe(&self) -> String;
}

/// Port for time/clock operations (enables deterministic testing)
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> OffsetDateTime;
}

/// Real clock implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}
