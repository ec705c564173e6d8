//! Cache store - latest scored result set per market
//!
//! One slot per market, each behind its own lock. Entries are immutable and
//! swapped as a whole, so readers see either the previous or the new entry.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use time::OffsetDateTime;

use crate::model::{
    CacheEntry, CacheSnapshot, Market, MarketFreshness, PersistedEntry, ScoredItem, SourceOfTruth,
};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Items kept per market; lowest scores are trimmed first
    pub max_items: usize,
    /// Live entries older than this are stale
    pub staleness: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_items: 200,
            staleness: Duration::from_secs(15 * 60),
        }
    }
}

/// Result of a cache read
#[derive(Debug, Clone)]
pub enum CacheRead {
    /// Live entry within the staleness window
    Fresh(Arc<CacheEntry>),
    /// Warm-start entry, or a live one past the staleness window
    Stale(Arc<CacheEntry>),
    Miss,
}

impl CacheRead {
    pub fn entry(&self) -> Option<&Arc<CacheEntry>> {
        match self {
            CacheRead::Fresh(entry) | CacheRead::Stale(entry) => Some(entry),
            CacheRead::Miss => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, CacheRead::Fresh(_))
    }
}

type Slot = RwLock<Option<Arc<CacheEntry>>>;

#[derive(Debug)]
pub struct CacheStore {
    config: CacheConfig,
    slots: HashMap<Market, Slot>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        let slots = Market::ALL
            .iter()
            .map(|market| (*market, RwLock::new(None)))
            .collect();
        Self { config, slots }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn slot(&self, market: Market) -> &Slot {
        // Every market gets a slot in `new`
        &self.slots[&market]
    }

    /// Replace a market's entry with a live result set
    pub fn put(&self, market: Market, mut items: Vec<ScoredItem>, now: OffsetDateTime) -> Arc<CacheEntry> {
        sort_items(&mut items);
        if items.len() > self.config.max_items {
            tracing::debug!(
                market = %market,
                dropped = items.len() - self.config.max_items,
                "Trimming cache entry"
            );
            items.truncate(self.config.max_items);
        }

        let entry = Arc::new(CacheEntry {
            market,
            items,
            last_refreshed_at: now,
            source_of_truth: SourceOfTruth::Live,
        });

        let mut slot = self
            .slot(market)
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::clone(&entry));
        entry
    }

    pub fn entry(&self, market: Market) -> Option<Arc<CacheEntry>> {
        self.slot(market)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, market: Market, now: OffsetDateTime) -> CacheRead {
        match self.entry(market) {
            None => CacheRead::Miss,
            Some(entry) => {
                if self.freshness_of(&entry, now) == MarketFreshness::Fresh {
                    CacheRead::Fresh(entry)
                } else {
                    CacheRead::Stale(entry)
                }
            }
        }
    }

    pub fn freshness(&self, market: Market, now: OffsetDateTime) -> MarketFreshness {
        match self.entry(market) {
            None => MarketFreshness::Missing,
            Some(entry) => self.freshness_of(&entry, now),
        }
    }

    fn freshness_of(&self, entry: &CacheEntry, now: OffsetDateTime) -> MarketFreshness {
        match entry.source_of_truth {
            SourceOfTruth::WarmStart => MarketFreshness::WarmStart,
            SourceOfTruth::Live => {
                let age = now - entry.last_refreshed_at;
                if age <= self.config.staleness {
                    MarketFreshness::Fresh
                } else {
                    MarketFreshness::Stale
                }
            }
        }
    }

    /// Persistable form of every populated market
    pub fn snapshot(&self, now: OffsetDateTime) -> CacheSnapshot {
        let markets: BTreeMap<Market, PersistedEntry> = Market::ALL
            .iter()
            .filter_map(|market| {
                self.entry(*market).map(|entry| {
                    (
                        *market,
                        PersistedEntry {
                            items: entry.items.clone(),
                            last_refreshed_at: entry.last_refreshed_at,
                        },
                    )
                })
            })
            .collect();

        CacheSnapshot {
            version: CacheSnapshot::FORMAT_VERSION,
            taken_at: now,
            markets,
        }
    }

    /// Load a snapshot as warm-start entries; live entries already present win
    pub fn restore(&self, snapshot: CacheSnapshot) -> usize {
        let mut restored = 0;
        for (market, persisted) in snapshot.markets {
            let mut slot = self
                .slot(market)
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let has_live = slot
                .as_ref()
                .is_some_and(|e| e.source_of_truth == SourceOfTruth::Live);
            if has_live {
                continue;
            }

            let mut items = persisted.items;
            sort_items(&mut items);
            items.truncate(self.config.max_items);
            *slot = Some(Arc::new(CacheEntry {
                market,
                items,
                last_refreshed_at: persisted.last_refreshed_at,
                source_of_truth: SourceOfTruth::WarmStart,
            }));
            restored += 1;
        }
        restored
    }
}

/// Score desc, then published desc (unknown last), then fingerprint asc
pub fn sort_items(items: &mut [ScoredItem]) {
    items.sort_by(compare_items);
}

pub fn compare_items(a: &ScoredItem, b: &ScoredItem) -> Ordering {
    b.relevance_score
        .total_cmp(&a.relevance_score)
        .then_with(|| match (a.item.published_at, b.item.published_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.item.fingerprint.cmp(&b.item.fingerprint))
}
