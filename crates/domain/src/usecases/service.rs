//! News service - the query surface over orchestrator, dedup, scoring, cache and health

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    model::{
        AdapterId, CacheSnapshot, Fingerprint, HealthSnapshot, Market, NewsResponse, ScoredItem,
        Sentiment, ServedFrom,
    },
    ports::{Clock, NewsAdapter, SnapshotError, SnapshotStore},
    usecases::{
        cache::{CacheConfig, CacheStore, sort_items},
        circuit::{CircuitConfig, CircuitTracker},
        dedup::{DedupConfig, Deduplicator},
        health::HealthMonitor,
        orchestrator::{Orchestrator, OrchestratorConfig, PipelineError},
        scoring::{Scorer, ScoringConfig},
        sentiment::SentimentAnalyzer,
    },
};

/// Everything tunable in the pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub orchestrator: OrchestratorConfig,
    pub circuit: CircuitConfig,
    pub cache: CacheConfig,
    pub dedup: DedupConfig,
    pub scoring: ScoringConfig,
    /// Items requested from each adapter per run
    pub fetch_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            circuit: CircuitConfig::default(),
            cache: CacheConfig::default(),
            dedup: DedupConfig::default(),
            scoring: ScoringConfig::default(),
            fetch_limit: 50,
        }
    }
}

/// Summary of one refresh
#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub run_id: Uuid,
    pub partial: bool,
    pub failed_adapters: Vec<AdapterId>,
    pub refreshed_markets: BTreeSet<Market>,
    pub raw_items: usize,
    pub canonical_items: usize,
}

pub struct NewsService<Cl>
where
    Cl: Clock + ?Sized,
{
    orchestrator: Orchestrator<Cl>,
    dedup: Deduplicator,
    scorer: Scorer,
    sentiment: SentimentAnalyzer,
    cache: Arc<CacheStore>,
    monitor: HealthMonitor,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    clock: Arc<Cl>,
    fetch_limit: usize,
}

impl<Cl> NewsService<Cl>
where
    Cl: Clock + ?Sized,
{
    pub fn new(
        adapters: Vec<Arc<dyn NewsAdapter>>,
        snapshots: Option<Arc<dyn SnapshotStore>>,
        clock: Arc<Cl>,
        config: PipelineConfig,
    ) -> Self {
        let circuits = Arc::new(CircuitTracker::new(config.circuit));
        let cache = Arc::new(CacheStore::new(config.cache));
        let orchestrator = Orchestrator::new(
            adapters,
            Arc::clone(&circuits),
            Arc::clone(&clock),
            config.orchestrator,
        );
        let monitor = HealthMonitor::new(
            circuits,
            Arc::clone(&cache),
            orchestrator.served_markets(),
        );

        Self {
            orchestrator,
            dedup: Deduplicator::new(config.dedup),
            scorer: Scorer::new(config.scoring),
            sentiment: SentimentAnalyzer::new(),
            cache,
            monitor,
            snapshots,
            clock,
            fetch_limit: config.fetch_limit.max(1),
        }
    }

    /// Markets served by at least one configured adapter
    pub fn markets(&self) -> BTreeSet<Market> {
        self.orchestrator.served_markets()
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Restore the last persisted snapshot; never fails, returns markets restored
    pub async fn warm_start(&self) -> usize {
        let Some(store) = &self.snapshots else {
            return 0;
        };

        match store.load().await {
            Ok(Some(snapshot)) if snapshot.version != CacheSnapshot::FORMAT_VERSION => {
                tracing::warn!(
                    store = %store.describe(),
                    version = snapshot.version,
                    "Ignoring snapshot with unsupported version"
                );
                0
            }
            Ok(Some(snapshot)) => {
                let restored = self.cache.restore(snapshot);
                tracing::info!(store = %store.describe(), markets = restored, "Warm start restored");
                restored
            }
            Ok(None) => {
                tracing::info!(store = %store.describe(), "No snapshot to restore");
                0
            }
            Err(SnapshotError::Corrupt(reason)) => {
                tracing::warn!(
                    store = %store.describe(),
                    reason = %reason,
                    "Snapshot corrupted, starting with empty cache"
                );
                0
            }
            Err(error) => {
                tracing::warn!(
                    store = %store.describe(),
                    error = %error,
                    "Failed to load snapshot, starting with empty cache"
                );
                0
            }
        }
    }

    /// One orchestrator, dedup, scoring, sentiment and cache pass for `markets`
    pub async fn refresh(&self, markets: &BTreeSet<Market>) -> Result<RefreshReport, PipelineError> {
        let result = self.orchestrator.run(markets, self.fetch_limit).await?;
        let raw_items = result.items.len();
        let canonical = self.dedup.dedup(result.items);
        let now = self.clock.now();

        let sentiments: HashMap<&Fingerprint, Sentiment> = canonical
            .iter()
            .map(|item| (&item.fingerprint, self.sentiment.analyze(item)))
            .collect();

        for market in &result.refreshed_markets {
            let mut scored = self.scorer.score_market(&canonical, *market, now);
            for item in &mut scored {
                item.sentiment = sentiments.get(&item.item.fingerprint).copied();
            }
            tracing::debug!(market = %market, items = scored.len(), "Caching scored items");
            self.cache.put(*market, scored, now);
        }

        if !result.succeeded_adapters.is_empty() {
            self.persist().await;
        }

        Ok(RefreshReport {
            run_id: result.run_id,
            partial: result.partial,
            failed_adapters: result.failed_adapters,
            refreshed_markets: result.refreshed_markets,
            raw_items,
            canonical_items: canonical.len(),
        })
    }

    async fn persist(&self) {
        let Some(store) = &self.snapshots else {
            return;
        };
        let snapshot = self.cache.snapshot(self.clock.now());
        if let Err(error) = store.save(&snapshot).await {
            tracing::warn!(store = %store.describe(), error = %error, "Failed to persist snapshot");
        }
    }

    /// Best-effort news for `markets`; only fails when no adapter serves them
    ///
    /// An empty market set means every served market. Requested markets no
    /// adapter serves are ignored and flag the answer as partial.
    pub async fn get_news(
        &self,
        markets: &BTreeSet<Market>,
        limit: usize,
    ) -> Result<NewsResponse, PipelineError> {
        let served_markets = self.markets();
        let requested = if markets.is_empty() {
            served_markets.clone()
        } else {
            markets.clone()
        };
        let served: BTreeSet<Market> = requested.intersection(&served_markets).copied().collect();
        if served.is_empty() {
            return Err(PipelineError::NoAdapters(requested));
        }
        let unserved = served.len() < requested.len();
        if unserved {
            tracing::debug!(
                requested = ?requested,
                served = ?served,
                "Some requested markets have no adapter"
            );
        }

        let now = self.clock.now();
        let all_fresh = served.iter().all(|m| self.cache.get(*m, now).is_fresh());
        if all_fresh {
            return Ok(NewsResponse {
                items: self.collect(&served, limit),
                partial: unserved,
                failed_adapters: Vec::new(),
                served_from: ServedFrom::Cache,
                generated_at: now,
            });
        }

        let report = self.refresh(&served).await?;
        let now = self.clock.now();
        let degraded_market = served
            .iter()
            .any(|m| !self.cache.get(*m, now).is_fresh());

        Ok(NewsResponse {
            items: self.collect(&served, limit),
            partial: report.partial || degraded_market || unserved,
            failed_adapters: report.failed_adapters,
            served_from: ServedFrom::Live,
            generated_at: now,
        })
    }

    /// Merge cached entries across markets by fingerprint
    fn collect(&self, markets: &BTreeSet<Market>, limit: usize) -> Vec<ScoredItem> {
        let now = self.clock.now();
        let mut merged: HashMap<Fingerprint, ScoredItem> = HashMap::new();

        for market in markets {
            let read = self.cache.get(*market, now);
            let Some(entry) = read.entry() else {
                continue;
            };
            for item in &entry.items {
                match merged.get_mut(&item.item.fingerprint) {
                    Some(existing) => {
                        existing.relevance_score = existing.relevance_score.max(item.relevance_score);
                        existing
                            .qualified_markets
                            .extend(item.qualified_markets.iter().copied());
                    }
                    None => {
                        merged.insert(item.item.fingerprint.clone(), item.clone());
                    }
                }
            }
        }

        let mut items: Vec<ScoredItem> = merged.into_values().collect();
        sort_items(&mut items);
        items.truncate(limit);
        items
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        self.monitor.snapshot(self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AdapterKind, HealthStatus, RawItem, SourceOfTruth};
    use crate::ports::FetchError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use time::OffsetDateTime;
    use time::macros::datetime;

    struct FakeClock {
        time: Mutex<OffsetDateTime>,
    }

    impl FakeClock {
        fn new() -> Self {
            Self {
                time: Mutex::new(datetime!(2026-06-01 14:00 UTC)),
            }
        }

        fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> OffsetDateTime {
            *self.time.lock().unwrap()
        }
    }

    struct FakeAdapter {
        id: String,
        kind: AdapterKind,
        markets: BTreeSet<Market>,
        titles: Vec<&'static str>,
        failing: AtomicBool,
        hang: bool,
        calls: AtomicUsize,
    }

    impl FakeAdapter {
        fn new(id: &str, kind: AdapterKind, titles: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                kind,
                markets: BTreeSet::from([Market::Us]),
                titles,
                failing: AtomicBool::new(false),
                hang: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn hanging(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                kind: AdapterKind::Rss,
                markets: BTreeSet::from([Market::Us]),
                titles: vec![],
                failing: AtomicBool::new(false),
                hang: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl NewsAdapter for FakeAdapter {
        fn id(&self) -> &str {
            &self.id
        }

        fn kind(&self) -> AdapterKind {
            self.kind
        }

        fn markets(&self) -> &BTreeSet<Market> {
            &self.markets
        }

        async fn fetch(
            &self,
            markets: &BTreeSet<Market>,
            limit: usize,
        ) -> Result<Vec<RawItem>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(FetchError::upstream("HTTP 503"));
            }
            Ok(self
                .titles
                .iter()
                .take(limit)
                .map(|title| {
                    RawItem::new(
                        self.id.clone(),
                        self.kind,
                        *title,
                        format!("https://news.example/{}", title.replace(' ', "-")),
                        markets.clone(),
                    )
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeSnapshotStore {
        stored: Mutex<Option<CacheSnapshot>>,
        corrupt: bool,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl SnapshotStore for FakeSnapshotStore {
        async fn load(&self) -> Result<Option<CacheSnapshot>, SnapshotError> {
            if self.corrupt {
                return Err(SnapshotError::Corrupt("bad json".to_string()));
            }
            Ok(self.stored.lock().unwrap().clone())
        }

        async fn save(&self, snapshot: &CacheSnapshot) -> Result<(), SnapshotError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.stored.lock().unwrap() = Some(snapshot.clone());
            Ok(())
        }

        fn describe(&self) -> String {
            "fake".to_string()
        }
    }

    fn dynamic(adapter: &Arc<FakeAdapter>) -> Arc<dyn NewsAdapter> {
        adapter.clone()
    }

    fn us() -> BTreeSet<Market> {
        BTreeSet::from([Market::Us])
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            orchestrator: OrchestratorConfig {
                call_timeout: Duration::from_secs(2),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_with_one_timed_out_adapter() {
        let wire = FakeAdapter::new(
            "wire",
            AdapterKind::NewsService,
            vec!["Fed raises rates", "Dow slips on tariff fears", "Treasury yields climb"],
        );
        let feed = FakeAdapter::new(
            "feed",
            AdapterKind::Rss,
            vec!["Fed raises rates", "S&P 500 hits record", "Local weather update"],
        );
        let slow = FakeAdapter::hanging("slow");
        let service = NewsService::new(
            vec![dynamic(&wire), dynamic(&feed), dynamic(&slow)],
            None,
            Arc::new(FakeClock::new()),
            config(),
        );

        let response = service.get_news(&us(), 10).await.unwrap();
        assert!(response.partial);
        assert_eq!(response.failed_adapters, vec!["slow".to_string()]);
        assert_eq!(response.served_from, ServedFrom::Live);
        assert!(response.items.len() <= 10);
        // Weather item has no market term and is gated out
        assert_eq!(response.items.len(), 4);
        assert!(response.items.iter().all(|i| i.item.title != "Local weather update"));
        assert!(response.items.iter().all(|i| i.sentiment.is_some()));
        assert!(response.items.iter().all(|i| !i.item.sources.contains("slow")));
        assert!(
            response
                .items
                .windows(2)
                .all(|w| w[0].relevance_score >= w[1].relevance_score)
        );

        let fed = response
            .items
            .iter()
            .find(|i| i.item.title == "Fed raises rates")
            .unwrap();
        assert_eq!(fed.item.sources.len(), 2);
    }

    #[tokio::test]
    async fn limit_truncates_response() {
        let wire = FakeAdapter::new("wire", AdapterKind::Rss, vec!["a stock", "b market", "c fed"]);
        let service = NewsService::new(vec![dynamic(&wire)], None, Arc::new(FakeClock::new()), config());
        let response = service.get_news(&us(), 2).await.unwrap();
        assert_eq!(response.items.len(), 2);
        assert!(!response.partial);
    }

    #[tokio::test]
    async fn fresh_cache_is_served_without_refetch() {
        let wire = FakeAdapter::new("wire", AdapterKind::Rss, vec!["Fed holds"]);
        let clock = Arc::new(FakeClock::new());
        let service = NewsService::new(vec![dynamic(&wire)], None, Arc::clone(&clock), config());

        service.get_news(&us(), 10).await.unwrap();
        clock.advance(Duration::from_secs(60));
        let second = service.get_news(&us(), 10).await.unwrap();

        assert_eq!(second.served_from, ServedFrom::Cache);
        assert_eq!(wire.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_data_is_served_partial_when_refresh_fails() {
        let wire = FakeAdapter::new("wire", AdapterKind::Rss, vec!["Fed holds"]);
        let clock = Arc::new(FakeClock::new());
        let service = NewsService::new(vec![dynamic(&wire)], None, Arc::clone(&clock), config());

        service.get_news(&us(), 10).await.unwrap();
        wire.failing.store(true, Ordering::SeqCst);
        clock.advance(Duration::from_secs(3600));

        let response = service.get_news(&us(), 10).await.unwrap();
        assert!(response.partial);
        assert_eq!(response.failed_adapters, vec!["wire".to_string()]);
        assert_eq!(response.items.len(), 1);
    }

    #[tokio::test]
    async fn no_adapter_for_market_is_an_error() {
        let wire = FakeAdapter::new("wire", AdapterKind::Rss, vec!["Fed holds"]);
        let service = NewsService::new(vec![dynamic(&wire)], None, Arc::new(FakeClock::new()), config());
        let result = service
            .get_news(&BTreeSet::from([Market::Korea]), 10)
            .await;
        assert!(matches!(result, Err(PipelineError::NoAdapters(_))));
    }

    #[tokio::test]
    async fn refresh_persists_and_warm_start_restores() {
        let store = Arc::new(FakeSnapshotStore::default());
        let wire = FakeAdapter::new("wire", AdapterKind::Rss, vec!["Fed holds", "Dow rises"]);
        let first = NewsService::new(
            vec![dynamic(&wire)],
            Some(store.clone() as Arc<dyn SnapshotStore>),
            Arc::new(FakeClock::new()),
            config(),
        );
        first.refresh(&us()).await.unwrap();
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);

        let second = NewsService::new(
            vec![dynamic(&wire)],
            Some(store.clone() as Arc<dyn SnapshotStore>),
            Arc::new(FakeClock::new()),
            config(),
        );
        assert_eq!(second.warm_start().await, 1);
        let entry = second.cache().entry(Market::Us).unwrap();
        assert_eq!(entry.source_of_truth, SourceOfTruth::WarmStart);
        assert_eq!(entry.items.len(), 2);
        assert_eq!(second.health_snapshot().status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn failed_run_does_not_persist() {
        let store = Arc::new(FakeSnapshotStore::default());
        let wire = FakeAdapter::new("wire", AdapterKind::Rss, vec!["Fed holds"]);
        wire.failing.store(true, Ordering::SeqCst);
        let service = NewsService::new(
            vec![dynamic(&wire)],
            Some(store.clone() as Arc<dyn SnapshotStore>),
            Arc::new(FakeClock::new()),
            config(),
        );
        let report = service.refresh(&us()).await.unwrap();
        assert!(report.partial);
        assert!(report.refreshed_markets.is_empty());
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn corrupt_snapshot_falls_back_to_empty_cache() {
        let store = Arc::new(FakeSnapshotStore {
            corrupt: true,
            ..Default::default()
        });
        let wire = FakeAdapter::new("wire", AdapterKind::Rss, vec!["Fed holds"]);
        let service = NewsService::new(
            vec![dynamic(&wire)],
            Some(store as Arc<dyn SnapshotStore>),
            Arc::new(FakeClock::new()),
            config(),
        );
        assert_eq!(service.warm_start().await, 0);
        assert!(service.cache().entry(Market::Us).is_none());
        assert_eq!(service.health_snapshot().status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn multi_market_results_merge_by_fingerprint() {
        let both = Arc::new(FakeAdapter {
            id: "both".to_string(),
            kind: AdapterKind::Rss,
            markets: BTreeSet::from([Market::Us, Market::Japan]),
            titles: vec!["Nikkei and Dow rally"],
            failing: AtomicBool::new(false),
            hang: false,
            calls: AtomicUsize::new(0),
        });
        let service = NewsService::new(vec![dynamic(&both)], None, Arc::new(FakeClock::new()), config());

        let response = service
            .get_news(&BTreeSet::from([Market::Us, Market::Japan]), 10)
            .await
            .unwrap();
        assert_eq!(response.items.len(), 1);
        assert_eq!(
            response.items[0].qualified_markets,
            BTreeSet::from([Market::Us, Market::Japan])
        );
    }

    #[tokio::test]
    async fn unserved_markets_do_not_defeat_the_cache() {
        let wire = FakeAdapter::new("wire", AdapterKind::Rss, vec!["Fed holds"]);
        let clock = Arc::new(FakeClock::new());
        let service = NewsService::new(vec![dynamic(&wire)], None, Arc::clone(&clock), config());
        let requested = BTreeSet::from([Market::Us, Market::Japan]);

        let first = service.get_news(&requested, 10).await.unwrap();
        assert!(first.partial);
        assert_eq!(first.served_from, ServedFrom::Live);
        assert!(first.failed_adapters.is_empty());

        clock.advance(Duration::from_secs(60));
        let second = service.get_news(&requested, 10).await.unwrap();
        assert_eq!(second.served_from, ServedFrom::Cache);
        assert!(second.partial);
        assert_eq!(second.items.len(), 1);
        assert_eq!(wire.calls.load(Ordering::SeqCst), 1);
    }

    struct PerMarketAdapter {
        markets: BTreeSet<Market>,
    }

    #[async_trait]
    impl NewsAdapter for PerMarketAdapter {
        fn id(&self) -> &str {
            "regional"
        }

        fn kind(&self) -> AdapterKind {
            AdapterKind::Rss
        }

        fn markets(&self) -> &BTreeSet<Market> {
            &self.markets
        }

        async fn fetch(
            &self,
            markets: &BTreeSet<Market>,
            _limit: usize,
        ) -> Result<Vec<RawItem>, FetchError> {
            // Ignores the limit; the orchestrator enforces it
            Ok(markets
                .iter()
                .flat_map(|market| {
                    let term = if *market == Market::Japan { "Nikkei" } else { "Dow" };
                    (0..3).map(move |i| {
                        RawItem::new(
                            "regional",
                            AdapterKind::Rss,
                            format!("{term} moves {i}"),
                            format!("https://regional.example/{market}/{i}"),
                            BTreeSet::from([*market]),
                        )
                    })
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn fetch_limit_does_not_starve_a_market() {
        let markets = BTreeSet::from([Market::Us, Market::Japan]);
        let regional: Arc<dyn NewsAdapter> = Arc::new(PerMarketAdapter {
            markets: markets.clone(),
        });
        let service = NewsService::new(
            vec![regional],
            None,
            Arc::new(FakeClock::new()),
            PipelineConfig {
                fetch_limit: 3,
                ..config()
            },
        );

        let response = service.get_news(&markets, 10).await.unwrap();
        assert!(!response.partial);
        assert_eq!(service.cache().entry(Market::Us).unwrap().items.len(), 3);
        assert_eq!(service.cache().entry(Market::Japan).unwrap().items.len(), 3);
        assert_eq!(response.items.len(), 6);
        assert_eq!(service.health_snapshot().status, HealthStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_refreshes_leave_a_whole_entry() {
        let slow = Arc::new(FakeAdapter {
            id: "slow".to_string(),
            kind: AdapterKind::Rss,
            markets: us(),
            titles: vec!["Fed holds", "Dow rises", "Treasury yields dip"],
            failing: AtomicBool::new(false),
            hang: false,
            calls: AtomicUsize::new(0),
        });
        let service = NewsService::new(vec![dynamic(&slow)], None, Arc::new(FakeClock::new()), config());

        let markets = us();
        let (a, b, c) = tokio::join!(
            service.refresh(&markets),
            service.get_news(&markets, 10),
            service.refresh(&markets),
        );
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

        assert_eq!(a.canonical_items, 3);
        assert_eq!(c.canonical_items, 3);
        assert_eq!(b.items.len(), 3);
        assert_eq!(slow.calls.load(Ordering::SeqCst), 3);

        let entry = service.cache().entry(Market::Us).unwrap();
        assert_eq!(entry.items.len(), 3);
        assert_eq!(entry.source_of_truth, SourceOfTruth::Live);
    }
}
