//! Orchestrator use case - fans out adapter fetches under circuit, timeout and deadline control

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;

use crate::{
    model::{AdapterId, Market, PipelineResult, RawItem},
    ports::{Clock, FetchError, NewsAdapter, cap_per_market},
    usecases::circuit::{CircuitTracker, Permit},
};

/// Configuration for orchestrator runs
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum adapter calls in flight at once
    pub max_concurrent: usize,
    /// Hard cap on a single adapter call; an adapter's own recommendation may only lower it
    pub call_timeout: Duration,
    /// Whole-run deadline; in-flight calls are cancelled when it passes
    pub run_deadline: Duration,
    /// Minimum spacing between calls per adapter; runs in between reuse the
    /// adapter's last successful items
    pub poll_intervals: BTreeMap<AdapterId, Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            call_timeout: Duration::from_secs(20),
            run_deadline: Duration::from_secs(45),
            poll_intervals: BTreeMap::new(),
        }
    }
}

/// Errors from the orchestrator
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("No adapters serve markets {0:?}")]
    NoAdapters(BTreeSet<Market>),
}

struct FetchOutcome {
    adapter: AdapterId,
    wanted: BTreeSet<Market>,
    result: Result<Vec<RawItem>, FetchError>,
    elapsed: Duration,
}

/// Last successful fetch of an adapter with a poll interval
struct Polled {
    at: OffsetDateTime,
    markets: BTreeSet<Market>,
    items: Vec<RawItem>,
}

/// Per-run bookkeeping
#[derive(Default)]
struct Tally {
    collected: HashMap<AdapterId, Vec<RawItem>>,
    succeeded: Vec<AdapterId>,
    failed: Vec<AdapterId>,
    skipped: Vec<AdapterId>,
    reused: Vec<AdapterId>,
}

/// Runs every adapter serving a market set and merges their items
pub struct Orchestrator<Cl>
where
    Cl: Clock + ?Sized,
{
    adapters: Vec<Arc<dyn NewsAdapter>>,
    circuits: Arc<CircuitTracker>,
    clock: Arc<Cl>,
    config: OrchestratorConfig,
    polled: Mutex<HashMap<AdapterId, Polled>>,
}

impl<Cl> Orchestrator<Cl>
where
    Cl: Clock + ?Sized,
{
    pub fn new(
        adapters: Vec<Arc<dyn NewsAdapter>>,
        circuits: Arc<CircuitTracker>,
        clock: Arc<Cl>,
        config: OrchestratorConfig,
    ) -> Self {
        for adapter in &adapters {
            circuits.register(adapter.id(), adapter.kind(), adapter.markets());
        }
        Self {
            adapters,
            circuits,
            clock,
            config,
            polled: Mutex::new(HashMap::new()),
        }
    }

    pub fn adapters(&self) -> &[Arc<dyn NewsAdapter>] {
        &self.adapters
    }

    pub fn circuits(&self) -> &Arc<CircuitTracker> {
        &self.circuits
    }

    /// Union of the markets every adapter serves
    pub fn served_markets(&self) -> BTreeSet<Market> {
        self.adapters
            .iter()
            .flat_map(|a| a.markets().iter().copied())
            .collect()
    }

    /// Fetch from every adapter intersecting `markets`, at most `limit` items
    /// per market and adapter
    ///
    /// Only fails when no adapter serves any requested market. Adapter
    /// failures, timeouts, open circuits and deadline cancellations end up in
    /// `failed_adapters` with `partial = true`.
    pub async fn run(
        &self,
        markets: &BTreeSet<Market>,
        limit: usize,
    ) -> Result<PipelineResult, PipelineError> {
        let run_id = Uuid::new_v4();
        let started_at = self.clock.now();

        let candidates: Vec<&Arc<dyn NewsAdapter>> = self
            .adapters
            .iter()
            .filter(|a| !a.markets().is_disjoint(markets))
            .collect();

        if candidates.is_empty() {
            return Err(PipelineError::NoAdapters(markets.clone()));
        }

        tracing::info!(
            run_id = %run_id,
            markets = ?markets,
            adapters = candidates.len(),
            "Starting pipeline run"
        );

        let mut tally = Tally::default();
        let mut queue: VecDeque<&Arc<dyn NewsAdapter>> = VecDeque::new();
        for adapter in &candidates {
            let wanted = wanted_markets(adapter, markets);
            match self.reusable(adapter.id(), &wanted, limit, started_at) {
                Some(items) => {
                    tracing::debug!(
                        run_id = %run_id,
                        adapter = %adapter.id(),
                        items = items.len(),
                        "Poll interval not elapsed, reusing previous items"
                    );
                    tally.collected.insert(adapter.id().to_string(), items);
                    tally.succeeded.push(adapter.id().to_string());
                    tally.reused.push(adapter.id().to_string());
                }
                None => queue.push_back(*adapter),
            }
        }

        let deadline = Instant::now() + self.config.run_deadline;
        let max_concurrent = self.config.max_concurrent.max(1);
        let mut tasks: FuturesUnordered<BoxFuture<'static, FetchOutcome>> =
            FuturesUnordered::new();
        let mut in_flight: BTreeSet<AdapterId> = BTreeSet::new();

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);
        let mut deadline_hit = false;

        loop {
            while tasks.len() < max_concurrent {
                let Some(adapter) = queue.pop_front() else {
                    break;
                };
                match self.circuits.permit(adapter.id(), self.clock.now()) {
                    Permit::Skip { retry_at } => {
                        tracing::debug!(
                            run_id = %run_id,
                            adapter = %adapter.id(),
                            retry_at = ?retry_at,
                            "Circuit open, skipping adapter"
                        );
                        tally.skipped.push(adapter.id().to_string());
                    }
                    Permit::Call | Permit::Probe => {
                        in_flight.insert(adapter.id().to_string());
                        tasks.push(self.dispatch(adapter, markets, limit));
                    }
                }
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                outcome = tasks.next() => {
                    let Some(outcome) = outcome else {
                        break;
                    };
                    in_flight.remove(&outcome.adapter);
                    self.settle(run_id, outcome, limit, &mut tally);
                }
                () = &mut sleep => {
                    deadline_hit = true;
                    break;
                }
            }
        }

        if deadline_hit {
            drop(tasks);
            let now = self.clock.now();
            let error = FetchError::timeout("cancelled at pipeline deadline");
            for adapter in in_flight {
                tracing::warn!(run_id = %run_id, adapter = %adapter, "Adapter cancelled at run deadline");
                self.circuits.record_failure(&adapter, &error, now, None);
                tally.failed.push(adapter);
            }
            for adapter in queue {
                tracing::warn!(run_id = %run_id, adapter = %adapter.id(), "Adapter not started before run deadline");
                tally.skipped.push(adapter.id().to_string());
            }
        }

        let Tally {
            mut collected,
            mut succeeded,
            mut failed,
            mut skipped,
            mut reused,
        } = tally;

        failed.extend(skipped.iter().cloned());
        failed.sort();
        skipped.sort();
        succeeded.sort();
        reused.sort();

        let refreshed_markets: BTreeSet<Market> = candidates
            .iter()
            .filter(|a| succeeded.iter().any(|id| id == a.id()))
            .flat_map(|a| a.markets().intersection(markets).copied())
            .collect();

        // Candidate order keeps dedup's first-seen rule independent of completion order
        let items: Vec<RawItem> = candidates
            .iter()
            .filter_map(|a| collected.remove(a.id()))
            .flatten()
            .collect();

        let finished_at = self.clock.now();
        let partial = !failed.is_empty();

        tracing::info!(
            run_id = %run_id,
            items = items.len(),
            succeeded = succeeded.len(),
            reused = reused.len(),
            failed = failed.len(),
            skipped = skipped.len(),
            partial,
            "Pipeline run finished"
        );

        Ok(PipelineResult {
            run_id,
            items,
            partial,
            failed_adapters: failed,
            skipped_adapters: skipped,
            succeeded_adapters: succeeded,
            reused_adapters: reused,
            refreshed_markets,
            started_at,
            finished_at,
        })
    }

    /// Previous items of `id` if its poll interval has not elapsed and they cover `wanted`
    fn reusable(
        &self,
        id: &str,
        wanted: &BTreeSet<Market>,
        limit: usize,
        now: OffsetDateTime,
    ) -> Option<Vec<RawItem>> {
        let interval = self.config.poll_intervals.get(id)?;
        let polled = self.polled.lock().unwrap_or_else(PoisonError::into_inner);
        let last = polled.get(id)?;
        if now >= last.at + *interval || !last.markets.is_superset(wanted) {
            return None;
        }
        Some(cap_per_market(last.items.clone(), wanted, limit))
    }

    fn remember(&self, id: &str, wanted: &BTreeSet<Market>, items: &[RawItem], now: OffsetDateTime) {
        if !self.config.poll_intervals.contains_key(id) {
            return;
        }
        let mut polled = self.polled.lock().unwrap_or_else(PoisonError::into_inner);
        polled.insert(
            id.to_string(),
            Polled {
                at: now,
                markets: wanted.clone(),
                items: items.to_vec(),
            },
        );
    }

    fn dispatch(
        &self,
        adapter: &Arc<dyn NewsAdapter>,
        markets: &BTreeSet<Market>,
        limit: usize,
    ) -> BoxFuture<'static, FetchOutcome> {
        let adapter = Arc::clone(adapter);
        let wanted = wanted_markets(&adapter, markets);
        let timeout = adapter.recommended_timeout().min(self.config.call_timeout);

        Box::pin(async move {
            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, adapter.fetch(&wanted, limit)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::timeout(format!(
                    "no response within {}ms",
                    timeout.as_millis()
                ))),
            };
            FetchOutcome {
                adapter: adapter.id().to_string(),
                wanted,
                result,
                elapsed: started.elapsed(),
            }
        })
    }

    fn settle(&self, run_id: Uuid, outcome: FetchOutcome, limit: usize, tally: &mut Tally) {
        let now = self.clock.now();
        match outcome.result {
            Ok(items) => {
                let items = cap_per_market(items, &outcome.wanted, limit);
                tracing::debug!(
                    run_id = %run_id,
                    adapter = %outcome.adapter,
                    items = items.len(),
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "Adapter fetch succeeded"
                );
                self.circuits
                    .record_success(&outcome.adapter, now, items.len(), Some(outcome.elapsed));
                self.remember(&outcome.adapter, &outcome.wanted, &items, now);
                tally.collected.insert(outcome.adapter.clone(), items);
                tally.succeeded.push(outcome.adapter);
            }
            Err(error) => {
                tracing::warn!(
                    run_id = %run_id,
                    adapter = %outcome.adapter,
                    error = %error,
                    "Adapter fetch failed"
                );
                self.circuits
                    .record_failure(&outcome.adapter, &error, now, Some(outcome.elapsed));
                tally.failed.push(outcome.adapter);
            }
        }
    }
}

fn wanted_markets(adapter: &Arc<dyn NewsAdapter>, markets: &BTreeSet<Market>) -> BTreeSet<Market> {
    adapter.markets().intersection(markets).copied().collect()
}
