//! Per-adapter circuit breaker
//!
//! `closed -> open` after `failure_threshold` consecutive failures,
//! `open -> half_open` once the cooldown elapses (checked lazily when the
//! orchestrator asks for a permit), `half_open -> closed` on one success and
//! `half_open -> open` on failure with the cooldown reset to the base interval.
//!
//! The cooldown only grows through failures reported while already open,
//! i.e. late results of calls that were in flight when the breaker tripped.
//! Each such failure multiplies it by `backoff_factor`, up to `max_backoff`.
//! A breaker cycling through failed probes one at a time therefore retries
//! every `base_backoff`.
//!
//! A granted probe holds a lease of `probe_lease`. If nobody settles it
//! within that time (the caller dropped the run future) the next permit
//! request hands out a fresh probe.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use time::OffsetDateTime;

use crate::model::{
    AdapterError, AdapterId, AdapterKind, CircuitState, CircuitStatus, HealthRecord, Market,
};
use crate::ports::FetchError;

/// Breaker tuning
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Consecutive failures that open a closed circuit
    pub failure_threshold: u32,
    pub base_backoff: Duration,
    pub backoff_factor: f64,
    pub max_backoff: Duration,
    /// How long a half-open probe may stay unsettled before another is allowed
    pub probe_lease: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            base_backoff: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_backoff: Duration::from_secs(30 * 60),
            probe_lease: Duration::from_secs(60),
        }
    }
}

/// Answer to "may this adapter be called now?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Circuit closed
    Call,
    /// Cooldown elapsed; this call decides whether the circuit closes again
    Probe,
    /// Circuit open, or a probe is already in flight
    Skip {
        retry_at: Option<OffsetDateTime>,
    },
}

impl Permit {
    pub fn allowed(&self) -> bool {
        !matches!(self, Permit::Skip { .. })
    }
}

#[derive(Debug)]
struct AdapterSlot {
    kind: AdapterKind,
    markets: BTreeSet<Market>,
    state: CircuitState,
    /// Set while a probe is out; cleared when it settles
    probe_started_at: Option<OffsetDateTime>,
    last_success_at: Option<OffsetDateTime>,
    last_error: Option<AdapterError>,
    items_last_fetch: usize,
    latency_ms: Option<u64>,
}

/// Keyed store of circuit state; each adapter has its own lock so updates to
/// unrelated adapters never contend.
#[derive(Debug, Default)]
pub struct CircuitTracker {
    config: CircuitConfig,
    slots: RwLock<HashMap<AdapterId, Arc<Mutex<AdapterSlot>>>>,
}

fn lock(slot: &Mutex<AdapterSlot>) -> MutexGuard<'_, AdapterSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CircuitTracker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Start tracking an adapter; re-registering keeps existing state
    pub fn register(&self, id: &str, kind: AdapterKind, markets: &BTreeSet<Market>) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.entry(id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(AdapterSlot {
                kind,
                markets: markets.clone(),
                state: CircuitState::default(),
                probe_started_at: None,
                last_success_at: None,
                last_error: None,
                items_last_fetch: 0,
                latency_ms: None,
            }))
        });
    }

    fn slot(&self, id: &str) -> Option<Arc<Mutex<AdapterSlot>>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(id).cloned()
    }

    /// Decide whether the adapter may be invoked; may move `open -> half_open`
    pub fn permit(&self, id: &str, now: OffsetDateTime) -> Permit {
        let Some(slot) = self.slot(id) else {
            return Permit::Call;
        };
        let mut slot = lock(&slot);

        match slot.state.status {
            CircuitStatus::Closed => Permit::Call,
            CircuitStatus::Open => {
                let ready = slot.state.next_retry_at.is_none_or(|at| now >= at);
                if ready {
                    slot.state.status = CircuitStatus::HalfOpen;
                    slot.probe_started_at = Some(now);
                    tracing::info!(adapter = %id, "Circuit half-open, probing");
                    Permit::Probe
                } else {
                    Permit::Skip {
                        retry_at: slot.state.next_retry_at,
                    }
                }
            }
            CircuitStatus::HalfOpen => match slot.probe_started_at {
                Some(started) if now < started + self.config.probe_lease => Permit::Skip {
                    retry_at: Some(started + self.config.probe_lease),
                },
                previous => {
                    if previous.is_some() {
                        tracing::warn!(adapter = %id, "Probe never settled, lease expired");
                    }
                    slot.probe_started_at = Some(now);
                    Permit::Probe
                }
            },
        }
    }

    pub fn record_success(
        &self,
        id: &str,
        now: OffsetDateTime,
        items: usize,
        latency: Option<Duration>,
    ) {
        let Some(slot) = self.slot(id) else {
            tracing::warn!(adapter = %id, "Success reported for unknown adapter");
            return;
        };
        let mut slot = lock(&slot);

        if slot.state.status != CircuitStatus::Closed {
            tracing::info!(adapter = %id, from = ?slot.state.status, "Circuit closed");
        }
        slot.state = CircuitState::default();
        slot.probe_started_at = None;
        slot.last_success_at = Some(now);
        slot.items_last_fetch = items;
        slot.latency_ms = latency.map(duration_ms);
    }

    pub fn record_failure(
        &self,
        id: &str,
        error: &FetchError,
        now: OffsetDateTime,
        latency: Option<Duration>,
    ) {
        let Some(slot) = self.slot(id) else {
            tracing::warn!(adapter = %id, "Failure reported for unknown adapter");
            return;
        };
        let mut slot = lock(&slot);

        slot.last_error = Some(AdapterError {
            kind: error.kind,
            message: error.message.clone(),
            at: now,
        });
        slot.items_last_fetch = 0;
        slot.latency_ms = latency.map(duration_ms);
        slot.state.consecutive_failures = slot.state.consecutive_failures.saturating_add(1);

        match slot.state.status {
            CircuitStatus::Closed => {
                if slot.state.consecutive_failures >= self.config.failure_threshold {
                    self.trip(&mut slot, now, self.config.base_backoff);
                    tracing::info!(
                        adapter = %id,
                        failures = slot.state.consecutive_failures,
                        backoff_secs = slot.state.backoff_secs,
                        "Circuit opened"
                    );
                }
            }
            CircuitStatus::HalfOpen => {
                slot.probe_started_at = None;
                self.trip(&mut slot, now, self.config.base_backoff);
                tracing::info!(adapter = %id, "Probe failed, circuit re-opened");
            }
            CircuitStatus::Open => {
                let current = Duration::from_secs(slot.state.backoff_secs);
                let grown = current
                    .mul_f64(self.config.backoff_factor.max(1.0))
                    .min(self.config.max_backoff);
                slot.state.backoff_secs = grown.as_secs();
                slot.state.next_retry_at = Some(now + grown);
            }
        }
    }

    fn trip(&self, slot: &mut AdapterSlot, now: OffsetDateTime, backoff: Duration) {
        let backoff = backoff.min(self.config.max_backoff);
        slot.state.status = CircuitStatus::Open;
        slot.state.opened_at = Some(now);
        slot.state.next_retry_at = Some(now + backoff);
        slot.state.backoff_secs = backoff.as_secs();
    }

    pub fn state(&self, id: &str) -> Option<CircuitState> {
        self.slot(id).map(|slot| lock(&slot).state.clone())
    }

    /// Health records for every tracked adapter, sorted by id
    pub fn records(&self) -> Vec<HealthRecord> {
        let slots: Vec<(AdapterId, Arc<Mutex<AdapterSlot>>)> = {
            let map = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            map.iter()
                .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
                .collect()
        };

        let mut records: Vec<HealthRecord> = slots
            .into_iter()
            .map(|(id, slot)| {
                let slot = lock(&slot);
                HealthRecord {
                    adapter: id,
                    kind: slot.kind,
                    markets: slot.markets.clone(),
                    last_success_at: slot.last_success_at,
                    last_error: slot.last_error.clone(),
                    circuit: slot.state.clone(),
                    items_last_fetch: slot.items_last_fetch,
                    latency_ms: slot.latency_ms,
                }
            })
            .collect();
        records.sort_by(|a, b| a.adapter.cmp(&b.adapter));
        records
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn tracker() -> CircuitTracker {
        let tracker = CircuitTracker::new(CircuitConfig::default());
        tracker.register("a", AdapterKind::Rss, &BTreeSet::from([Market::Us]));
        tracker
    }

    fn err() -> FetchError {
        FetchError::upstream("HTTP 500")
    }

    #[test]
    fn three_failures_open_the_circuit() {
        let t = tracker();
        let now = datetime!(2026-01-01 12:00 UTC);

        t.record_failure("a", &err(), now, None);
        t.record_failure("a", &err(), now, None);
        assert_eq!(t.state("a").unwrap().status, CircuitStatus::Closed);
        assert_eq!(t.permit("a", now), Permit::Call);

        t.record_failure("a", &err(), now, None);
        let state = t.state("a").unwrap();
        assert_eq!(state.status, CircuitStatus::Open);
        assert_eq!(state.opened_at, Some(now));
        assert_eq!(state.next_retry_at, Some(now + Duration::from_secs(30)));
        assert!(!t.permit("a", now + Duration::from_secs(10)).allowed());
    }

    #[test]
    fn full_lifecycle_open_half_open_closed() {
        let t = tracker();
        let now = datetime!(2026-01-01 12:00 UTC);
        for _ in 0..3 {
            t.record_failure("a", &err(), now, None);
        }

        let later = now + Duration::from_secs(30);
        assert_eq!(t.permit("a", later), Permit::Probe);
        assert_eq!(t.state("a").unwrap().status, CircuitStatus::HalfOpen);

        t.record_success("a", later, 4, Some(Duration::from_millis(120)));
        let state = t.state("a").unwrap();
        assert_eq!(state.status, CircuitStatus::Closed);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(t.permit("a", later), Permit::Call);
    }

    #[test]
    fn half_open_failure_reopens_with_reset_backoff() {
        let t = tracker();
        let now = datetime!(2026-01-01 12:00 UTC);
        for _ in 0..3 {
            t.record_failure("a", &err(), now, None);
        }
        // A late failure while open grows the cooldown
        t.record_failure("a", &err(), now, None);
        assert_eq!(t.state("a").unwrap().backoff_secs, 60);

        let probe_at = now + Duration::from_secs(60);
        assert_eq!(t.permit("a", probe_at), Permit::Probe);
        t.record_failure("a", &err(), probe_at, None);

        let state = t.state("a").unwrap();
        assert_eq!(state.status, CircuitStatus::Open);
        assert_eq!(state.opened_at, Some(probe_at));
        assert_eq!(state.backoff_secs, 30);
        assert_eq!(state.next_retry_at, Some(probe_at + Duration::from_secs(30)));
    }

    #[test]
    fn only_one_probe_in_flight() {
        let t = tracker();
        let now = datetime!(2026-01-01 12:00 UTC);
        for _ in 0..3 {
            t.record_failure("a", &err(), now, None);
        }
        let later = now + Duration::from_secs(31);
        assert_eq!(t.permit("a", later), Permit::Probe);
        assert!(!t.permit("a", later).allowed());
    }

    #[test]
    fn abandoned_probe_is_replaced_after_lease() {
        let t = tracker();
        let now = datetime!(2026-01-01 12:00 UTC);
        for _ in 0..3 {
            t.record_failure("a", &err(), now, None);
        }

        let probe_at = now + Duration::from_secs(30);
        assert_eq!(t.permit("a", probe_at), Permit::Probe);
        // Nothing ever settles this probe
        assert_eq!(
            t.permit("a", probe_at + Duration::from_secs(59)),
            Permit::Skip {
                retry_at: Some(probe_at + Duration::from_secs(60))
            }
        );

        let retry_at = probe_at + Duration::from_secs(60);
        assert_eq!(t.permit("a", retry_at), Permit::Probe);
        assert!(!t.permit("a", retry_at).allowed());

        t.record_success("a", retry_at, 1, None);
        assert_eq!(t.state("a").unwrap().status, CircuitStatus::Closed);
    }

    #[test]
    fn sequential_failed_probes_retry_at_base_interval() {
        let t = tracker();
        let mut now = datetime!(2026-01-01 12:00 UTC);
        for _ in 0..3 {
            t.record_failure("a", &err(), now, None);
        }
        for _ in 0..4 {
            now += Duration::from_secs(30);
            assert_eq!(t.permit("a", now), Permit::Probe);
            t.record_failure("a", &err(), now, None);
            assert_eq!(t.state("a").unwrap().backoff_secs, 30);
        }
    }

    #[test]
    fn backoff_growth_is_capped() {
        let t = CircuitTracker::new(CircuitConfig {
            max_backoff: Duration::from_secs(100),
            ..Default::default()
        });
        t.register("a", AdapterKind::Rss, &BTreeSet::new());
        let now = datetime!(2026-01-01 12:00 UTC);
        for _ in 0..10 {
            t.record_failure("a", &err(), now, None);
        }
        assert_eq!(t.state("a").unwrap().backoff_secs, 100);
    }

    #[test]
    fn records_carry_last_error_and_success() {
        let t = tracker();
        let now = datetime!(2026-01-01 12:00 UTC);
        t.record_success("a", now, 7, Some(Duration::from_millis(250)));
        t.record_failure("a", &FetchError::rate_limited("429"), now, None);

        let records = t.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].last_success_at, Some(now));
        let last_error = records[0].last_error.as_ref().unwrap();
        assert_eq!(last_error.kind, crate::ports::FetchErrorKind::RateLimited);
    }

    #[test]
    fn unknown_adapter_is_always_permitted() {
        let t = CircuitTracker::new(CircuitConfig::default());
        assert_eq!(
            t.permit("ghost", datetime!(2026-01-01 12:00 UTC)),
            Permit::Call
        );
    }
}
