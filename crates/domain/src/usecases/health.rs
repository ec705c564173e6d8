//! Health monitor - derives a status snapshot from circuit and cache state

use std::collections::BTreeSet;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::model::{
    CircuitStatus, HealthRecord, HealthSnapshot, HealthStatus, Market, MarketFreshness,
    MarketHealth,
};
use crate::usecases::{cache::CacheStore, circuit::CircuitTracker};

pub struct HealthMonitor {
    circuits: Arc<CircuitTracker>,
    cache: Arc<CacheStore>,
    markets: BTreeSet<Market>,
}

impl HealthMonitor {
    /// `markets` are the markets the deployment is expected to serve
    pub fn new(
        circuits: Arc<CircuitTracker>,
        cache: Arc<CacheStore>,
        markets: BTreeSet<Market>,
    ) -> Self {
        Self {
            circuits,
            cache,
            markets,
        }
    }

    pub fn snapshot(&self, now: OffsetDateTime) -> HealthSnapshot {
        let adapters = self.circuits.records();

        let markets: Vec<MarketHealth> = self
            .markets
            .iter()
            .map(|market| {
                let entry = self.cache.entry(*market);
                let freshness = self.cache.freshness(*market, now);
                MarketHealth {
                    market: *market,
                    freshness,
                    last_refreshed_at: entry.as_ref().map(|e| e.last_refreshed_at),
                    item_count: entry.as_ref().map_or(0, |e| e.items.len()),
                    status: market_status(*market, freshness, &adapters),
                }
            })
            .collect();

        let adapter_status = adapters
            .iter()
            .map(|r| match r.circuit.status {
                CircuitStatus::Closed => HealthStatus::Healthy,
                CircuitStatus::HalfOpen | CircuitStatus::Open => HealthStatus::Degraded,
            })
            .max()
            .unwrap_or(HealthStatus::Healthy);

        let status = markets
            .iter()
            .map(|m| m.status)
            .fold(adapter_status, HealthStatus::max);

        HealthSnapshot {
            generated_at: now,
            status,
            adapters,
            markets,
        }
    }
}

fn market_status(
    market: Market,
    freshness: MarketFreshness,
    adapters: &[HealthRecord],
) -> HealthStatus {
    let serving: Vec<&HealthRecord> = adapters
        .iter()
        .filter(|r| r.markets.contains(&market))
        .collect();
    let open = serving
        .iter()
        .filter(|r| r.circuit.status == CircuitStatus::Open)
        .count();

    if freshness == MarketFreshness::Missing {
        return HealthStatus::Unhealthy;
    }
    if !serving.is_empty() && open == serving.len() {
        return HealthStatus::Unhealthy;
    }
    if open > 0 && freshness != MarketFreshness::Fresh {
        return HealthStatus::Unhealthy;
    }

    let any_tripped = serving
        .iter()
        .any(|r| r.circuit.status != CircuitStatus::Closed);
    if any_tripped || freshness != MarketFreshness::Fresh {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}
