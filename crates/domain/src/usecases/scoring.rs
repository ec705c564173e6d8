//! Scoring engine - market-aware relevance in `[0, 1]`
//!
//! The score is a weighted mean of three components, each in `[0, 1]`:
//! keyword match strength against the market's term set, recency decay, and
//! a static trust weight per adapter kind.
//!
//! Before scoring, items with no term match for the market are dropped unless
//! a social source contributed to them.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use time::OffsetDateTime;

use crate::model::{AdapterKind, CanonicalItem, Market, ScoredItem};

pub const BASE_TERMS: &[&str] = &[
    "stock",
    "market",
    "finance",
    "economy",
    "tariff",
    "china",
    "fed",
    "inflation",
    "trade",
    "ipo",
    "earnings",
    "geopolitics",
];

const US_TERMS: &[&str] = &["S&P", "Dow", "Treasury"];
const JAPAN_TERMS: &[&str] = &["Nikkei", "BOJ"];
const KOREA_TERMS: &[&str] = &["KOSPI", "Samsung"];
const CRYPTO_TERMS: &[&str] = &["bitcoin", "ethereum", "token", "defi"];
const A_SHARE_TERMS: &[&str] = &[
    "A-share",
    "Shanghai Composite",
    "Shenzhen Component",
    "Chinese economy",
    "Beijing policy",
    "Stock Connect",
    "RMB",
    "yuan",
    "PBOC",
    "China-US trade",
    "semiconductor export ban",
    "EV subsidy",
    "New Energy Vehicle",
    "lithium battery",
    "solar panel",
    "AI chip",
    "stock market",
    "economy",
    "finance",
    "ipo",
    "earnings",
    "inflation",
    "monetary policy",
    "gdp",
];

/// Term lists shipped by default; markets absent here use [`BASE_TERMS`]
pub fn default_market_terms() -> BTreeMap<Market, Vec<String>> {
    let owned = |terms: &[&str]| terms.iter().map(|t| t.to_string()).collect::<Vec<_>>();
    let with_base = |extra: &[&str]| {
        let mut terms = owned(BASE_TERMS);
        terms.extend(owned(extra));
        terms
    };

    BTreeMap::from([
        (Market::Global, owned(BASE_TERMS)),
        (Market::Us, with_base(US_TERMS)),
        (Market::Japan, with_base(JAPAN_TERMS)),
        (Market::Korea, with_base(KOREA_TERMS)),
        (Market::Crypto, owned(CRYPTO_TERMS)),
        (Market::AShare, owned(A_SHARE_TERMS)),
    ])
}

pub fn default_trust() -> BTreeMap<AdapterKind, f64> {
    BTreeMap::from([
        (AdapterKind::NewsService, 1.0),
        (AdapterKind::Rss, 0.9),
        (AdapterKind::Social, 0.6),
        (AdapterKind::Stub, 0.5),
    ])
}

/// Scoring configuration; weights need not sum to 1, the score is normalised by their sum
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub keyword_weight: f64,
    pub recency_weight: f64,
    pub trust_weight: f64,
    /// Match count at which keyword strength saturates
    pub keyword_cap: usize,
    pub recency_half_life: Duration,
    /// Items older than this get `recency_floor`
    pub recency_horizon: Duration,
    /// Recency for items past the horizon or without a timestamp
    pub recency_floor: f64,
    pub trust: BTreeMap<AdapterKind, f64>,
    pub market_terms: BTreeMap<Market, Vec<String>>,
    /// Scored items below this are dropped
    pub min_score: f64,
    /// Drop items without any term match, except those with a social source
    pub require_keyword_match: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            keyword_weight: 0.5,
            recency_weight: 0.3,
            trust_weight: 0.2,
            keyword_cap: 5,
            recency_half_life: Duration::from_secs(6 * 3600),
            recency_horizon: Duration::from_secs(72 * 3600),
            recency_floor: 0.05,
            trust: default_trust(),
            market_terms: default_market_terms(),
            min_score: 0.0,
            require_keyword_match: true,
        }
    }
}

pub struct Scorer {
    config: ScoringConfig,
    patterns: HashMap<Market, Vec<Regex>>,
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Self {
        let patterns = Market::ALL
            .iter()
            .map(|market| {
                let terms = config
                    .market_terms
                    .get(market)
                    .cloned()
                    .unwrap_or_else(|| BASE_TERMS.iter().map(|t| t.to_string()).collect());
                (*market, compile_terms(&terms))
            })
            .collect();
        Self { config, patterns }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Relevance of `item` for `market` as of `now`
    pub fn score(&self, item: &CanonicalItem, market: Market, now: OffsetDateTime) -> f64 {
        let c = &self.config;
        let total = c.keyword_weight + c.recency_weight + c.trust_weight;
        if total <= 0.0 {
            return 0.0;
        }

        let weighted = c.keyword_weight * self.keyword_strength(item, market)
            + c.recency_weight * self.recency(item.published_at, now)
            + c.trust_weight * self.trust(&item.source_kinds);

        (weighted / total).clamp(0.0, 1.0)
    }

    /// Whether `item` passes the keyword gate for `market`
    pub fn is_relevant(&self, item: &CanonicalItem, market: Market) -> bool {
        !self.config.require_keyword_match
            || item.source_kinds.contains(&AdapterKind::Social)
            || self.keyword_matches(item, market) > 0
    }

    /// Score every relevant item tagged with `market`, dropping those under `min_score`
    pub fn score_market(
        &self,
        items: &[CanonicalItem],
        market: Market,
        now: OffsetDateTime,
    ) -> Vec<ScoredItem> {
        items
            .iter()
            .filter(|item| item.markets.contains(&market))
            .filter(|item| self.is_relevant(item, market))
            .filter_map(|item| {
                let score = self.score(item, market, now);
                (score >= self.config.min_score).then(|| ScoredItem {
                    item: item.clone(),
                    relevance_score: score,
                    qualified_markets: BTreeSet::from([market]),
                    sentiment: None,
                })
            })
            .collect()
    }

    fn keyword_matches(&self, item: &CanonicalItem, market: Market) -> usize {
        let Some(patterns) = self.patterns.get(&market) else {
            return 0;
        };
        let text = format!("{} {}", item.title, item.snippet);
        patterns.iter().map(|p| p.find_iter(&text).count()).sum()
    }

    fn keyword_strength(&self, item: &CanonicalItem, market: Market) -> f64 {
        let cap = self.config.keyword_cap.max(1);
        self.keyword_matches(item, market).min(cap) as f64 / cap as f64
    }

    fn recency(&self, published_at: Option<OffsetDateTime>, now: OffsetDateTime) -> f64 {
        let floor = self.config.recency_floor.clamp(0.0, 1.0);
        let Some(published_at) = published_at else {
            return floor;
        };

        // Future timestamps count as brand new
        let elapsed = (now - published_at).max(time::Duration::ZERO);
        let elapsed_secs = elapsed.as_seconds_f64();
        if elapsed_secs >= self.config.recency_horizon.as_secs_f64() {
            return floor;
        }

        let half_life = self.config.recency_half_life.as_secs_f64().max(1.0);
        0.5_f64.powf(elapsed_secs / half_life).max(floor)
    }

    fn trust(&self, kinds: &BTreeSet<AdapterKind>) -> f64 {
        kinds
            .iter()
            .map(|kind| self.config.trust.get(kind).copied().unwrap_or(0.5))
            .fold(0.0, f64::max)
            .clamp(0.0, 1.0)
    }
}

fn compile_terms(terms: &[String]) -> Vec<Regex> {
    terms
        .iter()
        .filter(|term| !term.trim().is_empty())
        .filter_map(|term| {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(term.trim()));
            match Regex::new(&pattern) {
                Ok(regex) => Some(regex),
                Err(error) => {
                    tracing::warn!(term = %term, error = %error, "Invalid scoring term");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawItem;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-02-10 12:00 UTC);

    fn item(title: &str, kind: AdapterKind, hours_old: Option<i64>) -> CanonicalItem {
        let raw = RawItem::new(
            "src",
            kind,
            title,
            format!("https://n.example/{}", title.len()),
            BTreeSet::from([Market::Us]),
        )
        .with_published_at(hours_old.map(|h| NOW - time::Duration::hours(h)));
        CanonicalItem::from(raw)
    }

    #[test]
    fn score_is_deterministic_and_bounded() {
        let scorer = Scorer::new(ScoringConfig::default());
        let it = item("Fed lifts stock market as inflation cools", AdapterKind::Rss, Some(1));
        let a = scorer.score(&it, Market::Us, NOW);
        let b = scorer.score(&it, Market::Us, NOW);
        assert_eq!(a, b);
        assert!((0.0..=1.0).contains(&a));
    }

    #[test]
    fn recency_never_increases_with_age() {
        let scorer = Scorer::new(ScoringConfig::default());
        let mut last = f64::INFINITY;
        for hours in [0, 1, 3, 6, 12, 24, 48, 71, 72, 200] {
            let s = scorer.score(&item("Dow slips", AdapterKind::Rss, Some(hours)), Market::Us, NOW);
            assert!(s <= last, "score rose at {hours}h");
            last = s;
        }
    }

    #[test]
    fn more_keyword_matches_never_lower_score() {
        let scorer = Scorer::new(ScoringConfig::default());
        let none = scorer.score(&item("Celebrity gossip roundup", AdapterKind::Rss, Some(2)), Market::Us, NOW);
        let one = scorer.score(&item("Celebrity stock roundup", AdapterKind::Rss, Some(2)), Market::Us, NOW);
        let many = scorer.score(
            &item("Fed stock market inflation trade earnings", AdapterKind::Rss, Some(2)),
            Market::Us,
            NOW,
        );
        assert!(none < one);
        assert!(one < many);
    }

    #[test]
    fn keyword_strength_saturates_at_cap() {
        let scorer = Scorer::new(ScoringConfig {
            keyword_cap: 2,
            ..Default::default()
        });
        let two = scorer.score(&item("stock market", AdapterKind::Rss, Some(1)), Market::Us, NOW);
        let four = scorer.score(&item("stock market fed trade", AdapterKind::Rss, Some(1)), Market::Us, NOW);
        assert_eq!(two, four);
    }

    #[test]
    fn terms_match_on_word_boundaries() {
        let scorer = Scorer::new(ScoringConfig::default());
        let partial = scorer.score(&item("Federal stockings", AdapterKind::Rss, Some(1)), Market::Us, NOW);
        let plain = scorer.score(&item("Nothing here", AdapterKind::Rss, Some(1)), Market::Us, NOW);
        assert_eq!(partial, plain);

        let sp = scorer.score(&item("S&P 500 closes higher", AdapterKind::Rss, Some(1)), Market::Us, NOW);
        assert!(sp > plain);
    }

    #[test]
    fn trust_follows_adapter_kind() {
        let scorer = Scorer::new(ScoringConfig::default());
        let news = scorer.score(&item("Fed holds", AdapterKind::NewsService, Some(1)), Market::Us, NOW);
        let social = scorer.score(&item("Fed holds", AdapterKind::Social, Some(1)), Market::Us, NOW);
        assert!(news > social);
    }

    #[test]
    fn unknown_timestamp_gets_floor_and_future_counts_as_new() {
        let scorer = Scorer::new(ScoringConfig::default());
        let unknown = scorer.score(&item("Dow", AdapterKind::Rss, None), Market::Us, NOW);
        let ancient = scorer.score(&item("Dow", AdapterKind::Rss, Some(1000)), Market::Us, NOW);
        assert_eq!(unknown, ancient);

        let future = scorer.score(&item("Dow", AdapterKind::Rss, Some(-3)), Market::Us, NOW);
        let fresh = scorer.score(&item("Dow", AdapterKind::Rss, Some(0)), Market::Us, NOW);
        assert_eq!(future, fresh);
    }

    #[test]
    fn unmatched_items_are_gated_unless_social() {
        let scorer = Scorer::new(ScoringConfig::default());
        let items = vec![
            item("Local weather update", AdapterKind::Rss, Some(1)),
            item("Local weather update from a trader", AdapterKind::Social, Some(1)),
            item("Dow closes higher", AdapterKind::Rss, Some(1)),
        ];

        let scored = scorer.score_market(&items, Market::Us, NOW);
        let titles: Vec<&str> = scored.iter().map(|s| s.item.title.as_str()).collect();
        assert_eq!(titles, vec!["Local weather update from a trader", "Dow closes higher"]);

        let open = Scorer::new(ScoringConfig {
            require_keyword_match: false,
            ..Default::default()
        });
        assert_eq!(open.score_market(&items, Market::Us, NOW).len(), 3);
    }

    #[test]
    fn merged_cluster_with_social_source_passes_gate() {
        let scorer = Scorer::new(ScoringConfig::default());
        let mut merged = item("Weekend plans", AdapterKind::Rss, Some(1));
        merged.source_kinds.insert(AdapterKind::Social);
        assert!(scorer.is_relevant(&merged, Market::Us));
        assert!(!scorer.is_relevant(&item("Weekend plans", AdapterKind::Rss, Some(1)), Market::Us));
    }

    #[test]
    fn score_market_filters_by_tag_and_min_score() {
        let scorer = Scorer::new(ScoringConfig {
            min_score: 0.5,
            ..Default::default()
        });
        let items = vec![
            item("Fed stock market inflation trade earnings", AdapterKind::NewsService, Some(0)),
            item("Celebrity gossip", AdapterKind::Stub, None),
        ];
        let scored = scorer.score_market(&items, Market::Us, NOW);
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].qualified_markets, BTreeSet::from([Market::Us]));

        assert!(scorer.score_market(&items, Market::Japan, NOW).is_empty());
    }
}
