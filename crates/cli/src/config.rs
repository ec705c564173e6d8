//! Configuration loading and management

use anyhow::{Context, Result};
use news_pulse_domain::usecases::{
    CacheConfig, CircuitConfig, DedupConfig, OrchestratorConfig, PipelineConfig, ScoringConfig,
};
use news_pulse_domain::{AdapterKind, ConfigError, Market, SourceDescriptor};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex")
});

pub const DEFAULT_CONFIG_PATH: &str = "./news-pulse.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub circuit: CircuitSection,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub dedup: DedupSection,

    #[serde(default)]
    pub scoring: ScoringSection,

    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Markets queried by default; empty means every market a source serves
    #[serde(default)]
    pub markets: Vec<String>,

    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Items requested from each adapter per run
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_run_deadline")]
    pub run_deadline_secs: u64,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// json, sqlite, memory or none
    #[serde(default = "default_snapshot_backend")]
    pub snapshot_backend: String,

    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSection {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_base_backoff")]
    pub base_backoff_secs: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    #[serde(default = "default_staleness")]
    pub staleness_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupSection {
    #[serde(default = "default_min_snippet_gain")]
    pub min_snippet_gain: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringSection {
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,

    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,

    #[serde(default = "default_trust_weight")]
    pub trust_weight: f64,

    #[serde(default = "default_keyword_cap")]
    pub keyword_cap: usize,

    #[serde(default = "default_half_life_hours")]
    pub half_life_hours: f64,

    #[serde(default = "default_horizon_hours")]
    pub horizon_hours: f64,

    #[serde(default = "default_recency_floor")]
    pub recency_floor: f64,

    #[serde(default)]
    pub min_score: f64,

    /// Drop items with no market term unless a social source reported them
    #[serde(default = "default_true")]
    pub require_keyword_match: bool,

    /// Trust per adapter type; unlisted types keep the built-in weight
    #[serde(default)]
    pub trust: BTreeMap<String, f64>,

    /// Term list per market; replaces the built-in list for that market
    #[serde(default)]
    pub terms: BTreeMap<String, Vec<String>>,
}

/// One `[sources.<name>]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub adapter_type: String,

    #[serde(default)]
    pub markets: Vec<String>,

    #[serde(default)]
    pub poll_interval_secs: Option<u64>,

    #[serde(default)]
    pub params: serde_json::Value,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_limit() -> usize {
    20
}

fn default_fetch_limit() -> usize {
    50
}

fn default_max_concurrent() -> usize {
    8
}

fn default_call_timeout() -> u64 {
    20
}

fn default_run_deadline() -> u64 {
    45
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_snapshot_backend() -> String {
    "json".to_string()
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("./news-pulse-snapshot.json")
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_base_backoff() -> u64 {
    30
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_backoff() -> u64 {
    1800
}

fn default_max_items() -> usize {
    200
}

fn default_staleness() -> u64 {
    900
}

fn default_min_snippet_gain() -> usize {
    40
}

fn default_keyword_weight() -> f64 {
    0.5
}

fn default_recency_weight() -> f64 {
    0.3
}

fn default_trust_weight() -> f64 {
    0.2
}

fn default_keyword_cap() -> usize {
    5
}

fn default_half_life_hours() -> f64 {
    6.0
}

fn default_horizon_hours() -> f64 {
    72.0
}

fn default_recency_floor() -> f64 {
    0.05
}

fn default_true() -> bool {
    true
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            markets: vec![],
            default_limit: default_limit(),
            fetch_limit: default_fetch_limit(),
            max_concurrent: default_max_concurrent(),
            call_timeout_secs: default_call_timeout(),
            run_deadline_secs: default_run_deadline(),
            refresh_interval_secs: default_refresh_interval(),
            snapshot_backend: default_snapshot_backend(),
            snapshot_path: default_snapshot_path(),
        }
    }
}

impl Default for CircuitSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            base_backoff_secs: default_base_backoff(),
            backoff_factor: default_backoff_factor(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            staleness_secs: default_staleness(),
        }
    }
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            min_snippet_gain: default_min_snippet_gain(),
        }
    }
}

impl Default for ScoringSection {
    fn default() -> Self {
        Self {
            keyword_weight: default_keyword_weight(),
            recency_weight: default_recency_weight(),
            trust_weight: default_trust_weight(),
            keyword_cap: default_keyword_cap(),
            half_life_hours: default_half_life_hours(),
            horizon_hours: default_horizon_hours(),
            recency_floor: default_recency_floor(),
            min_score: 0.0,
            require_keyword_match: true,
            trust: BTreeMap::new(),
            terms: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        let path = config_path.unwrap_or(&default_path);

        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        } else if config_path.is_some() {
            anyhow::bail!("Config file not found: {}", path.display());
        }

        builder = builder.add_source(
            config::Environment::with_prefix("NEWS_PULSE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Markets queried when the caller names none; empty means every served market
    pub fn default_markets(&self) -> Result<BTreeSet<Market>, ConfigError> {
        parse_markets(&self.general.markets, "general.markets")
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        let general = &self.general;
        let scoring = &self.scoring;

        if scoring.keyword_weight < 0.0 || scoring.recency_weight < 0.0 || scoring.trust_weight < 0.0 {
            return Err(ConfigError::Invalid("scoring weights must be non-negative".to_string()));
        }
        if !(0.0..=1.0).contains(&scoring.recency_floor) {
            return Err(ConfigError::Invalid("scoring.recency_floor must be within [0, 1]".to_string()));
        }

        let mut scoring_config = ScoringConfig {
            keyword_weight: scoring.keyword_weight,
            recency_weight: scoring.recency_weight,
            trust_weight: scoring.trust_weight,
            keyword_cap: scoring.keyword_cap,
            recency_half_life: hours(scoring.half_life_hours, "scoring.half_life_hours")?,
            recency_horizon: hours(scoring.horizon_hours, "scoring.horizon_hours")?,
            recency_floor: scoring.recency_floor,
            min_score: scoring.min_score,
            require_keyword_match: scoring.require_keyword_match,
            ..ScoringConfig::default()
        };

        for (kind, weight) in &scoring.trust {
            let kind = parse_kind(kind)?;
            scoring_config.trust.insert(kind, weight.clamp(0.0, 1.0));
        }
        for (market, terms) in &scoring.terms {
            let market: Market = market
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("scoring.terms: {e}")))?;
            scoring_config.market_terms.insert(market, terms.clone());
        }

        Ok(PipelineConfig {
            orchestrator: OrchestratorConfig {
                max_concurrent: general.max_concurrent.max(1),
                call_timeout: Duration::from_secs(general.call_timeout_secs.max(1)),
                run_deadline: Duration::from_secs(general.run_deadline_secs.max(1)),
                poll_intervals: self
                    .sources
                    .iter()
                    .filter_map(|(name, s)| {
                        s.poll_interval_secs
                            .filter(|secs| *secs > 0)
                            .map(|secs| (name.clone(), Duration::from_secs(secs)))
                    })
                    .collect(),
            },
            circuit: CircuitConfig {
                failure_threshold: self.circuit.failure_threshold.max(1),
                base_backoff: Duration::from_secs(self.circuit.base_backoff_secs),
                backoff_factor: self.circuit.backoff_factor,
                max_backoff: Duration::from_secs(self.circuit.max_backoff_secs),
                // A probe is settled by the end of its run unless the caller walked away
                probe_lease: Duration::from_secs(general.run_deadline_secs.max(1)),
            },
            cache: CacheConfig {
                max_items: self.cache.max_items,
                staleness: Duration::from_secs(self.cache.staleness_secs),
            },
            dedup: DedupConfig {
                min_snippet_gain: self.dedup.min_snippet_gain,
            },
            scoring: scoring_config,
            fetch_limit: general.fetch_limit,
        })
    }

    /// Source descriptors with `${VAR}` placeholders resolved
    pub fn source_descriptors(&self) -> Result<Vec<SourceDescriptor>, ConfigError> {
        self.sources
            .iter()
            .map(|(name, source)| {
                let markets = parse_markets(&source.markets, name)?;
                if markets.is_empty() {
                    return Err(ConfigError::NoMarkets(name.clone()));
                }
                Ok(SourceDescriptor {
                    name: name.clone(),
                    adapter_type: source.adapter_type.clone(),
                    markets,
                    params: substitute_env(source.params.clone()),
                })
            })
            .collect()
    }

    /// Serve cadence: the refresh interval, lowered by any faster source poll interval
    pub fn refresh_interval(&self) -> Duration {
        let base = self.general.refresh_interval_secs.max(1);
        let fastest = self
            .sources
            .values()
            .filter_map(|s| s.poll_interval_secs)
            .filter(|s| *s > 0)
            .min()
            .unwrap_or(base);
        Duration::from_secs(base.min(fastest))
    }

    /// Generate example configuration as TOML string
    pub fn example_toml() -> String {
        r#"# news-pulse configuration
#
# Every key can be overridden from the environment, e.g.
#   NEWS_PULSE__GENERAL__LOG_LEVEL=debug

[general]
log_level = "info"
# Markets queried when none are given; empty means every market a source serves
markets = ["global", "us", "a_share"]
default_limit = 20
fetch_limit = 50
max_concurrent = 8
call_timeout_secs = 20
run_deadline_secs = 45
refresh_interval_secs = 300
snapshot_backend = "json"  # json, sqlite, memory, none
snapshot_path = "./news-pulse-snapshot.json"

[circuit]
failure_threshold = 3
base_backoff_secs = 30
backoff_factor = 2.0
max_backoff_secs = 1800

[cache]
max_items = 200
staleness_secs = 900

[dedup]
min_snippet_gain = 40

[scoring]
keyword_weight = 0.5
recency_weight = 0.3
trust_weight = 0.2
keyword_cap = 5
half_life_hours = 6.0
horizon_hours = 72.0
recency_floor = 0.05
min_score = 0.0
require_keyword_match = true

[scoring.trust]
news_service = 1.0
rss = 0.9
social = 0.6
stub = 0.5

# [scoring.terms]
# crypto = ["bitcoin", "ethereum", "stablecoin"]

# Offline source, handy for trying things out
[sources.demo]
type = "stub"
markets = ["global", "us"]

[[sources.demo.params.items]]
title = "Fed holds rates steady as inflation cools"
url = "https://example.com/fed-holds"
snippet = "Markets rallied after the Fed signalled patience on rate cuts."

[sources.wire]
type = "rss"
markets = ["us"]
poll_interval_secs = 300

[[sources.wire.params.feeds]]
url = "https://feeds.content.dowjones.io/public/rss/mw_topstories"
limit = 25

[sources.newsapi]
type = "news_service"
markets = ["global", "us", "a_share"]

[sources.newsapi.params]
api_key = "${NEWSAPI_KEY}"
default_sources = "reuters,bloomberg,the-wall-street-journal"
page_size = 25
pages = 2
lookback_days = 2

# [sources.desk]
# type = "social"
# markets = ["japan", "korea"]
#
# [sources.desk.params]
# handles = ["nikkei", "kedglobal"]
"#
        .to_string()
    }
}

fn parse_markets(raw: &[String], context: &str) -> Result<BTreeSet<Market>, ConfigError> {
    raw.iter()
        .map(|m| {
            m.parse::<Market>()
                .map_err(|e| ConfigError::Invalid(format!("{context}: {e}")))
        })
        .collect()
}

fn parse_kind(raw: &str) -> Result<AdapterKind, ConfigError> {
    [
        AdapterKind::Rss,
        AdapterKind::NewsService,
        AdapterKind::Social,
        AdapterKind::Stub,
    ]
    .into_iter()
    .find(|k| k.as_str() == raw.trim())
    .ok_or_else(|| ConfigError::Invalid(format!("scoring.trust: unknown adapter type '{raw}'")))
}

fn hours(value: f64, key: &str) -> Result<Duration, ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::Invalid(format!("{key} must be positive")));
    }
    Duration::try_from_secs_f64(value * 3600.0)
        .map_err(|e| ConfigError::Invalid(format!("{key} is out of range: {e}")))
}

/// Replace `${VAR}` in every string of `value`; unset variables become empty
fn substitute_env(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;

    match value {
        Value::String(s) => Value::String(
            PLACEHOLDER
                .replace_all(&s, |caps: &regex::Captures<'_>| {
                    let name = &caps[1];
                    std::env::var(name).unwrap_or_else(|_| {
                        tracing::warn!(variable = %name, "Environment variable not set, substituting empty string");
                        String::new()
                    })
                })
                .into_owned(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(substitute_env).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, substitute_env(v)))
                .collect(),
        ),
        other => other,
    }
}
