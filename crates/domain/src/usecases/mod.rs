//! Application use cases / business logic

pub mod cache;
pub mod circuit;
pub mod dedup;
pub mod health;
pub mod orchestrator;
pub mod scoring;
pub mod sentiment;
pub mod service;

pub use cache::{CacheConfig, CacheRead, CacheStore};
pub use circuit::{CircuitConfig, CircuitTracker, Permit};
pub use dedup::{DedupConfig, Deduplicator};
pub use health::HealthMonitor;
pub use orchestrator::{Orchestrator, OrchestratorConfig, PipelineError};
pub use scoring::{Scorer, ScoringConfig};
pub use sentiment::SentimentAnalyzer;
pub use service::{NewsService, PipelineConfig, RefreshReport};
