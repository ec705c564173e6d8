//! news-pulse domain crate
//!
//! This crate contains the ingestion pipeline core following hexagonal architecture:
//! - `model`: Domain entities and value objects
//! - `ports`: Trait definitions for external dependencies (adapters, snapshot stores, clock)
//! - `usecases`: Circuit tracker, orchestrator, dedup, scoring, cache, health and the news service
//! - `text`: Text and URL normalization

pub mod model;
pub mod ports;
pub mod text;
pub mod usecases;

pub use model::*;
pub use ports::*;
