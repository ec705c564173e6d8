//! news-pulse adapters crate
//!
//! This crate contains infrastructure adapters implementing the domain ports:
//! - `sources`: RSS, news-service, public social page and stub adapters
//! - `factory`: adapter registry keyed by adapter type
//! - `snapshot`: JSON file, SQLite and in-memory warm-start stores
//! - `legacy`: compatibility shim for older call sites

mod http;
mod news_service;
mod rss;
mod snapshot_fs;
mod snapshot_memory;
mod snapshot_sqlite;
mod social;
mod stub;
mod throttle;

pub mod factory;
pub mod legacy;

/// Re-exports for source adapters
pub mod sources {
    pub use crate::news_service::{NewsServiceAdapter, NewsServiceParams};
    pub use crate::rss::{FeedSource, RssAdapter, RssParams};
    pub use crate::social::{HttpPageRenderer, PageRenderer, RenderedPage, SocialAdapter, SocialParams};
    pub use crate::stub::{StubAdapter, StubItem, StubParams};
}

/// Re-exports for snapshot stores
pub mod snapshot {
    pub use crate::snapshot_fs::JsonFileSnapshotStore;
    pub use crate::snapshot_memory::InMemorySnapshotStore;
    pub use crate::snapshot_sqlite::SqliteSnapshotStore;
}
