//! In-memory snapshot store for tests and offline runs

use async_trait::async_trait;
use news_pulse_domain::{CacheSnapshot, SnapshotError, SnapshotStore};
use std::sync::RwLock;

#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshot: RwLock<Option<CacheSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `snapshot`
    pub fn with_snapshot(snapshot: CacheSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(Some(snapshot)),
        }
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(&self) -> Result<Option<CacheSnapshot>, SnapshotError> {
        let snapshot = self
            .snapshot
            .read()
            .map_err(|e| SnapshotError::Database(e.to_string()))?;
        Ok(snapshot.clone())
    }

    async fn save(&self, snapshot: &CacheSnapshot) -> Result<(), SnapshotError> {
        let mut slot = self
            .snapshot
            .write()
            .map_err(|e| SnapshotError::Database(e.to_string()))?;
        *slot = Some(snapshot.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
