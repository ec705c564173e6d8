//! SQLite snapshot store

use async_trait::async_trait;
use news_pulse_domain::{CacheSnapshot, Market, PersistedEntry, SnapshotError, SnapshotStore};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::collections::BTreeMap;
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

fn db_error(e: sqlx::Error) -> SnapshotError {
    SnapshotError::Database(e.to_string())
}

/// SQLite-backed snapshot store; one row per market plus a metadata row
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
    location: String,
}

impl SqliteSnapshotStore {
    /// Open (or create) the database at `db_path`
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(db_error)?;

        let store = Self {
            pool,
            location: format!("sqlite:{}", db_path.display()),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// In-memory database (for testing)
    pub async fn in_memory() -> Result<Self, SnapshotError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_error)?;

        let store = Self {
            pool,
            location: "sqlite::memory:".to_string(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), SnapshotError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshot_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL,
                taken_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshot_markets (
                market TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                last_refreshed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }
}

fn parse_time(raw: &str) -> Result<OffsetDateTime, SnapshotError> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|e| SnapshotError::Corrupt(e.to_string()))
}

fn format_time(at: OffsetDateTime) -> Result<String, SnapshotError> {
    at.format(&Rfc3339)
        .map_err(|e| SnapshotError::Corrupt(e.to_string()))
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn load(&self) -> Result<Option<CacheSnapshot>, SnapshotError> {
        let meta: Option<(i64, String)> =
            sqlx::query_as("SELECT version, taken_at FROM snapshot_meta WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

        let Some((version, taken_at)) = meta else {
            return Ok(None);
        };
        let version = u32::try_from(version)
            .ok()
            .filter(|v| *v == CacheSnapshot::FORMAT_VERSION)
            .ok_or_else(|| {
                SnapshotError::Corrupt(format!("unsupported snapshot version {version}"))
            })?;

        let rows: Vec<(String, String, String)> =
            sqlx::query_as("SELECT market, payload, last_refreshed_at FROM snapshot_markets")
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?;

        let mut markets = BTreeMap::new();
        for (market, payload, last_refreshed_at) in rows {
            let market: Market = market
                .parse()
                .map_err(|e| SnapshotError::Corrupt(format!("{e}")))?;
            let items = serde_json::from_str(&payload)
                .map_err(|e| SnapshotError::Corrupt(format!("{market}: {e}")))?;
            markets.insert(
                market,
                PersistedEntry {
                    items,
                    last_refreshed_at: parse_time(&last_refreshed_at)?,
                },
            );
        }

        Ok(Some(CacheSnapshot {
            version,
            taken_at: parse_time(&taken_at)?,
            markets,
        }))
    }

    async fn save(&self, snapshot: &CacheSnapshot) -> Result<(), SnapshotError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query(
            r#"
            INSERT INTO snapshot_meta (id, version, taken_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                version = excluded.version,
                taken_at = excluded.taken_at
            "#,
        )
        .bind(i64::from(snapshot.version))
        .bind(format_time(snapshot.taken_at)?)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        let existing: Vec<(String,)> = sqlx::query_as("SELECT market FROM snapshot_markets")
            .fetch_all(&mut *tx)
            .await
            .map_err(db_error)?;
        for (market,) in existing {
            let kept = market
                .parse::<Market>()
                .is_ok_and(|m| snapshot.markets.contains_key(&m));
            if !kept {
                sqlx::query("DELETE FROM snapshot_markets WHERE market = ?")
                    .bind(&market)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error)?;
            }
        }

        for (market, entry) in &snapshot.markets {
            let payload = serde_json::to_string(&entry.items)
                .map_err(|e| SnapshotError::Corrupt(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO snapshot_markets (market, payload, last_refreshed_at)
                VALUES (?, ?, ?)
                ON CONFLICT(market) DO UPDATE SET
                    payload = excluded.payload,
                    last_refreshed_at = excluded.last_refreshed_at
                "#,
            )
            .bind(market.as_str())
            .bind(&payload)
            .bind(format_time(entry.last_refreshed_at)?)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.location.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot_fs::tests::{sample_snapshot, scored_snapshot, scores};
    use tempfile::TempDir;

    #[tokio::test]
    async fn empty_database_loads_as_none() {
        let store = SqliteSnapshotStore::in_memory().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_roundtrip() {
        let store = SqliteSnapshotStore::in_memory().await.unwrap();
        store.save(&sample_snapshot()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(sample_snapshot()));
    }

    #[tokio::test]
    async fn scores_survive_bit_for_bit() {
        let store = SqliteSnapshotStore::in_memory().await.unwrap();
        let snapshot = scored_snapshot();

        store.save(&snapshot).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(scores(&loaded), scores(&snapshot));
    }

    #[tokio::test]
    async fn save_replaces_markets_no_longer_present() {
        let store = SqliteSnapshotStore::in_memory().await.unwrap();

        let mut wide = sample_snapshot();
        let japan = wide.markets[&Market::Japan].clone();
        wide.markets.insert(Market::Korea, japan);
        store.save(&wide).await.unwrap();

        store.save(&sample_snapshot()).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.markets.keys().copied().collect::<Vec<_>>(), vec![Market::Japan]);
    }

    #[tokio::test]
    async fn unknown_version_is_corrupt() {
        let store = SqliteSnapshotStore::in_memory().await.unwrap();
        let mut snapshot = sample_snapshot();
        snapshot.version = 7;
        store.save(&snapshot).await.unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt(_)));
    }

    #[tokio::test]
    async fn file_database_persists_across_handles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("snapshot.db");

        let store = SqliteSnapshotStore::new(&path).await.unwrap();
        store.save(&sample_snapshot()).await.unwrap();
        drop(store);

        let reopened = SqliteSnapshotStore::new(&path).await.unwrap();
        assert_eq!(reopened.load().await.unwrap(), Some(sample_snapshot()));
        assert!(reopened.describe().ends_with("snapshot.db"));
    }
}
