//! JSON file snapshot store

use async_trait::async_trait;
use news_pulse_domain::{CacheSnapshot, SnapshotError, SnapshotStore};
use std::path::{Path, PathBuf};

/// Snapshot kept in one JSON file, replaced atomically on save
pub struct JsonFileSnapshotStore {
    path: PathBuf,
}

impl JsonFileSnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonFileSnapshotStore {
    async fn load(&self) -> Result<Option<CacheSnapshot>, SnapshotError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SnapshotError::Io(e)),
        };

        let snapshot: CacheSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| SnapshotError::Corrupt(format!("{}: {e}", self.path.display())))?;
        if snapshot.version != CacheSnapshot::FORMAT_VERSION {
            return Err(SnapshotError::Corrupt(format!(
                "{}: unsupported snapshot version {}",
                self.path.display(),
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &CacheSnapshot) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| SnapshotError::Corrupt(e.to_string()))?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, json).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        tracing::debug!(path = %self.path.display(), markets = snapshot.markets.len(), "Snapshot written");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use news_pulse_domain::{
        AdapterKind, CanonicalItem, Market, PersistedEntry, RawItem, ScoredItem, Sentiment,
        SentimentLabel,
    };
    use std::collections::{BTreeMap, BTreeSet};
    use tempfile::TempDir;
    use time::macros::datetime;

    pub(crate) fn sample_snapshot() -> CacheSnapshot {
        let raw = RawItem::new(
            "wire",
            AdapterKind::Rss,
            "Nikkei climbs on BOJ stance",
            "https://news.example/nikkei",
            BTreeSet::from([Market::Japan]),
        )
        .with_published_at(Some(datetime!(2026-03-02 06:00 UTC)));
        let item = ScoredItem {
            item: CanonicalItem::from(raw),
            relevance_score: 0.75,
            qualified_markets: BTreeSet::from([Market::Japan]),
            sentiment: Some(Sentiment {
                label: SentimentLabel::Positive,
                score: 0.4404,
                positive: 0.32,
                negative: 0.0,
                neutral: 0.68,
            }),
        };

        CacheSnapshot {
            version: CacheSnapshot::FORMAT_VERSION,
            taken_at: datetime!(2026-03-02 07:00 UTC),
            markets: BTreeMap::from([(
                Market::Japan,
                PersistedEntry {
                    items: vec![item],
                    last_refreshed_at: datetime!(2026-03-02 06:55 UTC),
                },
            )]),
        }
    }

    /// Scores shaped like the scorer's output: weighted keyword, decayed
    /// recency and trust terms, which rarely have short decimal forms
    pub(crate) fn scored_snapshot() -> CacheSnapshot {
        let mut items: Vec<ScoredItem> = (0..400u32)
            .map(|i| {
                let keyword = f64::from(i % 6) / 5.0;
                let recency = 0.5_f64.powf(f64::from(i * 97) / 21_600.0).max(0.05);
                let trust = [1.0, 0.9, 0.6, 0.5][(i % 4) as usize];
                let score = (0.5 * keyword.min(1.0) + 0.3 * recency + 0.2 * trust) / 1.0;
                let raw = RawItem::new(
                    "wire",
                    AdapterKind::Rss,
                    format!("Headline {i}"),
                    format!("https://news.example/{i}"),
                    BTreeSet::from([Market::Us]),
                );
                ScoredItem {
                    item: CanonicalItem::from(raw),
                    relevance_score: score,
                    qualified_markets: BTreeSet::from([Market::Us]),
                    sentiment: None,
                }
            })
            .collect();
        items[0].relevance_score = 0.44871457832296957;
        items[1].relevance_score = 0.1 + 0.2;

        CacheSnapshot {
            version: CacheSnapshot::FORMAT_VERSION,
            taken_at: datetime!(2026-03-02 07:00 UTC),
            markets: BTreeMap::from([(
                Market::Us,
                PersistedEntry {
                    items,
                    last_refreshed_at: datetime!(2026-03-02 06:55 UTC),
                },
            )]),
        }
    }

    pub(crate) fn scores(snapshot: &CacheSnapshot) -> Vec<u64> {
        snapshot.markets[&Market::Us]
            .items
            .iter()
            .map(|i| i.relevance_score.to_bits())
            .collect()
    }

    #[tokio::test]
    async fn scores_survive_bit_for_bit() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileSnapshotStore::new(dir.path().join("snapshot.json"));
        let snapshot = scored_snapshot();

        store.save(&snapshot).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(scores(&loaded), scores(&snapshot));
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileSnapshotStore::new(dir.path().join("snapshot.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("snapshot.json");
        let store = JsonFileSnapshotStore::new(&path);

        store.save(&sample_snapshot()).await.unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("state").join("snapshot.json.tmp").exists());
        assert_eq!(store.load().await.unwrap(), Some(sample_snapshot()));
    }

    #[tokio::test]
    async fn garbage_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonFileSnapshotStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt(_)));
    }

    #[tokio::test]
    async fn unknown_version_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.json");
        let mut snapshot = sample_snapshot();
        snapshot.version = 99;
        std::fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

        let err = JsonFileSnapshotStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt(msg) if msg.contains("99")));
    }
}
