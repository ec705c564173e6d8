//! Dedup engine - collapses cross-source duplicates into canonical items

use std::collections::HashMap;

use crate::model::{CanonicalItem, Fingerprint, RawItem};

/// Dedup configuration
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Extra snippet characters a later item needs to take over the representative fields
    pub min_snippet_gain: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            min_snippet_gain: 40,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    config: DedupConfig,
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    /// Group raw items by fingerprint, keeping first-seen cluster order
    pub fn dedup(&self, items: Vec<RawItem>) -> Vec<CanonicalItem> {
        self.merge(items.into_iter().map(CanonicalItem::from))
    }

    /// Merge canonical items sharing a fingerprint; a no-op on deduplicated input
    pub fn merge(&self, items: impl IntoIterator<Item = CanonicalItem>) -> Vec<CanonicalItem> {
        let mut clusters: Vec<CanonicalItem> = Vec::new();
        let mut index: HashMap<Fingerprint, usize> = HashMap::new();

        for item in items {
            match index.get(&item.fingerprint) {
                Some(&pos) => self.absorb(&mut clusters[pos], item),
                None => {
                    index.insert(item.fingerprint.clone(), clusters.len());
                    clusters.push(item);
                }
            }
        }

        clusters
    }

    fn absorb(&self, rep: &mut CanonicalItem, other: CanonicalItem) {
        if rep.title != other.title || rep.url != other.url {
            tracing::debug!(
                fingerprint = %rep.fingerprint,
                kept = %rep.url,
                other = %other.url,
                "Merging items with differing raw fields"
            );
        }

        let rep_len = rep.snippet.chars().count();
        let other_len = other.snippet.chars().count();

        rep.published_at = match (rep.published_at, other.published_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        rep.sources.extend(other.sources);
        rep.source_kinds.extend(other.source_kinds);
        rep.markets.extend(other.markets);

        if other_len > rep_len + self.config.min_snippet_gain {
            rep.source = other.source;
            rep.source_kind = other.source_kind;
            rep.title = other.title;
            rep.url = other.url;
            rep.snippet = other.snippet;
            if other.author.is_some() {
                rep.author = other.author;
            }
        } else if rep.author.is_none() {
            rep.author = other.author;
        }
    }
}
