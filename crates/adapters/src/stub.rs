//! Stub adapter serving items straight from configuration

use async_trait::async_trait;
use news_pulse_domain::{
    AdapterKind, FetchError, FetchErrorKind, Market, NewsAdapter, RawItem, cap_per_market,
};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Clone, Deserialize)]
pub struct StubItem {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub author: Option<String>,
    /// Defaults to the adapter's markets
    #[serde(default)]
    pub markets: BTreeSet<Market>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StubParams {
    #[serde(default)]
    pub items: Vec<StubItem>,
    /// Fail every call with this kind
    #[serde(default)]
    pub fail_with: Option<FetchErrorKind>,
    /// Simulated latency
    #[serde(default)]
    pub delay_ms: u64,
}

pub struct StubAdapter {
    id: String,
    markets: BTreeSet<Market>,
    params: StubParams,
}

impl StubAdapter {
    pub fn new(id: impl Into<String>, markets: BTreeSet<Market>, params: StubParams) -> Self {
        Self {
            id: id.into(),
            markets,
            params,
        }
    }
}

#[async_trait]
impl NewsAdapter for StubAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Stub
    }

    fn markets(&self) -> &BTreeSet<Market> {
        &self.markets
    }

    async fn fetch(
        &self,
        markets: &BTreeSet<Market>,
        limit: usize,
    ) -> Result<Vec<RawItem>, FetchError> {
        if self.params.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.params.delay_ms)).await;
        }
        if let Some(kind) = self.params.fail_with {
            return Err(FetchError::new(kind, format!("stub '{}' configured to fail", self.id)));
        }

        let items = self
            .params
            .items
            .iter()
            .filter_map(|item| {
                let own = if item.markets.is_empty() {
                    &self.markets
                } else {
                    &item.markets
                };
                let tags: BTreeSet<Market> = own.intersection(markets).copied().collect();
                if tags.is_empty() {
                    return None;
                }
                Some(
                    RawItem::new(self.id.clone(), AdapterKind::Stub, &item.title, &item.url, tags)
                        .with_snippet(&item.snippet)
                        .with_author(item.author.clone())
                        .with_published_at(item.published_at),
                )
            })
            .collect();

        Ok(cap_per_market(items, markets, limit))
    }
}
