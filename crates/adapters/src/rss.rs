//! RSS / Atom feed adapter

use async_trait::async_trait;
use news_pulse_domain::{AdapterKind, FetchError, Market, NewsAdapter, RawItem, cap_per_market};
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::http::{build_client, check_status, send_error};

/// One feed inside an RSS adapter
#[derive(Debug, Clone, Deserialize)]
pub struct FeedSource {
    pub url: String,
    /// Defaults to the adapter's markets
    #[serde(default)]
    pub markets: BTreeSet<Market>,
    /// Max entries taken from this feed per fetch
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RssParams {
    pub feeds: Vec<FeedSource>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Default)]
struct CachedFeed {
    etag: Option<String>,
    last_modified: Option<String>,
    items: Vec<RawItem>,
}

/// Polls a set of syndication feeds with conditional GETs
pub struct RssAdapter {
    id: String,
    markets: BTreeSet<Market>,
    feeds: Vec<FeedSource>,
    timeout: Duration,
    client: Client,
    cache: Mutex<HashMap<String, CachedFeed>>,
}

impl RssAdapter {
    pub fn new(
        id: impl Into<String>,
        markets: BTreeSet<Market>,
        params: RssParams,
    ) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_secs(params.timeout_secs.max(1));
        let feeds = params
            .feeds
            .into_iter()
            .map(|mut feed| {
                if feed.markets.is_empty() {
                    feed.markets = markets.clone();
                }
                feed
            })
            .collect();

        Ok(Self {
            id: id.into(),
            markets,
            feeds,
            timeout,
            client: build_client(timeout)?,
            cache: Mutex::new(HashMap::new()),
        })
    }

    async fn fetch_feed(&self, feed: &FeedSource) -> Result<Vec<RawItem>, FetchError> {
        let (etag, last_modified) = {
            let cache = self.cache.lock().await;
            cache
                .get(&feed.url)
                .map(|c| (c.etag.clone(), c.last_modified.clone()))
                .unwrap_or_default()
        };

        let mut request = self.client.get(&feed.url);
        if let Some(etag) = &etag {
            request = request.header(header::IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &last_modified {
            request = request.header(header::IF_MODIFIED_SINCE, last_modified);
        }

        let response = check_status(request.send().await.map_err(send_error)?).await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            tracing::debug!(adapter = %self.id, feed = %feed.url, "Feed not modified");
            let cache = self.cache.lock().await;
            return Ok(cache
                .get(&feed.url)
                .map(|c| c.items.clone())
                .unwrap_or_default());
        }

        let header_value = |name: header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let new_etag = header_value(header::ETAG);
        let new_last_modified = header_value(header::LAST_MODIFIED);

        let body = response.bytes().await.map_err(send_error)?;
        let items = self.parse_feed(feed, &body)?;

        let mut cache = self.cache.lock().await;
        cache.insert(
            feed.url.clone(),
            CachedFeed {
                etag: new_etag,
                last_modified: new_last_modified,
                items: items.clone(),
            },
        );

        Ok(items)
    }

    fn parse_feed(&self, feed: &FeedSource, body: &[u8]) -> Result<Vec<RawItem>, FetchError> {
        let parsed = feed_rs::parser::parse(body)
            .map_err(|e| FetchError::parse(format!("{}: {e}", feed.url)))?;

        let mut skipped = 0usize;
        let items: Vec<RawItem> = parsed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let title = entry.title.map(|t| t.content).unwrap_or_default();
                let link = entry.links.first().map(|l| l.href.clone());
                let Some(link) = link.filter(|l| !l.trim().is_empty()) else {
                    skipped += 1;
                    return None;
                };
                if title.trim().is_empty() {
                    skipped += 1;
                    return None;
                }

                let snippet = entry
                    .summary
                    .map(|s| s.content)
                    .or_else(|| entry.content.and_then(|c| c.body))
                    .unwrap_or_default();
                let published = entry
                    .published
                    .or(entry.updated)
                    .and_then(|dt| OffsetDateTime::from_unix_timestamp(dt.timestamp()).ok());
                let author = entry.authors.first().map(|a| a.name.clone());

                Some(
                    RawItem::new(
                        self.id.clone(),
                        AdapterKind::Rss,
                        title,
                        link,
                        feed.markets.clone(),
                    )
                    .with_snippet(snippet)
                    .with_author(author)
                    .with_published_at(published),
                )
            })
            .take(feed.limit.unwrap_or(usize::MAX))
            .collect();

        if skipped > 0 {
            tracing::debug!(adapter = %self.id, feed = %feed.url, skipped, "Skipped malformed entries");
        }
        Ok(items)
    }
}

#[async_trait]
impl NewsAdapter for RssAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Rss
    }

    fn markets(&self) -> &BTreeSet<Market> {
        &self.markets
    }

    fn recommended_timeout(&self) -> Duration {
        self.timeout + Duration::from_secs(5)
    }

    async fn fetch(
        &self,
        markets: &BTreeSet<Market>,
        limit: usize,
    ) -> Result<Vec<RawItem>, FetchError> {
        let mut items = Vec::new();
        let mut first_error = None;
        let mut succeeded = 0usize;

        for feed in self.feeds.iter().filter(|f| !f.markets.is_disjoint(markets)) {
            match self.fetch_feed(feed).await {
                Ok(feed_items) => {
                    succeeded += 1;
                    items.extend(feed_items);
                }
                Err(error) => {
                    tracing::warn!(adapter = %self.id, feed = %feed.url, error = %error, "Feed fetch failed");
                    first_error.get_or_insert(error);
                }
            }
        }

        // Only a total failure fails the adapter
        if succeeded == 0 {
            if let Some(error) = first_error {
                return Err(error);
            }
        }

        Ok(cap_per_market(items, markets, limit))
    }
}
