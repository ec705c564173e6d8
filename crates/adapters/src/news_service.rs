//! News-service adapter for NewsAPI-compatible `everything` endpoints

use async_trait::async_trait;
use news_pulse_domain::{AdapterKind, FetchError, Market, NewsAdapter, RawItem, cap_per_market};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

use crate::http::{build_client, check_status, send_error};
use crate::throttle::Throttle;

#[derive(Debug, Deserialize)]
pub struct NewsServiceParams {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Empty keys fail at fetch time rather than at startup
    #[serde(default = "empty_secret", deserialize_with = "deserialize_secret")]
    pub api_key: SecretString,
    /// Comma-separated provider source ids per market
    #[serde(default)]
    pub sources_by_market: BTreeMap<Market, String>,
    /// Used for markets absent from `sources_by_market`
    #[serde(default)]
    pub default_sources: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_pages")]
    pub pages: usize,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://newsapi.org/v2/everything".to_string()
}

fn empty_secret() -> SecretString {
    SecretString::new(String::new().into())
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(SecretString::new(raw.into()))
}

fn default_language() -> String {
    "en".to_string()
}

fn default_page_size() -> usize {
    25
}

fn default_pages() -> usize {
    2
}

fn default_lookback_days() -> i64 {
    2
}

fn default_min_interval_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    15
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EverythingResponse {
    status: String,
    #[serde(default)]
    total_results: Option<usize>,
    #[serde(default)]
    articles: Vec<Article>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Article {
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    author: Option<String>,
    published_at: Option<String>,
}

pub struct NewsServiceAdapter {
    id: String,
    markets: BTreeSet<Market>,
    params: NewsServiceParams,
    client: Client,
    throttle: Throttle,
}

impl NewsServiceAdapter {
    pub fn new(
        id: impl Into<String>,
        markets: BTreeSet<Market>,
        params: NewsServiceParams,
    ) -> Result<Self, reqwest::Error> {
        let client = build_client(Duration::from_secs(params.timeout_secs.max(1)))?;
        let throttle = Throttle::new(Duration::from_millis(params.min_interval_ms));
        Ok(Self {
            id: id.into(),
            markets,
            params,
            client,
            throttle,
        })
    }

    fn sources_for(&self, market: Market) -> Option<&str> {
        self.params
            .sources_by_market
            .get(&market)
            .map(String::as_str)
            .or(Some(self.params.default_sources.as_str()))
            .filter(|s| !s.trim().is_empty())
    }

    async fn fetch_page(
        &self,
        sources: &str,
        from: &str,
        page: usize,
    ) -> Result<EverythingResponse, FetchError> {
        self.throttle.acquire().await;

        let page_size = self.params.page_size.to_string();
        let page = page.to_string();
        let response = self
            .client
            .get(&self.params.endpoint)
            .header("X-Api-Key", self.params.api_key.expose_secret())
            .query(&[
                ("sources", sources),
                ("language", self.params.language.as_str()),
                ("sortBy", "publishedAt"),
                ("pageSize", page_size.as_str()),
                ("page", page.as_str()),
                ("from", from),
            ])
            .send()
            .await
            .map_err(send_error)?;

        let response = check_status(response).await?;
        let payload: EverythingResponse = response
            .json()
            .await
            .map_err(|e| FetchError::parse(e.to_string()))?;

        if payload.status != "ok" {
            return Err(FetchError::upstream(
                payload
                    .message
                    .unwrap_or_else(|| format!("provider status '{}'", payload.status)),
            ));
        }
        Ok(payload)
    }

    fn to_item(&self, article: Article, market: Market) -> Option<RawItem> {
        let title = article.title.filter(|t| !t.trim().is_empty() && t != "[Removed]")?;
        let description = article.description.filter(|d| !d.trim().is_empty())?;
        let url = article.url.filter(|u| !u.trim().is_empty())?;
        let published = article
            .published_at
            .and_then(|p| OffsetDateTime::parse(&p, &Rfc3339).ok());

        Some(
            RawItem::new(
                self.id.clone(),
                AdapterKind::NewsService,
                title,
                url,
                BTreeSet::from([market]),
            )
            .with_snippet(description)
            .with_author(article.author)
            .with_published_at(published),
        )
    }
}

#[async_trait]
impl NewsAdapter for NewsServiceAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::NewsService
    }

    fn markets(&self) -> &BTreeSet<Market> {
        &self.markets
    }

    fn recommended_timeout(&self) -> Duration {
        // Pages are throttled, so budget for every page plus the spacing between them
        let pages = self.params.pages.max(1) as u32;
        Duration::from_secs(self.params.timeout_secs.max(1)) * pages
            + Duration::from_millis(self.params.min_interval_ms) * pages
    }

    async fn fetch(
        &self,
        markets: &BTreeSet<Market>,
        limit: usize,
    ) -> Result<Vec<RawItem>, FetchError> {
        if self.params.api_key.expose_secret().trim().is_empty() {
            return Err(FetchError::upstream("news service API key missing"));
        }

        let from = (OffsetDateTime::now_utc() - time::Duration::days(self.params.lookback_days))
            .format(format_description!("[year]-[month]-[day]"))
            .map_err(|e| FetchError::upstream(e.to_string()))?;

        let mut items = Vec::new();
        for market in self.markets.intersection(markets) {
            let Some(sources) = self.sources_for(*market) else {
                tracing::debug!(adapter = %self.id, market = %market, "No sources configured");
                continue;
            };

            let mut collected = 0usize;
            for page in 1..=self.params.pages.max(1) {
                let payload = self.fetch_page(sources, &from, page).await?;
                let received = payload.articles.len();
                let total = payload.total_results.unwrap_or(0);

                let before = items.len();
                items.extend(
                    payload
                        .articles
                        .into_iter()
                        .filter_map(|a| self.to_item(a, *market)),
                );
                collected += items.len() - before;

                let exhausted = received < self.params.page_size
                    || page * self.params.page_size >= total;
                if exhausted || collected >= limit {
                    break;
                }
            }
        }

        Ok(cap_per_market(items, markets, limit))
    }
}
