//! Public social timeline collector
//!
//! Renders a public profile page and pulls post cards out of the markup. Only
//! anonymous requests are made; a redirect to a login wall is treated as an
//! upstream failure rather than something to work around.

use async_trait::async_trait;
use news_pulse_domain::{AdapterKind, FetchError, Market, NewsAdapter, RawItem, cap_per_market, text};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use url::Url;

use crate::http::{build_client, check_status, send_error};

static ARTICLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<article\b[^>]*>(.*?)</article>").expect("valid article regex"));
static STATUS_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)href="((?:https?://[^"/]+)?/[^"/?#]+/status/\d+)"#).expect("valid status regex")
});
static TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<time\b[^>]*\bdatetime="([^"]+)""#).expect("valid time regex")
});

const TITLE_CHARS: usize = 140;

/// A rendered page as seen by the collector
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// URL after redirects
    pub final_url: String,
    pub html: String,
}

/// Turns a public URL into rendered markup; a headless browser can implement this too
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<RenderedPage, FetchError>;
}

/// Plain anonymous HTTP GET
pub struct HttpPageRenderer {
    client: Client,
}

impl HttpPageRenderer {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl PageRenderer for HttpPageRenderer {
    async fn render(&self, url: &str) -> Result<RenderedPage, FetchError> {
        let response = self.client.get(url).send().await.map_err(send_error)?;
        let final_url = response.url().to_string();
        let response = check_status(response).await?;
        let html = response.text().await.map_err(send_error)?;
        Ok(RenderedPage { final_url, html })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SocialParams {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub handles: Vec<String>,
    /// Posts kept per handle
    #[serde(default = "default_per_handle")]
    pub per_handle: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://x.com".to_string()
}

fn default_per_handle() -> usize {
    8
}

fn default_timeout_secs() -> u64 {
    20
}

pub struct SocialAdapter {
    id: String,
    markets: BTreeSet<Market>,
    params: SocialParams,
    renderer: Arc<dyn PageRenderer>,
}

impl SocialAdapter {
    pub fn new(
        id: impl Into<String>,
        markets: BTreeSet<Market>,
        params: SocialParams,
        renderer: Arc<dyn PageRenderer>,
    ) -> Self {
        Self {
            id: id.into(),
            markets,
            params,
            renderer,
        }
    }

    fn profile_url(&self, handle: &str) -> String {
        format!(
            "{}/{}",
            self.params.base_url.trim_end_matches('/'),
            handle.trim_start_matches('@')
        )
    }

    fn extract(&self, page: &RenderedPage, handle: &str, markets: &BTreeSet<Market>) -> Vec<RawItem> {
        let base = Url::parse(&page.final_url).ok();
        let handle = handle.trim_start_matches('@');

        ARTICLE
            .captures_iter(&page.html)
            .filter_map(|card| {
                let inner = card.get(1)?.as_str();
                let href = STATUS_LINK.captures(inner)?.get(1)?.as_str();
                let url = match &base {
                    Some(base) => base.join(href).ok()?.to_string(),
                    None => href.to_string(),
                };

                let body = text::clean_text(inner);
                if body.is_empty() {
                    return None;
                }
                let published = TIME
                    .captures(inner)
                    .and_then(|t| t.get(1))
                    .and_then(|t| OffsetDateTime::parse(t.as_str(), &Rfc3339).ok());

                Some(
                    RawItem::new(
                        self.id.clone(),
                        AdapterKind::Social,
                        text::truncate_chars(&body, TITLE_CHARS),
                        url,
                        markets.clone(),
                    )
                    .with_snippet(&body)
                    .with_author(Some(format!("@{handle}")))
                    .with_published_at(published),
                )
            })
            .take(self.params.per_handle)
            .collect()
    }
}

fn is_login_wall(final_url: &str) -> bool {
    Url::parse(final_url)
        .map(|u| {
            let path = u.path();
            path.starts_with("/login") || path.starts_with("/i/flow/login") || path.starts_with("/account/")
        })
        .unwrap_or(false)
}

#[async_trait]
impl NewsAdapter for SocialAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Social
    }

    fn markets(&self) -> &BTreeSet<Market> {
        &self.markets
    }

    fn recommended_timeout(&self) -> Duration {
        let handles = self.params.handles.len().max(1) as u32;
        Duration::from_secs(self.params.timeout_secs.max(1)) * handles
    }

    async fn fetch(
        &self,
        markets: &BTreeSet<Market>,
        limit: usize,
    ) -> Result<Vec<RawItem>, FetchError> {
        let tags: BTreeSet<Market> = self.markets.intersection(markets).copied().collect();
        let mut items = Vec::new();
        let mut first_error = None;
        let mut succeeded = 0usize;

        for handle in &self.params.handles {
            let url = self.profile_url(handle);
            let page = match self.renderer.render(&url).await {
                Ok(page) if is_login_wall(&page.final_url) => {
                    Err(FetchError::upstream(format!("{url} redirected to a login wall")))
                }
                other => other,
            };

            match page {
                Ok(page) => {
                    succeeded += 1;
                    let cards = self.extract(&page, handle, &tags);
                    tracing::debug!(adapter = %self.id, handle = %handle, posts = cards.len(), "Collected public posts");
                    items.extend(cards);
                }
                Err(error) => {
                    tracing::warn!(adapter = %self.id, handle = %handle, error = %error, "Profile render failed");
                    first_error.get_or_insert(error);
                }
            }
        }

        if succeeded == 0 {
            if let Some(error) = first_error {
                return Err(error);
            }
        }

        Ok(cap_per_market(items, markets, limit))
    }
}
