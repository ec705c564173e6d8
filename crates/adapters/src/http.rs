//! Shared HTTP plumbing for the network adapters

use news_pulse_domain::FetchError;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

pub(crate) const USER_AGENT: &str = concat!("news-pulse/", env!("CARGO_PKG_VERSION"));

/// Client without a cookie store; adapters never carry credentials between requests
pub(crate) fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
}

pub(crate) fn send_error(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::timeout(error.to_string())
    } else {
        FetchError::upstream(error.to_string())
    }
}

/// Map non-success statuses to fetch errors; `304` passes through
pub(crate) async fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() || status == StatusCode::NOT_MODIFIED {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        return Err(match retry_after {
            Some(after) => FetchError::rate_limited(format!("HTTP 429, retry after {after}")),
            None => FetchError::rate_limited("HTTP 429"),
        });
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(FetchError::upstream(format!("HTTP {}: access denied", status.as_u16())));
    }

    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(200).collect();
    Err(FetchError::upstream(format!("HTTP {}: {}", status.as_u16(), body.trim())))
}
