//! Text and URL normalization shared by adapters, dedup and scoring

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<[^>]*>").expect("valid tag regex"));

/// Strip HTML tags, decode the handful of common entities, collapse whitespace
pub fn clean_text(input: &str) -> String {
    let stripped = TAGS.replace_all(input, " ");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace('\u{200b}', "");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max` characters on a char boundary
pub fn truncate_chars(input: &str, max: usize) -> String {
    match input.char_indices().nth(max) {
        Some((idx, _)) => input[..idx].to_string(),
        None => input.to_string(),
    }
}

/// Case-folded, punctuation-stripped, whitespace-collapsed title key
pub fn normalize_title_key(title: &str) -> String {
    let folded: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Host + path key: scheme, `www.`, query, fragment and trailing slash are dropped
pub fn normalize_url_key(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let parsed = Url::parse(trimmed).or_else(|_| Url::parse(&format!("https://{trimmed}")));
    match parsed {
        Ok(url) => {
            let host = url
                .host_str()
                .unwrap_or_default()
                .trim_start_matches("www.")
                .to_lowercase();
            let path = url.path().trim_end_matches('/');
            format!("{host}{path}")
        }
        Err(_) => trimmed
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_lowercase(),
    }
}
