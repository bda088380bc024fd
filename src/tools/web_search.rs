//! Web Search Provider
//!
//! Performs web searches using the DuckDuckGo HTML endpoint (no API key required).

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::{debug, warn};

use super::search::{SearchContext, SearchHit, SearchOptions, SearchProvider, SearchResponse};

const DDG_MAX_RESULTS: usize = 10;

/// Key-less search provider backed by DuckDuckGo
pub struct DuckDuckGoSearchProvider {
    client: Client,
    base_url: String,
}

impl DuckDuckGoSearchProvider {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36")
                .build()
                .unwrap_or_default(),
            base_url: "https://html.duckduckgo.com/html/".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl Default for DuckDuckGoSearchProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// DuckDuckGo has no date filter; fold the start year into the query text instead.
fn scoped_query(query: &str, opts: &SearchOptions) -> String {
    match opts.start_date {
        Some(start) => {
            let year = start.format("%Y").to_string();
            if query.contains(&year) {
                query.to_string()
            } else {
                format!("{} {}", query, year)
            }
        }
        None => query.to_string(),
    }
}

/// Parse result blocks from the DuckDuckGo HTML page. Results without a
/// resolvable URL are dropped.
pub fn parse_ddg_html(html: &str, max_results: usize) -> Vec<SearchHit> {
    let (Ok(snippet_re), Ok(title_re), Ok(url_re)) = (
        Regex::new(r#"class="result__snippet"[^>]*>([^<]+)"#),
        Regex::new(r#"class="result__a"[^>]*>([^<]+)"#),
        Regex::new(r#"class="result__url"[^>]*>([^<]+)"#),
    ) else {
        return Vec::new();
    };

    let snippets: Vec<_> = snippet_re.captures_iter(html).collect();
    let titles: Vec<_> = title_re.captures_iter(html).collect();
    let urls: Vec<_> = url_re.captures_iter(html).collect();

    let count = snippets.len().min(titles.len()).min(urls.len()).min(max_results);
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let title = titles[i]
            .get(1)
            .map(|m| html_escape::decode_html_entities(m.as_str()).trim().to_string())
            .unwrap_or_default();
        let content = snippets[i]
            .get(1)
            .map(|m| html_escape::decode_html_entities(m.as_str()).trim().to_string())
            .unwrap_or_default();
        let url = urls[i]
            .get(1)
            .map(|m| normalize_display_url(m.as_str()))
            .unwrap_or_default();

        if !title.is_empty() && !url.is_empty() {
            results.push(SearchHit { title, url, content });
        }
    }
    results
}

fn normalize_display_url(raw: &str) -> String {
    let trimmed = html_escape::decode_html_entities(raw.trim()).to_string();
    if trimmed.is_empty() || trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed
    } else {
        format!("https://{}", trimmed)
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearchProvider {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, _ctx: &SearchContext, query: &str, opts: &SearchOptions) -> Result<SearchResponse> {
        let query = scoped_query(query, opts);
        let url = format!("{}?q={}", self.base_url, urlencoding::encode(&query));

        debug!("Searching DuckDuckGo: {}", query);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send search request")?;

        let html = response.text().await.context("Failed to read response")?;
        let max = opts.max_results.unwrap_or(DDG_MAX_RESULTS).min(DDG_MAX_RESULTS);
        let results = parse_ddg_html(&html, max);

        if results.is_empty() {
            warn!("Could not parse DuckDuckGo results for '{}'", query);
        }
        Ok(SearchResponse { results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const PAGE: &str = r#"
        <a class="result__a" href="x">Fed holds rates &amp; signals cut</a>
        <a class="result__url" href="x">www.reuters.com/markets/fed</a>
        <a class="result__snippet" href="x">The Federal Reserve left rates unchanged.</a>
        <a class="result__a" href="y">Second</a>
        <a class="result__url" href="y">https://example.org/b</a>
        <a class="result__snippet" href="y">Other text</a>
    "#;

    #[test]
    fn test_parse_ddg_html() {
        let hits = parse_ddg_html(PAGE, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Fed holds rates & signals cut");
        assert_eq!(hits[0].url, "https://www.reuters.com/markets/fed");
        assert_eq!(hits[1].url, "https://example.org/b");
    }

    #[test]
    fn test_parse_respects_limit_and_garbage() {
        assert_eq!(parse_ddg_html(PAGE, 1).len(), 1);
        assert!(parse_ddg_html("<html>nothing</html>", 5).is_empty());
    }

    #[test]
    fn test_scoped_query_adds_year_once() {
        let opts = SearchOptions::since(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(scoped_query("fed cut", &opts), "fed cut 2025");
        assert_eq!(scoped_query("fed cut 2025", &opts), "fed cut 2025");
        assert_eq!(scoped_query("fed cut", &SearchOptions::default()), "fed cut");
    }
}
