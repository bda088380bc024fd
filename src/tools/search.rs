//! Search capability
//!
//! Every search call receives an explicit `SearchContext`; providers never
//! read credentials from process-wide state.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// Per-request credentials and tracing identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchContext {
    pub access_token: Option<String>,
    pub session_id: Option<String>,
}

impl SearchContext {
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            access_token,
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    All,
    Web,
    Proprietary,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::All => "all",
            SearchType::Web => "web",
            SearchType::Proprietary => "proprietary",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    pub search_type: SearchType,
    /// Only results published on or after this date
    pub start_date: Option<NaiveDate>,
    pub max_results: Option<usize>,
}

impl SearchOptions {
    pub fn since(start_date: NaiveDate) -> Self {
        Self {
            start_date: Some(start_date),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<SearchHit>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, ctx: &SearchContext, query: &str, opts: &SearchOptions) -> Result<SearchResponse>;
}

const DEFAULT_MAX_RESULTS: usize = 8;
const DEFAULT_RELEVANCE_THRESHOLD: f64 = 0.5;

/// JSON search API (POST `{base}/deepsearch`) authenticated with the context's bearer token.
pub struct HttpSearchProvider {
    client: Client,
    base_url: String,
    fallback_token: Option<String>,
}

impl HttpSearchProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            fallback_token: None,
        }
    }

    /// Server-side key used when the request context carries no token.
    pub fn with_fallback_token(mut self, token: Option<String>) -> Self {
        self.fallback_token = token;
        self
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    results: Vec<SearchHit>,
    #[serde(default)]
    error: Option<String>,
}

fn default_success() -> bool {
    true
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    fn name(&self) -> &str {
        "http_search"
    }

    async fn search(&self, ctx: &SearchContext, query: &str, opts: &SearchOptions) -> Result<SearchResponse> {
        let mut body = json!({
            "query": query,
            "search_type": opts.search_type.as_str(),
            "max_num_results": opts.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
            "relevance_threshold": DEFAULT_RELEVANCE_THRESHOLD,
        });
        if let Some(start) = opts.start_date {
            body["start_date"] = json!(start.format("%Y-%m-%d").to_string());
        }

        debug!(query, session = ?ctx.session_id, "search request");

        let mut request = self
            .client
            .post(format!("{}/deepsearch", self.base_url.trim_end_matches('/')))
            .json(&body);
        if let Some(token) = ctx.access_token.as_ref().or(self.fallback_token.as_ref()) {
            request = request.bearer_auth(token);
        }

        let res = request
            .send()
            .await
            .context("Failed to send search request")?
            .error_for_status()?;
        let parsed: ApiResponse = res.json().await.context("Failed to decode search response")?;

        if !parsed.success {
            anyhow::bail!(
                "search API error: {}",
                parsed.error.unwrap_or_else(|| "unknown".to_string())
            );
        }
        Ok(SearchResponse {
            results: parsed.results,
        })
    }
}
