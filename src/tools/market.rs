//! Market data capability
//!
//! The order-book clients live behind a market-data service; this module
//! defines the payload the pipeline consumes and a thin HTTP adapter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// History sampling interval accepted by the market-data service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryInterval {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl HistoryInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryInterval::OneHour => "1h",
            HistoryInterval::FourHours => "4h",
            HistoryInterval::OneDay => "1d",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1h" => Some(HistoryInterval::OneHour),
            "4h" => Some(HistoryInterval::FourHours),
            "1d" => Some(HistoryInterval::OneDay),
            _ => None,
        }
    }
}

impl fmt::Display for HistoryInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub history_interval: HistoryInterval,
    pub with_books: bool,
    pub with_trades: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            history_interval: HistoryInterval::OneDay,
            with_books: true,
            with_trades: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketFacts {
    pub question: String,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub liquidity: Option<f64>,
    /// RFC 3339 timestamp or epoch seconds
    #[serde(default)]
    pub close_time: Option<serde_json::Value>,
    #[serde(default)]
    pub resolution_source: Option<String>,
    #[serde(default)]
    pub token_map: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeQuote {
    pub token_id: String,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
    #[serde(default)]
    pub mid: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Epoch seconds
    pub t: i64,
    pub p: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub token_id: String,
    #[serde(default)]
    pub points: Vec<PricePoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketPayload {
    #[serde(default)]
    pub platform: String,
    pub market_facts: MarketFacts,
    #[serde(default)]
    pub market_state_now: Vec<OutcomeQuote>,
    #[serde(default)]
    pub history: Vec<PriceSeries>,
}

impl MarketPayload {
    /// Mid price of the first listed outcome, when it is a valid probability.
    pub fn current_mid(&self) -> Option<f64> {
        self.market_state_now
            .first()
            .and_then(|q| q.mid)
            .filter(|m| m.is_finite() && (0.0..=1.0).contains(m))
    }

    pub fn history_points(&self) -> usize {
        self.history.iter().map(|s| s.points.len()).sum()
    }

    /// Close time as epoch seconds, from either an RFC 3339 string or a number.
    pub fn close_time_secs(&self) -> Option<i64> {
        match self.market_facts.close_time.as_ref()? {
            serde_json::Value::Number(n) => n.as_i64().map(|t| if t > 10_000_000_000 { t / 1000 } else { t }),
            serde_json::Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|d| d.timestamp())
                .or_else(|| s.parse::<i64>().ok()),
            _ => None,
        }
    }
}

#[async_trait]
pub trait MarketDataFetcher: Send + Sync {
    async fn fetch(&self, market_url: &str, opts: &FetchOptions) -> Result<MarketPayload>;
}

/// Name of the venue a market URL points at.
pub fn detect_platform(market_url: &str) -> Option<&'static str> {
    let host = url::Url::parse(market_url).ok()?.host_str()?.to_ascii_lowercase();
    if host.ends_with("polymarket.com") {
        Some("polymarket")
    } else if host.ends_with("kalshi.com") {
        Some("kalshi")
    } else {
        None
    }
}

/// Adapter for a market-data service exposing `GET {base}/market`.
pub struct HttpMarketFetcher {
    client: Client,
    base_url: String,
}

impl HttpMarketFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MarketDataFetcher for HttpMarketFetcher {
    async fn fetch(&self, market_url: &str, opts: &FetchOptions) -> Result<MarketPayload> {
        let platform = detect_platform(market_url)
            .with_context(|| format!("Unsupported market URL: {}", market_url))?;

        debug!(platform, interval = %opts.history_interval, "fetching market data");

        let res = self
            .client
            .get(format!("{}/market", self.base_url.trim_end_matches('/')))
            .query(&[
                ("url", market_url),
                ("interval", opts.history_interval.as_str()),
                ("books", if opts.with_books { "true" } else { "false" }),
                ("trades", if opts.with_trades { "true" } else { "false" }),
            ])
            .send()
            .await
            .context("Failed to reach market data service")?
            .error_for_status()?;

        let mut payload: MarketPayload = res.json().await.context("Failed to decode market payload")?;
        if payload.platform.is_empty() {
            payload.platform = platform.to_string();
        }
        if payload.market_facts.question.trim().is_empty() {
            anyhow::bail!("Market payload has no question");
        }
        Ok(payload)
    }
}
