//! Forecast history
//!
//! Completed forecast cards persisted as versioned JSON records. Legacy
//! shapes are migrated once, when the file is loaded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use crate::agent::{ForecastError, ForecastResult};
use crate::forecasting::ForecastCard;

pub const HISTORY_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub version: u32,
    pub id: String,
    pub market_url: String,
    pub created_at: DateTime<Utc>,
    pub forecast: ForecastCard,
}

impl HistoryRecord {
    pub fn new(market_url: impl Into<String>, forecast: ForecastCard) -> Self {
        Self {
            version: HISTORY_VERSION,
            id: Uuid::new_v4().to_string(),
            market_url: market_url.into(),
            created_at: Utc::now(),
            forecast,
        }
    }
}

/// First present key among `keys`.
fn pick<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

fn card_from_legacy(card: &Map<String, Value>, fallback_question: Option<&Value>) -> Result<ForecastCard, String> {
    let num = |keys: &[&str]| pick(card, keys).and_then(Value::as_f64);
    let list = |keys: &[&str]| pick(card, keys).cloned().unwrap_or_else(|| Value::Array(Vec::new()));

    let question = pick(card, &["question"])
        .or(fallback_question)
        .and_then(Value::as_str)
        .ok_or("record has no question")?;
    let p_neutral = num(&["pNeutral", "p_neutral", "probability"]).ok_or("record has no evidence-only probability")?;

    let normalized = serde_json::json!({
        "question": question,
        "p0": num(&["p0", "prior"]).unwrap_or(0.5),
        "pNeutral": p_neutral,
        "pAware": num(&["pAware", "p_aware"]),
        "alpha": num(&["alpha"]).unwrap_or(crate::forecasting::DEFAULT_MARKET_ALPHA),
        "drivers": list(&["drivers"]),
        "influence": list(&["influence"]),
        "clusters": list(&["clusters"]),
        "provenance": list(&["provenance", "sources"]),
        "markdownReport": pick(card, &["markdownReport", "markdown_report", "report"]).cloned().unwrap_or(Value::from("")),
    });
    serde_json::from_value(normalized).map_err(|e| e.to_string())
}

/// Normalize any stored record shape into the current schema.
///
/// * v0: the card's fields flat on the record
/// * v1: card under `forecast` or `result.forecast`, snake_case or camelCase keys
/// * v2: current
pub fn migrate_record(raw: Value) -> Result<HistoryRecord, String> {
    let obj = raw.as_object().ok_or("record is not an object")?;
    let version = obj.get("version").and_then(Value::as_u64).unwrap_or(0);

    if version == HISTORY_VERSION as u64 {
        return serde_json::from_value(raw).map_err(|e| e.to_string());
    }

    let card = obj
        .get("forecast")
        .and_then(Value::as_object)
        .or_else(|| obj.get("result").and_then(|r| r.get("forecast")).and_then(Value::as_object))
        .or_else(|| obj.get("result").and_then(Value::as_object).filter(|r| r.contains_key("pNeutral") || r.contains_key("p_neutral")))
        .unwrap_or(obj);
    let forecast = card_from_legacy(card, pick(obj, &["question"]))?;

    let created_at = pick(obj, &["createdAt", "created_at", "timestamp"])
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(HistoryRecord {
        version: HISTORY_VERSION,
        id: pick(obj, &["id"])
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        market_url: pick(obj, &["marketUrl", "market_url", "url"])
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        created_at,
        forecast,
    })
}

pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_raw(&self) -> ForecastResult<Vec<Value>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let json = fs::read_to_string(&self.path).await?;
        if json.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&json).map_err(|e| ForecastError::Parse(format!("{}: {}", self.path.display(), e)))
    }

    /// Every readable record, migrated. Unreadable records are skipped.
    pub async fn load_all(&self) -> ForecastResult<Vec<HistoryRecord>> {
        Ok(self
            .read_raw()
            .await?
            .into_iter()
            .enumerate()
            .filter_map(|(i, v)| match migrate_record(v) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!("Skipping unreadable history record #{}: {}", i, e);
                    None
                }
            })
            .collect())
    }

    /// Appends to the stored entries as they are on disk; records this
    /// version cannot read are kept untouched.
    pub async fn append(&self, record: HistoryRecord) -> ForecastResult<()> {
        let mut raw = self.read_raw().await?;
        raw.push(serde_json::to_value(&record).map_err(|e| ForecastError::Parse(e.to_string()))?);
        let json = serde_json::to_string_pretty(&raw).map_err(|e| ForecastError::Parse(e.to_string()))?;
        fs::write(&self.path, json).await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> ForecastResult<Option<HistoryRecord>> {
        Ok(self.load_all().await?.into_iter().find(|r| r.id == id))
    }

    pub async fn clear(&self) -> ForecastResult<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).await?;
        }
        Ok(())
    }
}
