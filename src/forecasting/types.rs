//! Core forecasting data model
//!
//! Evidence items, per-item influence records, cluster metadata and the
//! write-once `ForecastCard`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Source-quality tier of an evidence item (A = primary/official, D = weak).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvidenceType {
    A,
    B,
    C,
    D,
}

impl EvidenceType {
    /// Maximum absolute logLR magnitude permitted for this tier
    pub fn cap(&self) -> f64 {
        match self {
            EvidenceType::A => 2.0,
            EvidenceType::B => 1.6,
            EvidenceType::C => 0.8,
            EvidenceType::D => 0.3,
        }
    }
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvidenceType::A => "A",
            EvidenceType::B => "B",
            EvidenceType::C => "C",
            EvidenceType::D => "D",
        };
        write!(f, "{}", s)
    }
}

/// Direction of an evidence item relative to the question's YES outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polarity {
    Supports,
    Contradicts,
    Neutral,
}

impl Polarity {
    pub fn sign(&self) -> f64 {
        match self {
            Polarity::Supports => 1.0,
            Polarity::Contradicts => -1.0,
            Polarity::Neutral => 0.0,
        }
    }

    pub fn as_i8(&self) -> i8 {
        match self {
            Polarity::Supports => 1,
            Polarity::Contradicts => -1,
            Polarity::Neutral => 0,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value.signum() {
            1 => Polarity::Supports,
            -1 => Polarity::Contradicts,
            _ => Polarity::Neutral,
        }
    }
}

impl Serialize for Polarity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.as_i8())
    }
}

impl<'de> Deserialize<'de> for Polarity {
    // Models emit polarity as 1 / -1 / 0 or as the quoted strings "1" / "-1" / "0".
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match &value {
            serde_json::Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.round() as i64))
                .map(Polarity::from_i64)
                .ok_or_else(|| serde::de::Error::custom("invalid polarity number")),
            serde_json::Value::String(s) => s
                .trim()
                .trim_start_matches('+')
                .parse::<i64>()
                .map(Polarity::from_i64)
                .map_err(|_| serde::de::Error::custom(format!("invalid polarity '{}'", s))),
            _ => Err(serde::de::Error::custom("polarity must be a number or string")),
        }
    }
}

/// One atomic claim gathered during research.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    #[serde(default)]
    pub id: String,
    pub claim: String,
    pub polarity: Polarity,
    #[serde(rename = "type")]
    pub kind: EvidenceType,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub origin_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(default)]
    pub first_report: bool,
    #[serde(default = "neutral_score")]
    pub verifiability: f64,
    #[serde(default = "neutral_score")]
    pub consistency: f64,
    #[serde(default)]
    pub corroborations_indep: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pathway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_strength: Option<f64>,
    #[serde(rename = "logLRHint", default, skip_serializing_if = "Option::is_none")]
    pub log_lr_hint: Option<f64>,
}

impl Evidence {
    pub fn new(id: impl Into<String>, claim: impl Into<String>, polarity: Polarity, kind: EvidenceType) -> Self {
        Self {
            id: id.into(),
            claim: claim.into(),
            polarity,
            kind,
            urls: Vec::new(),
            origin_id: String::new(),
            published_at: None,
            first_report: false,
            verifiability: neutral_score(),
            consistency: neutral_score(),
            corroborations_indep: 0,
            pathway: None,
            connection_strength: None,
            log_lr_hint: None,
        }
    }

    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.urls = urls;
        self
    }

    pub fn with_origin(mut self, origin_id: impl Into<String>) -> Self {
        self.origin_id = origin_id.into();
        self
    }

    pub fn with_published_at(mut self, published_at: impl Into<String>) -> Self {
        self.published_at = Some(published_at.into());
        self
    }

    pub fn with_quality(mut self, verifiability: f64, consistency: f64, corroborations: u32) -> Self {
        self.verifiability = verifiability;
        self.consistency = consistency;
        self.corroborations_indep = corroborations;
        self
    }

    pub fn with_pathway(mut self, pathway: impl Into<String>, strength: f64) -> Self {
        self.pathway = Some(pathway.into());
        self.connection_strength = Some(strength);
        self
    }

    /// Clamp model-supplied scores into their documented ranges.
    pub fn sanitized(mut self) -> Self {
        self.verifiability = clamp_unit(self.verifiability);
        self.consistency = clamp_unit(self.consistency);
        self.connection_strength = self.connection_strength.map(clamp_unit);
        self
    }
}

fn neutral_score() -> f64 {
    0.5
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Correlation cluster summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMeta {
    pub cluster_id: String,
    pub size: usize,
    pub rho: f64,
    pub m_eff: f64,
    #[serde(rename = "meanLLR")]
    pub mean_llr: f64,
}

/// Per-evidence contribution to the final posterior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfluenceItem {
    pub evidence_id: String,
    #[serde(rename = "logLR")]
    pub log_lr: f64,
    /// Shift in probability units (multiply by 100 for percentage points)
    #[serde(rename = "deltaPP")]
    pub delta_pp: f64,
}

/// Immutable forecast output. Built once by `make_forecast_card`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastCard {
    pub question: String,
    pub p0: f64,
    pub p_neutral: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_aware: Option<f64>,
    pub alpha: f64,
    #[serde(default)]
    pub drivers: Vec<String>,
    #[serde(default)]
    pub influence: Vec<InfluenceItem>,
    #[serde(default)]
    pub clusters: Vec<ClusterMeta>,
    #[serde(default)]
    pub provenance: Vec<String>,
    #[serde(default)]
    pub markdown_report: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_caps() {
        assert_eq!(EvidenceType::A.cap(), 2.0);
        assert_eq!(EvidenceType::B.cap(), 1.6);
        assert_eq!(EvidenceType::C.cap(), 0.8);
        assert_eq!(EvidenceType::D.cap(), 0.3);
    }

    #[test]
    fn test_polarity_accepts_strings_and_numbers() {
        let p: Polarity = serde_json::from_str("\"-1\"").unwrap();
        assert_eq!(p, Polarity::Contradicts);
        let p: Polarity = serde_json::from_str("1").unwrap();
        assert_eq!(p, Polarity::Supports);
        let p: Polarity = serde_json::from_str("\"0\"").unwrap();
        assert_eq!(p, Polarity::Neutral);
        assert!(serde_json::from_str::<Polarity>("\"yes\"").is_err());
    }

    #[test]
    fn test_evidence_deserializes_model_shape() {
        let json = r#"{
            "id": "e1",
            "claim": "Regulator approved the filing",
            "polarity": "1",
            "type": "A",
            "publishedAt": "2026-09-01",
            "urls": ["https://www.sec.gov/x"],
            "originId": "sec",
            "firstReport": true,
            "verifiability": 1.4,
            "corroborationsIndep": 2,
            "consistency": 0.9
        }"#;
        let e: Evidence = serde_json::from_str(json).unwrap();
        assert_eq!(e.kind, EvidenceType::A);
        assert_eq!(e.polarity, Polarity::Supports);
        assert_eq!(e.sanitized().verifiability, 1.0);
    }

    #[test]
    fn test_evidence_missing_scores_default_to_neutral() {
        let e: Evidence =
            serde_json::from_str(r#"{"claim": "Turnout rose", "polarity": -1, "type": "C"}"#).unwrap();
        assert_eq!(e.id, "");
        assert_eq!(e.verifiability, 0.5);
        assert_eq!(e.consistency, 0.5);
    }
}
