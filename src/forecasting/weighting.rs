//! Multiplicative logLR adjustments
//!
//! Recency, causal pathway and niche source authority. Every adjustment
//! re-clamps to the item's type cap.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;

use super::evidence::scale_log_lr;
use super::types::{Evidence, EvidenceType};

const SECS_PER_DAY: f64 = 86_400.0;

/// Parses RFC 3339 timestamps and bare `YYYY-MM-DD` dates (taken as midnight UTC).
pub fn parse_published_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Age in (fractional) days, floored at zero for future-dated items.
pub fn days_since(published_at: Option<&str>, now: DateTime<Utc>) -> Option<f64> {
    let ts = parse_published_at(published_at?)?;
    let secs = (now - ts).num_milliseconds() as f64 / 1000.0;
    Some((secs / SECS_PER_DAY).max(0.0))
}

/// Bucketed freshness factor.
pub struct RecencyWeighter {
    now: DateTime<Utc>,
}

impl RecencyWeighter {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn multiplier(&self, published_at: Option<&str>) -> f64 {
        match days_since(published_at, self.now) {
            None => 0.85,
            Some(d) if d <= 30.0 => 1.35,
            Some(d) if d <= 180.0 => 1.20,
            Some(d) if d <= 365.0 => 0.95,
            Some(_) => 0.85,
        }
    }

    pub fn apply(&self, e: Evidence) -> Evidence {
        let mult = self.multiplier(e.published_at.as_deref());
        scale_log_lr(e, mult)
    }
}

/// Amplifies evidence tagged with a causal-catalyst pathway.
pub struct PathwayBooster;

impl PathwayBooster {
    pub fn base_boost(pathway: Option<&str>) -> f64 {
        let Some(path) = pathway else { return 0.0 };
        let key = path.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| key.contains(w));
        if has(&["platform", "policy", "distribution"]) {
            0.30
        } else if has(&["release", "tour", "product"]) {
            0.30
        } else if has(&["regulatory", "legal"]) {
            0.25
        } else if has(&["macro", "geopolitical"]) {
            0.20
        } else if has(&["viral"]) {
            0.20
        } else if has(&["award", "media"]) {
            0.15
        } else {
            0.10
        }
    }

    pub fn multiplier(e: &Evidence) -> f64 {
        let strength = e.connection_strength.map(|s| s.clamp(0.0, 1.0)).unwrap_or(0.0);
        1.0 + Self::base_boost(e.pathway.as_deref()) * strength
    }

    pub fn apply(e: Evidence) -> Evidence {
        let mult = Self::multiplier(&e);
        if mult == 1.0 {
            return e;
        }
        scale_log_lr(e, mult)
    }
}

/// Boosts lower-tier evidence from credible specialist sources.
pub struct NicheAuthorityScorer;

impl NicheAuthorityScorer {
    pub fn coefficient(kind: EvidenceType) -> f64 {
        match kind {
            EvidenceType::A => 0.0,
            EvidenceType::B => 0.20,
            EvidenceType::C => 0.35,
            EvidenceType::D => 0.50,
        }
    }

    pub fn apply(e: Evidence, authority: f64) -> Evidence {
        let authority = if authority.is_finite() { authority.clamp(0.0, 1.0) } else { 0.0 };
        if authority <= 0.0 || e.kind == EvidenceType::A {
            return e;
        }
        let mult = 1.0 + Self::coefficient(e.kind) * authority;
        scale_log_lr(e, mult)
    }

    /// Applies an id -> authority map; items missing from the map are left alone.
    pub fn apply_all(items: Vec<Evidence>, authority: &HashMap<String, f64>) -> Vec<Evidence> {
        items
            .into_iter()
            .map(|e| {
                let a = authority.get(&e.id).copied().unwrap_or(0.0);
                Self::apply(e, a)
            })
            .collect()
    }
}
