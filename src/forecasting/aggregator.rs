//! Evidence aggregation and market blending
//!
//! `aggregate_neutral` is the only constructor of a `NeutralPosterior`.
//! A market-aware estimate can only be derived by consuming a finalized
//! `NeutralPosterior`, so the evidence-only posterior is fixed before any
//! market price is read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::cluster::CorrelationClusterer;
use super::evidence::evidence_log_lr;
use super::math::{logit, sigmoid};
use super::types::{ClusterMeta, Evidence, InfluenceItem};

pub const DEFAULT_MARKET_ALPHA: f64 = 0.1;

/// Current market probability as reported by the market collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub probability: f64,
    pub as_of: DateTime<Utc>,
    pub source: Option<String>,
}

/// Evidence-only posterior. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct NeutralPosterior {
    p0: f64,
    p_neutral: f64,
    log_odds: f64,
    influence: Vec<InfluenceItem>,
    clusters: Vec<ClusterMeta>,
}

impl NeutralPosterior {
    pub fn p0(&self) -> f64 {
        self.p0
    }

    pub fn p_neutral(&self) -> f64 {
        self.p_neutral
    }

    pub fn log_odds(&self) -> f64 {
        self.log_odds
    }

    pub fn influence(&self) -> &[InfluenceItem] {
        &self.influence
    }

    pub fn clusters(&self) -> &[ClusterMeta] {
        &self.clusters
    }

    /// Blend with the market. Consumes the neutral posterior so it cannot
    /// be recomputed afterwards.
    pub fn blend(self, market: &MarketSnapshot, alpha: f64) -> BlendedPosterior {
        let alpha = alpha.clamp(0.0, 1.0);
        let p_aware = blend_market(self.p_neutral, market.probability, alpha);
        BlendedPosterior {
            neutral: self,
            p_aware: Some(p_aware),
            alpha,
            market: Some(market.clone()),
        }
    }

    /// Finish without a market signal.
    pub fn without_market(self, alpha: f64) -> BlendedPosterior {
        BlendedPosterior {
            neutral: self,
            p_aware: None,
            alpha,
            market: None,
        }
    }
}

/// Final probabilities: the untouched neutral posterior plus the optional blend.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendedPosterior {
    neutral: NeutralPosterior,
    p_aware: Option<f64>,
    alpha: f64,
    market: Option<MarketSnapshot>,
}

impl BlendedPosterior {
    pub fn neutral(&self) -> &NeutralPosterior {
        &self.neutral
    }

    pub fn p_aware(&self) -> Option<f64> {
        self.p_aware
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn market(&self) -> Option<&MarketSnapshot> {
        self.market.as_ref()
    }
}

fn blend_market(p_neutral: f64, market_probability: f64, alpha: f64) -> f64 {
    let m = market_probability.clamp(0.0, 1.0);
    alpha * m + (1.0 - alpha) * p_neutral
}

/// Log-odds sum of `p0` and every cluster-discounted logLR.
pub fn aggregate_neutral(
    p0: f64,
    evidence: &[Evidence],
    rho_by_cluster: &HashMap<String, f64>,
    default_rho: f64,
) -> NeutralPosterior {
    let clusters = CorrelationClusterer::new(default_rho)
        .with_overrides(rho_by_cluster)
        .cluster(evidence);

    let mut effective: Vec<(usize, f64, f64)> = Vec::with_capacity(evidence.len());
    let mut total = logit(p0);
    for cluster in &clusters {
        total += cluster.contribution();
        let discount = cluster.discount();
        for &idx in &cluster.members {
            let llr = evidence_log_lr(&evidence[idx]);
            effective.push((idx, llr, llr * discount));
        }
    }

    let p_neutral = sigmoid(total);
    effective.sort_by_key(|(idx, _, _)| *idx);
    let mut influence: Vec<InfluenceItem> = effective
        .into_iter()
        .map(|(idx, llr, eff)| InfluenceItem {
            evidence_id: evidence[idx].id.clone(),
            log_lr: llr,
            delta_pp: p_neutral - sigmoid(total - eff),
        })
        .collect();
    influence.sort_by(|a, b| b.delta_pp.abs().total_cmp(&a.delta_pp.abs()));

    NeutralPosterior {
        p0,
        p_neutral,
        log_odds: total,
        influence,
        clusters: clusters.into_iter().map(|c| c.meta).collect(),
    }
}
