//! Correlation clustering
//!
//! Evidence sharing an `origin_id` is assumed pairwise correlated with
//! `rho`; the cluster counts as `m_eff = n / (1 + (n - 1) * rho)`
//! independent items.

use std::collections::HashMap;

use super::evidence::evidence_log_lr;
use super::types::{ClusterMeta, Evidence};

pub const DEFAULT_RHO: f64 = 0.5;

/// Design-effect sample size, bounded to `[1, n]`.
pub fn effective_sample_size(n: usize, rho: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n_f = n as f64;
    let rho = if rho.is_finite() { rho.clamp(0.0, 1.0) } else { DEFAULT_RHO };
    (n_f / (1.0 + (n_f - 1.0) * rho)).clamp(1.0, n_f)
}

/// A cluster and the indices of its members in the clustered slice.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub meta: ClusterMeta,
    pub members: Vec<usize>,
}

impl Cluster {
    /// Share of each member's logLR that survives the correlation discount.
    pub fn discount(&self) -> f64 {
        if self.meta.size == 0 {
            0.0
        } else {
            self.meta.m_eff / self.meta.size as f64
        }
    }

    pub fn contribution(&self) -> f64 {
        self.meta.mean_llr * self.meta.m_eff
    }
}

pub struct CorrelationClusterer {
    default_rho: f64,
    rho_by_cluster: HashMap<String, f64>,
}

impl CorrelationClusterer {
    pub fn new(default_rho: f64) -> Self {
        Self {
            default_rho,
            rho_by_cluster: HashMap::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: &HashMap<String, f64>) -> Self {
        for (k, v) in overrides {
            self.rho_by_cluster.insert(k.clone(), *v);
        }
        self
    }

    fn rho_for(&self, cluster_id: &str) -> f64 {
        self.rho_by_cluster
            .get(cluster_id)
            .copied()
            .filter(|r| r.is_finite())
            .unwrap_or(self.default_rho)
            .clamp(0.0, 1.0)
    }

    /// Clusters in first-appearance order.
    pub fn cluster(&self, evidence: &[Evidence]) -> Vec<Cluster> {
        let mut order: Vec<String> = Vec::new();
        let mut members: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, e) in evidence.iter().enumerate() {
            let key = if e.origin_id.trim().is_empty() {
                format!("solo:{}", e.id)
            } else {
                e.origin_id.clone()
            };
            members
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key.clone());
                    Vec::new()
                })
                .push(idx);
        }

        order
            .into_iter()
            .map(|cluster_id| {
                let idxs = members.remove(&cluster_id).unwrap_or_default();
                let n = idxs.len();
                let rho = self.rho_for(&cluster_id);
                let sum: f64 = idxs.iter().map(|&i| evidence_log_lr(&evidence[i])).sum();
                Cluster {
                    meta: ClusterMeta {
                        cluster_id,
                        size: n,
                        rho,
                        m_eff: effective_sample_size(n, rho),
                        mean_llr: if n == 0 { 0.0 } else { sum / n as f64 },
                    },
                    members: idxs,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecasting::types::{EvidenceType, Polarity};

    #[test]
    fn test_m_eff_endpoints() {
        assert_eq!(effective_sample_size(4, 0.0), 4.0);
        assert_eq!(effective_sample_size(4, 1.0), 1.0);
        assert_eq!(effective_sample_size(1, 0.7), 1.0);
        assert_eq!(effective_sample_size(3, 0.5), 1.5);
    }

    #[test]
    fn test_m_eff_strictly_decreasing_in_rho() {
        for n in 2..8 {
            let mut prev = f64::INFINITY;
            for step in 0..=20 {
                let rho = step as f64 / 20.0;
                let m = effective_sample_size(n, rho);
                assert!(m < prev, "n={} rho={}", n, rho);
                prev = m;
            }
        }
    }

    #[test]
    fn test_clusters_group_by_origin_with_overrides() {
        let mk = |id: &str, origin: &str| {
            let mut e = Evidence::new(id, "c", Polarity::Supports, EvidenceType::B).with_origin(origin);
            e.log_lr_hint = Some(1.0);
            e
        };
        let items = vec![mk("a", "siteA"), mk("b", "siteB"), mk("c", "siteA"), mk("d", "siteA")];
        let mut overrides = HashMap::new();
        overrides.insert("siteB".to_string(), 0.9);
        let clusters = CorrelationClusterer::new(0.5).with_overrides(&overrides).cluster(&items);

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].meta.cluster_id, "siteA");
        assert_eq!(clusters[0].members, vec![0, 2, 3]);
        assert_eq!(clusters[0].meta.m_eff, 1.5);
        assert_eq!(clusters[0].contribution(), 1.5);
        assert_eq!(clusters[1].meta.rho, 0.9);
    }
}
