//! Evidence normalizer
//!
//! Canonicalizes source URLs, drops items whose sources were already seen
//! in this run, and enforces a per-host cap on accepted items.

use std::collections::{HashMap, HashSet};
use tracing::debug;
use url::Url;

use super::types::Evidence;

pub const DEFAULT_DOMAIN_CAP: usize = 5;

const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_content",
    "utm_term",
    "gclid",
    "fbclid",
    "igsh",
    "mc_cid",
    "mc_eid",
    "ref",
];

/// Lower-cased host without a leading `www.`.
pub fn host_of(raw: &str) -> Option<String> {
    let u = Url::parse(raw).ok()?;
    let host = u.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// Canonical form of a source URL, or `None` when it cannot be parsed.
pub fn canonicalize_url(raw: &str) -> Option<String> {
    let mut u = Url::parse(raw.trim()).ok()?;
    let host = u.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    u.set_host(Some(&host)).ok()?;
    u.set_fragment(None);

    let mut params: Vec<(String, String)> = u
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort_by(|a, b| a.0.cmp(&b.0));
    if params.is_empty() {
        u.set_query(None);
    } else {
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        u.set_query(Some(&query));
    }

    // Trailing slashes are trimmed as a run so a second pass is a no-op.
    let path = u.path().to_string();
    if path != "/" && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        u.set_path(if trimmed.is_empty() { "/" } else { trimmed });
    }

    // `Url` already omits default ports for http/https.
    Some(u.to_string())
}

/// URL-level dedup plus per-host cap over one pipeline run.
#[derive(Debug, Clone)]
pub struct EvidenceNormalizer {
    domain_cap: usize,
}

impl Default for EvidenceNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_DOMAIN_CAP)
    }
}

impl EvidenceNormalizer {
    pub fn new(domain_cap: usize) -> Self {
        Self { domain_cap: domain_cap.max(1) }
    }

    pub fn normalize(&self, items: Vec<Evidence>) -> Vec<Evidence> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut host_counts: HashMap<String, usize> = HashMap::new();
        let mut out = Vec::with_capacity(items.len());
        let total = items.len();

        for mut ev in items {
            let mut canonical: Vec<String> = Vec::new();
            for raw in &ev.urls {
                if let Some(c) = canonicalize_url(raw) {
                    if !canonical.contains(&c) {
                        canonical.push(c);
                    }
                }
            }

            if canonical.iter().any(|u| seen.contains(u)) {
                debug!("Dropping duplicate evidence {}", ev.id);
                continue;
            }

            let origin_host = canonical.first().and_then(|u| host_of(u));
            if let Some(ref host) = origin_host {
                let count = host_counts.entry(host.clone()).or_insert(0);
                if *count >= self.domain_cap {
                    debug!("Dropping evidence {}: host {} at cap {}", ev.id, host, self.domain_cap);
                    continue;
                }
                *count += 1;
            }

            seen.extend(canonical.iter().cloned());
            ev.urls = canonical;
            if let Some(host) = origin_host {
                ev.origin_id = host;
            } else if ev.origin_id.trim().is_empty() {
                ev.origin_id = "unknown".to_string();
            }
            out.push(ev);
        }

        debug!("Normalized evidence: kept {}/{}", out.len(), total);
        out
    }
}
