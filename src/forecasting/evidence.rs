//! Log-odds engine
//!
//! Maps a single evidence item to a signed, cap-bounded log-likelihood
//! ratio. Deterministic and monotonic in verifiability, consistency and
//! independent corroboration count.

use super::math::clamp;
use super::types::{Evidence, EvidenceType};

pub const TYPE_CAPS: [(EvidenceType, f64); 4] = [
    (EvidenceType::A, 2.0),
    (EvidenceType::B, 1.6),
    (EvidenceType::C, 0.8),
    (EvidenceType::D, 0.3),
];

const W_VERIFIABILITY: f64 = 0.45;
const W_CONSISTENCY: f64 = 0.35;
const W_CORROBORATION: f64 = 0.20;
/// Fraction of the cap granted to an item with zero quality signals.
const FLOOR_SHARE: f64 = 0.25;

/// Quality score in [0,1]. Each extra corroboration closes half the remaining gap.
fn quality(e: &Evidence) -> f64 {
    let v = clamp(e.verifiability, 0.0, 1.0);
    let c = clamp(e.consistency, 0.0, 1.0);
    let k = 1.0 - 0.5f64.powi(e.corroborations_indep.min(64) as i32);
    W_VERIFIABILITY * v + W_CONSISTENCY * c + W_CORROBORATION * k
}

/// Base logLR before any boosting.
pub fn base_log_lr(e: &Evidence) -> f64 {
    let cap = e.kind.cap();
    let magnitude = cap * (FLOOR_SHARE + (1.0 - FLOOR_SHARE) * quality(e));
    clamp(e.polarity.sign() * magnitude, -cap, cap)
}

/// Current logLR: the boosted hint when one exists, otherwise the base value.
pub fn evidence_log_lr(e: &Evidence) -> f64 {
    let cap = e.kind.cap();
    match e.log_lr_hint {
        Some(h) if h.is_finite() => clamp(h, -cap, cap),
        _ => base_log_lr(e),
    }
}

/// Multiply the current logLR and store the re-clamped result as the hint.
pub fn scale_log_lr(mut e: Evidence, multiplier: f64) -> Evidence {
    let cap = e.kind.cap();
    let scaled = clamp(evidence_log_lr(&e) * multiplier, -cap, cap);
    e.log_lr_hint = Some(scaled);
    e
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecasting::types::Polarity;

    fn item(kind: EvidenceType, polarity: Polarity, v: f64, c: f64, k: u32) -> Evidence {
        Evidence::new("e", "claim", polarity, kind).with_quality(v, c, k)
    }

    #[test]
    fn test_caps_table_matches_types() {
        for (kind, cap) in TYPE_CAPS {
            assert_eq!(kind.cap(), cap);
        }
    }

    #[test]
    fn test_polarity_signs() {
        let pro = base_log_lr(&item(EvidenceType::B, Polarity::Supports, 0.8, 0.8, 1));
        let con = base_log_lr(&item(EvidenceType::B, Polarity::Contradicts, 0.8, 0.8, 1));
        let neu = base_log_lr(&item(EvidenceType::B, Polarity::Neutral, 0.8, 0.8, 1));
        assert!(pro > 0.0);
        assert_eq!(pro, -con);
        assert_eq!(neu, 0.0);
    }

    #[test]
    fn test_monotonic_in_quality_signals() {
        let low = base_log_lr(&item(EvidenceType::C, Polarity::Supports, 0.2, 0.5, 0));
        let more_v = base_log_lr(&item(EvidenceType::C, Polarity::Supports, 0.6, 0.5, 0));
        let more_c = base_log_lr(&item(EvidenceType::C, Polarity::Supports, 0.6, 0.9, 0));
        let more_k = base_log_lr(&item(EvidenceType::C, Polarity::Supports, 0.6, 0.9, 3));
        assert!(low < more_v && more_v < more_c && more_c < more_k);
    }

    #[test]
    fn test_max_quality_hits_cap_exactly() {
        let e = item(EvidenceType::A, Polarity::Supports, 1.0, 1.0, 64);
        assert!((base_log_lr(&e) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_hint_is_clamped() {
        let mut e = item(EvidenceType::D, Polarity::Supports, 1.0, 1.0, 3);
        e.log_lr_hint = Some(5.0);
        assert_eq!(evidence_log_lr(&e), 0.3);
        let scaled = scale_log_lr(e, 10.0);
        assert_eq!(scaled.log_lr_hint, Some(0.3));
    }
}
