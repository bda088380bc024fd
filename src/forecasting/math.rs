//! Log-odds helpers

/// Probabilities are kept away from 0/1 so logit stays finite.
const EPS: f64 = 1e-6;

pub fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

pub fn logit(p: f64) -> f64 {
    let p = clamp(p, EPS, 1.0 - EPS);
    (p / (1.0 - p)).ln()
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logit_sigmoid_inverse() {
        for p in [0.1, 0.25, 0.5, 0.8, 0.95] {
            assert!((sigmoid(logit(p)) - p).abs() < 1e-12);
        }
    }

    #[test]
    fn test_logit_is_finite_at_extremes() {
        assert!(logit(0.0).is_finite());
        assert!(logit(1.0).is_finite());
    }
}
