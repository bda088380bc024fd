use std::collections::HashSet;

use super::aggregator::BlendedPosterior;
use super::types::ForecastCard;

/// Inputs for the one-time card assembly.
pub struct CardParts {
    pub question: String,
    pub drivers: Vec<String>,
    pub provenance: Vec<String>,
    pub markdown_report: String,
}

/// Assemble the write-once forecast card. Provenance is de-duplicated in order.
pub fn make_forecast_card(posterior: BlendedPosterior, parts: CardParts) -> ForecastCard {
    let mut seen = HashSet::new();
    let provenance = parts
        .provenance
        .into_iter()
        .filter(|u| !u.trim().is_empty())
        .filter(|u| seen.insert(u.clone()))
        .collect();

    let neutral = posterior.neutral();
    ForecastCard {
        question: parts.question,
        p0: neutral.p0(),
        p_neutral: neutral.p_neutral(),
        p_aware: posterior.p_aware(),
        alpha: posterior.alpha(),
        drivers: parts.drivers,
        influence: neutral.influence().to_vec(),
        clusters: neutral.clusters().to_vec(),
        provenance,
        markdown_report: parts.markdown_report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecasting::aggregator::aggregate_neutral;
    use std::collections::HashMap;

    #[test]
    fn test_card_dedupes_provenance() {
        let posterior = aggregate_neutral(0.5, &[], &HashMap::new(), 0.5).without_market(0.1);
        let card = make_forecast_card(
            posterior,
            CardParts {
                question: "Q?".into(),
                drivers: vec!["d".into()],
                provenance: vec!["https://a.com".into(), "".into(), "https://b.com".into(), "https://a.com".into()],
                markdown_report: "# r".into(),
            },
        );
        assert_eq!(card.provenance, vec!["https://a.com", "https://b.com"]);
        assert_eq!(card.p_aware, None);
        assert_eq!(card.alpha, 0.1);
    }
}
