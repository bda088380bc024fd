//! Critic
//!
//! Reviews first-cycle evidence and emits exclusion flags, correlation
//! overrides and targeted follow-up searches.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::agent::{invoke_structured, truncate, AgentRole, ForecastResult, LLMProvider, StructuredSchema, TaskSpec};
use crate::forecasting::{Evidence, Polarity};

/// Hard upper bound on follow-up directives per critique cycle.
pub const MAX_FOLLOW_UP_SEARCHES: usize = 10;

/// Which side of the question a follow-up search is meant to inform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    For,
    Against,
    Neutral,
    Both,
}

impl Side {
    /// Polarity stamped onto every item found for this side.
    pub fn forced_polarity(&self) -> Polarity {
        match self {
            Side::For => Polarity::Supports,
            Side::Against => Polarity::Contradicts,
            Side::Neutral | Side::Both => Polarity::Neutral,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Side::For => "FOR",
            Side::Against => "AGAINST",
            Side::Neutral => "NEUTRAL",
            Side::Both => "BOTH",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FollowUpSearch {
    pub query: String,
    #[serde(default)]
    pub rationale: String,
    pub side: Side,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Critique {
    #[serde(default)]
    pub missing: Vec<String>,
    #[serde(default)]
    pub duplication_flags: Vec<String>,
    #[serde(default)]
    pub data_concerns: Vec<String>,
    #[serde(default)]
    pub follow_up_searches: Vec<FollowUpSearch>,
    #[serde(default)]
    pub correlation_adjustments: HashMap<String, f64>,
    #[serde(default)]
    pub confidence_issues: Vec<String>,
}

impl Critique {
    /// Whether a duplication flag or data concern matches this item.
    /// Flags match `id`/`originId` by substring; concerns match claim/originId case-insensitively.
    pub fn excludes(&self, e: &Evidence) -> bool {
        let duplicate = self
            .duplication_flags
            .iter()
            .any(|flag| e.id.contains(flag.as_str()) || e.origin_id.contains(flag.as_str()));
        if duplicate {
            return true;
        }
        let claim = e.claim.to_lowercase();
        let origin = e.origin_id.to_lowercase();
        self.data_concerns.iter().any(|concern| {
            let c = concern.to_lowercase();
            claim.contains(&c) || origin.contains(&c)
        })
    }

    pub fn limit_follow_ups(&mut self, max: usize) {
        self.follow_up_searches.truncate(max.min(MAX_FOLLOW_UP_SEARCHES));
    }
}

fn non_empty(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl StructuredSchema for Critique {
    const NAME: &'static str = "critique";

    fn validate(mut self) -> Result<Self, String> {
        self.missing = non_empty(self.missing);
        // An empty flag would substring-match every item.
        self.duplication_flags = non_empty(self.duplication_flags);
        self.data_concerns = non_empty(self.data_concerns);
        self.confidence_issues = non_empty(self.confidence_issues);
        self.follow_up_searches.retain(|f| !f.query.trim().is_empty());
        self.follow_up_searches.truncate(MAX_FOLLOW_UP_SEARCHES);
        self.correlation_adjustments
            .retain(|k, rho| !k.trim().is_empty() && rho.is_finite() && (0.0..=1.0).contains(rho));
        Ok(self)
    }
}

pub struct Critic {
    provider: Arc<dyn LLMProvider>,
    model: String,
    max_follow_ups: usize,
}

impl Critic {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            model: AgentRole::Critic.default_model().to_string(),
            max_follow_ups: MAX_FOLLOW_UP_SEARCHES,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_follow_ups(mut self, max: usize) -> Self {
        self.max_follow_ups = max.min(MAX_FOLLOW_UP_SEARCHES);
        self
    }

    pub async fn critique(&self, question: &str, pro: &[Evidence], con: &[Evidence]) -> ForecastResult<Critique> {
        let list = |items: &[Evidence]| {
            items
                .iter()
                .map(|e| {
                    format!(
                        "- {} [{}]: {} (Type {}, verifiability {:.2}, date {})",
                        e.id,
                        e.origin_id,
                        truncate(&e.claim, 280),
                        e.kind,
                        e.verifiability,
                        e.published_at.as_deref().unwrap_or("undated")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let prompt = format!(
            r#"Question: {question}

Supporting evidence ({np} items):
{pro}

Contradicting evidence ({nc} items):
{con}

Return JSON with:
- "missing": disconfirming evidence or failure modes not yet covered
- "duplicationFlags": evidence ids or originId fragments suspected of double-counting
- "dataConcerns": short phrases naming off-topic, biased or low-quality material to exclude
- "followUpSearches": at most {max} objects {{"query", "rationale", "side": "FOR"|"AGAINST"|"NEUTRAL"|"BOTH"}}; natural-language queries without outlet prefixes or site: filters
- "correlationAdjustments": {{originId: rho in [0,1]}} for clusters that look correlated
- "confidenceIssues": factors that should reduce confidence"#,
            np = pro.len(),
            nc = con.len(),
            pro = list(pro),
            con = list(con),
            max = self.max_follow_ups,
        );

        let task = TaskSpec::new(&self.model, prompt).with_system(AgentRole::Critic.system_prompt());
        let mut critique = invoke_structured::<Critique>(self.provider.as_ref(), &task)
            .await
            .into_result()?;
        critique.limit_follow_ups(self.max_follow_ups);

        info!(
            "Critique: missing={}, duplicationFlags={}, dataConcerns={}, followUps={}, correlationAdjustments={}",
            critique.missing.len(),
            critique.duplication_flags.len(),
            critique.data_concerns.len(),
            critique.follow_up_searches.len(),
            critique.correlation_adjustments.len()
        );
        Ok(critique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::parse_structured;
    use crate::forecasting::EvidenceType;

    fn ev(id: &str, origin: &str, claim: &str) -> Evidence {
        Evidence::new(id, claim, Polarity::Supports, EvidenceType::B).with_origin(origin)
    }

    #[test]
    fn test_side_forces_polarity() {
        assert_eq!(Side::For.forced_polarity(), Polarity::Supports);
        assert_eq!(Side::Against.forced_polarity(), Polarity::Contradicts);
        assert_eq!(Side::Both.forced_polarity(), Polarity::Neutral);
        assert_eq!(Side::Neutral.forced_polarity(), Polarity::Neutral);
    }

    #[test]
    fn test_validate_bounds_and_cleans() {
        let searches: Vec<String> = (0..14)
            .map(|i| format!(r#"{{"query": "q{}", "rationale": "r", "side": "BOTH"}}"#, i))
            .collect();
        let raw = format!(
            r#"{{"duplicationFlags": ["", "pro-1"], "followUpSearches": [{}],
                "correlationAdjustments": {{"a.com": 0.8, "b.com": 1.7}}}}"#,
            searches.join(",")
        );
        let critique: Critique = parse_structured(&raw).unwrap();
        assert_eq!(critique.follow_up_searches.len(), MAX_FOLLOW_UP_SEARCHES);
        assert_eq!(critique.duplication_flags, vec!["pro-1"]);
        assert_eq!(critique.correlation_adjustments.len(), 1);
        assert_eq!(critique.follow_up_searches[0].side, Side::Both);
    }

    #[test]
    fn test_unknown_side_is_mismatch() {
        let raw = r#"{"followUpSearches": [{"query": "q", "rationale": "r", "side": "MAYBE"}]}"#;
        assert!(parse_structured::<Critique>(raw).is_err());
    }

    #[test]
    fn test_excludes_matches_flags_and_concerns() {
        let critique = Critique {
            duplication_flags: vec!["siteA".into()],
            data_concerns: vec!["Vaccine Study".into()],
            ..Default::default()
        };
        assert!(critique.excludes(&ev("pro-1", "siteA.com", "x")));
        assert!(critique.excludes(&ev("pro-2", "b.com", "A new vaccine study shows")));
        assert!(!critique.excludes(&ev("pro-3", "b.com", "Polls tighten")));
    }
}
