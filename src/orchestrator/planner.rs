//! Research Planner
//!
//! Turns a forecasting question into causal subclaims, search seeds and
//! recency guidance.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::agent::{invoke_structured, AgentRole, ForecastResult, LLMProvider, StructuredSchema, TaskSpec};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecencyGuidance {
    #[serde(default)]
    pub needed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
}

/// A research plan for one question
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResearchPlan {
    #[serde(default)]
    pub subclaims: Vec<String>,
    #[serde(default)]
    pub key_variables: Vec<String>,
    pub search_seeds: Vec<String>,
    #[serde(default)]
    pub decision_criteria: Vec<String>,
    #[serde(default)]
    pub recency: RecencyGuidance,
    #[serde(default)]
    pub adjacent_event_types: Vec<String>,
    #[serde(default)]
    pub adjacent_seeds: Vec<String>,
}

impl ResearchPlan {
    /// Start date proposed by the planner, if it parses as `YYYY-MM-DD`.
    pub fn start_date(&self) -> Option<NaiveDate> {
        let raw = self.recency.start_date.as_deref()?.trim();
        NaiveDate::parse_from_str(raw.get(..10).unwrap_or(raw), "%Y-%m-%d").ok()
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_lowercase()))
        .collect()
}

impl StructuredSchema for ResearchPlan {
    const NAME: &'static str = "research_plan";

    fn validate(mut self) -> Result<Self, String> {
        self.subclaims = clean_list(self.subclaims);
        self.key_variables = clean_list(self.key_variables);
        self.search_seeds = clean_list(self.search_seeds);
        self.decision_criteria = clean_list(self.decision_criteria);
        self.adjacent_event_types = clean_list(self.adjacent_event_types);
        self.adjacent_seeds = clean_list(self.adjacent_seeds);
        if self.search_seeds.is_empty() {
            return Err("plan has no search seeds".to_string());
        }
        Ok(self)
    }
}

pub struct ResearchPlanner {
    provider: Arc<dyn LLMProvider>,
    model: String,
}

impl ResearchPlanner {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            model: AgentRole::Planner.default_model().to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub async fn plan(&self, question: &str) -> ForecastResult<ResearchPlan> {
        info!("Planning research for: {}", question);

        let prompt = format!(
            r#"Question: {question}

This is a prediction question, not a fact check. Return JSON with:
- "subclaims": 2-10 causal pathways that could produce the outcome (mechanisms, not end states)
- "keyVariables": 2-15 leading indicators that would move before the outcome
- "searchSeeds": about 20 specific, diversified search queries targeting those drivers; no site: filters, no outlet-name prefixes
- "decisionCriteria": 3-8 criteria for what counts as evidence of each pathway
- "recency": {{"needed": bool, "startDate": "YYYY-MM-DD" when needed}}
- "adjacentEventTypes": 4-10 catalyst categories (platform-policy, regulatory/legal, award/media, viral, release/product, macro)
- "adjacentSeeds": 6-12 queries combining those categories with entities in this domain"#
        );

        let task = TaskSpec::new(&self.model, prompt).with_system(AgentRole::Planner.system_prompt());
        let plan = invoke_structured::<ResearchPlan>(self.provider.as_ref(), &task)
            .await
            .into_result()?;

        info!(
            "Plan generated: subclaims={}, seeds={}, variables={}, criteria={}",
            plan.subclaims.len(),
            plan.search_seeds.len(),
            plan.key_variables.len(),
            plan.decision_criteria.len()
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{parse_structured, ForecastError};
    use async_trait::async_trait;

    struct Scripted(&'static str);

    #[async_trait]
    impl LLMProvider for Scripted {
        async fn generate(&self, _model: &str, _prompt: String, _system: Option<String>) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_plan_validation_cleans_lists() {
        let plan: ResearchPlan = parse_structured(
            r#"{"subclaims": ["a cause", " "], "searchSeeds": ["fed cut 2025", "Fed cut 2025", ""],
                "recency": {"needed": true, "startDate": "2025-06-01T00:00:00Z"}}"#,
        )
        .unwrap();
        assert_eq!(plan.subclaims, vec!["a cause"]);
        assert_eq!(plan.search_seeds, vec!["fed cut 2025"]);
        assert_eq!(plan.start_date(), NaiveDate::from_ymd_opt(2025, 6, 1));
        assert!(plan.adjacent_seeds.is_empty());
    }

    #[test]
    fn test_plan_without_seeds_is_mismatch() {
        assert!(parse_structured::<ResearchPlan>(r#"{"subclaims": ["x"], "searchSeeds": []}"#).is_err());
        assert!(parse_structured::<ResearchPlan>(r#"{"subclaims": ["x"]}"#).is_err());
    }

    #[tokio::test]
    async fn test_planner_surfaces_parse_error() {
        let planner = ResearchPlanner::new(Arc::new(Scripted("I cannot help with that")));
        let err = planner.plan("Will it rain?").await.unwrap_err();
        assert!(matches!(err, ForecastError::Parse(_)));

        let planner = ResearchPlanner::new(Arc::new(Scripted(r#"{"searchSeeds": ["rain forecast"]}"#)));
        let plan = planner.plan("Will it rain?").await.unwrap();
        assert_eq!(plan.search_seeds.len(), 1);
    }
}
