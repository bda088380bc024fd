//! Key-driver generation

use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agent::{invoke_structured, AgentRole, LLMProvider, StructuredOutcome, StructuredSchema, TaskSpec};
use crate::tools::MarketPayload;

const MIN_DRIVERS: usize = 3;
const MAX_DRIVERS: usize = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct DriverSet {
    pub drivers: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl StructuredSchema for DriverSet {
    const NAME: &'static str = "drivers";

    fn validate(mut self) -> Result<Self, String> {
        self.drivers = self
            .drivers
            .into_iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        if self.drivers.len() < MIN_DRIVERS {
            return Err(format!("expected at least {} drivers, got {}", MIN_DRIVERS, self.drivers.len()));
        }
        self.drivers.truncate(MAX_DRIVERS);
        Ok(self)
    }
}

/// Keyword-matched generic drivers used when the model is unavailable.
pub fn fallback_drivers(question: &str) -> Vec<String> {
    let q = question.to_lowercase();
    let has_word = |w: &str| q.split(|c: char| !c.is_alphanumeric()).any(|t| t == w);

    let drivers: [&str; 4] = if q.contains("election") || q.contains("political") {
        ["Polling data", "Economic conditions", "Campaign events", "Voter turnout"]
    } else if q.contains("bitcoin") || q.contains("crypto") {
        ["Regulatory environment", "Institutional adoption", "Market sentiment", "Technical developments"]
    } else if has_word("ai") || q.contains("technology") {
        ["Research breakthroughs", "Compute scaling", "Regulatory framework", "Investment funding"]
    } else if q.contains("climate") || q.contains("environment") {
        ["Policy changes", "Technology adoption", "Economic incentives", "International cooperation"]
    } else {
        ["Market conditions", "Regulatory environment", "Public sentiment", "Economic factors"]
    };
    drivers.iter().map(|d| d.to_string()).collect()
}

pub struct DriverGenerator {
    provider: Arc<dyn LLMProvider>,
    model: String,
}

impl DriverGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            model: AgentRole::DriverGenerator.default_model().to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Never fails: any model problem falls back to generic drivers.
    pub async fn generate(&self, market: &MarketPayload) -> Vec<String> {
        let facts = &market.market_facts;
        let fmt_num = |v: Option<f64>| v.map(|n| format!("${:.0}", n)).unwrap_or_else(|| "N/A".to_string());
        let prompt = format!(
            "Identify 3-5 key drivers that could influence the outcome of this prediction market.\n\n\
             Question: {}\nCurrent market price: {}\nVolume: {}\nLiquidity: {}\n\n\
             Consider economic indicators, political developments, technological progress, regulatory changes, \
             social trends and historical precedents.\n\n\
             Return JSON: {{\"drivers\": [\"string\"], \"reasoning\": \"string\"}}",
            facts.question,
            market
                .current_mid()
                .map(|m| format!("{:.1}%", m * 100.0))
                .unwrap_or_else(|| "N/A".to_string()),
            fmt_num(facts.volume),
            fmt_num(facts.liquidity),
        );
        let task = TaskSpec::new(&self.model, prompt).with_system(AgentRole::DriverGenerator.system_prompt());

        match invoke_structured::<DriverSet>(self.provider.as_ref(), &task).await {
            StructuredOutcome::Ok(set) => {
                info!("Generated drivers: {} ({})", set.drivers.join(", "), set.reasoning);
                set.drivers
            }
            StructuredOutcome::SchemaMismatch(e) | StructuredOutcome::ProviderFailure(e) => {
                warn!("Driver generation failed, using fallback drivers: {}", e);
                fallback_drivers(&facts.question)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::parse_structured;
    use async_trait::async_trait;

    struct Reply(&'static str);

    #[async_trait]
    impl LLMProvider for Reply {
        async fn generate(&self, _model: &str, _prompt: String, _system: Option<String>) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn market(question: &str) -> MarketPayload {
        let mut payload = MarketPayload::default();
        payload.market_facts.question = question.to_string();
        payload
    }

    #[test]
    fn test_fallback_keywords() {
        assert_eq!(fallback_drivers("Will the election be close?")[0], "Polling data");
        assert_eq!(fallback_drivers("Bitcoin above 100k?")[0], "Regulatory environment");
        assert_eq!(fallback_drivers("Will an AI lab ship AGI?")[0], "Research breakthroughs");
        // "ai" inside another word does not count
        assert_eq!(fallback_drivers("Will it rain in Spain?")[0], "Market conditions");
    }

    #[test]
    fn test_driver_bounds() {
        assert!(parse_structured::<DriverSet>(r#"{"drivers": ["a", "b"]}"#).is_err());
        let set: DriverSet = parse_structured(r#"{"drivers": ["a", "b", "c", "d", "e", "f"]}"#).unwrap();
        assert_eq!(set.drivers.len(), 5);
    }

    #[tokio::test]
    async fn test_generate_falls_back() {
        let gen = DriverGenerator::new(Arc::new(Reply("not json")));
        let drivers = gen.generate(&market("Climate accord signed?")).await;
        assert_eq!(drivers[0], "Policy changes");

        let gen = DriverGenerator::new(Arc::new(Reply(r#"{"drivers": ["x", "y", "z"], "reasoning": "r"}"#)));
        assert_eq!(gen.generate(&market("Q")).await, vec!["x", "y", "z"]);
    }
}
