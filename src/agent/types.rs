use serde::{Deserialize, Serialize};

/// Roles of the language-model calls made during a forecast run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Planner,
    Researcher,
    Summarizer,
    Critic,
    Analyst,
    Reporter,
    DriverGenerator,
}

impl AgentRole {
    /// Get the default model for this role
    pub fn default_model(&self) -> &'static str {
        match self {
            AgentRole::Planner => "gpt-4o",
            AgentRole::Researcher => "gpt-4o",
            AgentRole::Summarizer => "gpt-4o-mini",
            AgentRole::Critic => "gpt-4o",
            AgentRole::Analyst => "gpt-4o-mini",
            AgentRole::Reporter => "gpt-4o-mini",
            AgentRole::DriverGenerator => "gpt-4o-mini",
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            AgentRole::Planner =>
                "You are the Planner. Break the forecasting question into causal pathways and research directions. \
                 Focus on what could cause the outcome, not on what the final state looks like. \
                 Return only JSON.",

            AgentRole::Researcher =>
                "You are an evidence researcher. Stay strictly on-topic for the question. \
                 Use only the source URLs you were given and never invent URLs. \
                 Classify each item A (primary/official), B (high-quality secondary), C (standard secondary) or D (weak/speculative). \
                 Return only JSON.",

            AgentRole::Summarizer =>
                "You compress research notes into a concise, high-signal summary. \
                 Preserve key facts, entities, dates and numbers. No filler.",

            AgentRole::Critic =>
                "You are the Skeptic. Identify gaps, duplicate wiring, biases and quality issues in the evidence, \
                 then give targeted follow-up searches tagged FOR, AGAINST, NEUTRAL or BOTH. \
                 Return only JSON.",

            AgentRole::Analyst =>
                "You are a strict evidence assessor for prediction questions. \
                 Judge topic relevance and specialist source authority. Return only JSON.",

            AgentRole::Reporter =>
                "You write clean, skimmable Markdown explaining how evidence moved a probability estimate. \
                 Cite evidence ids, not raw URLs.",

            AgentRole::DriverGenerator =>
                "You are an expert analyst. Identify the key factors most likely to move this prediction market. \
                 Return only JSON.",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Planner => write!(f, "Planner"),
            AgentRole::Researcher => write!(f, "Researcher"),
            AgentRole::Summarizer => write!(f, "Summarizer"),
            AgentRole::Critic => write!(f, "Critic"),
            AgentRole::Analyst => write!(f, "Analyst"),
            AgentRole::Reporter => write!(f, "Reporter"),
            AgentRole::DriverGenerator => write!(f, "DriverGenerator"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_default_model() {
        assert_eq!(AgentRole::Planner.default_model(), "gpt-4o");
        assert_eq!(AgentRole::Summarizer.default_model(), "gpt-4o-mini");
    }

    #[test]
    fn test_role_serde_names() {
        let json = serde_json::to_string(&AgentRole::DriverGenerator).unwrap();
        assert_eq!(json, "\"driver_generator\"");
        let back: AgentRole = serde_json::from_str("\"critic\"").unwrap();
        assert_eq!(back, AgentRole::Critic);
    }

    #[test]
    fn test_structured_roles_ask_for_json() {
        for role in [AgentRole::Planner, AgentRole::Critic, AgentRole::Researcher] {
            assert!(role.system_prompt().contains("JSON"));
        }
    }
}
