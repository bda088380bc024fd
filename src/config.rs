//! Forecast configuration
//!
//! JSON file on disk (written with defaults on first load), overlaid with
//! `FORECAST_*` environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

use crate::agent::{AgentRole, ForecastError, ForecastResult};
use crate::forecasting::{DEFAULT_DOMAIN_CAP, DEFAULT_MARKET_ALPHA, DEFAULT_RHO};
use crate::tools::HistoryInterval;

pub const DEFAULT_CONFIG_FILE: &str = "forecast.config.json";

/// Model name per pipeline role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoleModels {
    pub planner: String,
    pub researcher: String,
    pub summarizer: String,
    pub critic: String,
    pub analyst: String,
    pub reporter: String,
    pub driver_generator: String,
}

impl Default for RoleModels {
    fn default() -> Self {
        Self {
            planner: AgentRole::Planner.default_model().to_string(),
            researcher: AgentRole::Researcher.default_model().to_string(),
            summarizer: AgentRole::Summarizer.default_model().to_string(),
            critic: AgentRole::Critic.default_model().to_string(),
            analyst: AgentRole::Analyst.default_model().to_string(),
            reporter: AgentRole::Reporter.default_model().to_string(),
            driver_generator: AgentRole::DriverGenerator.default_model().to_string(),
        }
    }
}

impl RoleModels {
    pub fn for_role(&self, role: AgentRole) -> &str {
        match role {
            AgentRole::Planner => &self.planner,
            AgentRole::Researcher => &self.researcher,
            AgentRole::Summarizer => &self.summarizer,
            AgentRole::Critic => &self.critic,
            AgentRole::Analyst => &self.analyst,
            AgentRole::Reporter => &self.reporter,
            AgentRole::DriverGenerator => &self.driver_generator,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForecastConfig {
    /// Maximum accepted evidence items per source host
    pub domain_cap: usize,
    pub default_rho: f64,
    /// Deployment-level `originId -> rho` overrides; critic adjustments win over these
    pub rho_by_cluster: HashMap<String, f64>,
    pub market_alpha: f64,
    pub prior_floor: f64,
    pub prior_ceiling: f64,
    pub max_follow_up_searches: usize,
    pub max_evidence_age_days: i64,
    pub drop_undated: bool,
    pub max_duration_secs: u64,
    pub seed_queries_per_side: usize,
    pub search_start_lookback_days: i64,
    pub models: RoleModels,
    pub with_books: bool,
    pub with_trades: bool,
    pub history_interval: Option<HistoryInterval>,
    pub drivers: Option<Vec<String>>,
    /// Ask the reporter model for a narrative section on top of the template
    pub narrative_report: bool,
    pub llm_base_url: String,
    #[serde(skip_serializing)]
    pub llm_api_key: Option<String>,
    /// JSON search API; DuckDuckGo is used when unset
    pub search_base_url: Option<String>,
    #[serde(skip_serializing)]
    pub search_token: Option<String>,
    pub market_data_url: String,
    pub history_file: PathBuf,
    pub cache_capacity: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            domain_cap: DEFAULT_DOMAIN_CAP,
            default_rho: DEFAULT_RHO,
            rho_by_cluster: HashMap::new(),
            market_alpha: DEFAULT_MARKET_ALPHA,
            prior_floor: 0.1,
            prior_ceiling: 0.9,
            max_follow_up_searches: 10,
            max_evidence_age_days: 730,
            drop_undated: true,
            max_duration_secs: 800,
            seed_queries_per_side: 6,
            search_start_lookback_days: 180,
            models: RoleModels::default(),
            with_books: true,
            with_trades: false,
            history_interval: None,
            drivers: None,
            narrative_report: true,
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_api_key: None,
            search_base_url: None,
            search_token: None,
            market_data_url: "http://localhost:8787".to_string(),
            history_file: PathBuf::from("forecast_history.json"),
            cache_capacity: 512,
        }
    }
}

impl ForecastConfig {
    pub fn validate(&self) -> ForecastResult<()> {
        if !(0.0..=1.0).contains(&self.default_rho) {
            return Err(ForecastError::Config(format!("default_rho {} outside [0, 1]", self.default_rho)));
        }
        if let Some((id, rho)) = self.rho_by_cluster.iter().find(|(_, r)| !(0.0..=1.0).contains(*r)) {
            return Err(ForecastError::Config(format!("rho_by_cluster[{}] = {} outside [0, 1]", id, rho)));
        }
        if !(self.market_alpha > 0.0 && self.market_alpha <= 1.0) {
            return Err(ForecastError::Config(format!("market_alpha {} outside (0, 1]", self.market_alpha)));
        }
        if !(0.0..1.0).contains(&self.prior_floor) || self.prior_ceiling > 1.0 || self.prior_floor >= self.prior_ceiling {
            return Err(ForecastError::Config(format!(
                "prior bounds [{}, {}] are not an increasing sub-range of [0, 1]",
                self.prior_floor, self.prior_ceiling
            )));
        }
        if self.domain_cap < 1 {
            return Err(ForecastError::Config("domain_cap must be at least 1".into()));
        }
        if self.max_duration_secs == 0 {
            return Err(ForecastError::Config("max_duration_secs must be positive".into()));
        }
        Ok(())
    }

    /// Overlay values from `FORECAST_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = non_empty("FORECAST_LLM_BASE_URL") {
            self.llm_base_url = v;
        }
        if let Some(v) = non_empty("FORECAST_LLM_API_KEY") {
            self.llm_api_key = Some(v);
        }
        if let Some(v) = non_empty("FORECAST_SEARCH_BASE_URL") {
            self.search_base_url = Some(v);
        }
        if let Some(v) = non_empty("FORECAST_SEARCH_TOKEN") {
            self.search_token = Some(v);
        }
        if let Some(v) = non_empty("FORECAST_MARKET_DATA_URL") {
            self.market_data_url = v;
        }
    }

    /// Market mid clamped into the prior band; 0.5 when no price is known.
    pub fn prior_from_mid(&self, mid: Option<f64>) -> f64 {
        match mid {
            Some(m) if m.is_finite() => m.clamp(self.prior_floor, self.prior_ceiling),
            _ => 0.5,
        }
    }
}

pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load, writing the defaults first if the file does not exist yet.
    pub async fn load(&self) -> ForecastResult<ForecastConfig> {
        if !self.path.exists() {
            let default = ForecastConfig::default();
            self.save(&default).await?;
            info!("Wrote default configuration to {}", self.path.display());
            return Ok(default);
        }
        let content = fs::read_to_string(&self.path).await?;
        let config: ForecastConfig = serde_json::from_str(&content)
            .map_err(|e| ForecastError::Config(format!("{}: {}", self.path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and overlay the environment.
    pub async fn load_with_env(&self) -> ForecastResult<ForecastConfig> {
        let mut config = self.load().await?;
        config.apply_env();
        Ok(config)
    }

    pub async fn save(&self, config: &ForecastConfig) -> ForecastResult<()> {
        let content = serde_json::to_string_pretty(config).map_err(|e| ForecastError::Config(e.to_string()))?;
        fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_config_save_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let manager = ConfigManager::new(temp_file.path().to_path_buf());

        let mut config = ForecastConfig::default();
        config.domain_cap = 3;
        config.rho_by_cluster.insert("reuters.com".into(), 0.8);
        config.history_interval = Some(HistoryInterval::FourHours);

        manager.save(&config).await.unwrap();
        let loaded = manager.load().await.unwrap();

        assert_eq!(config, loaded);
    }

    #[tokio::test]
    async fn test_config_load_default_writes_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("missing.json");
        let manager = ConfigManager::new(path.clone());

        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded, ForecastConfig::default());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), r#"{"default_rho": 1.5}"#).unwrap();
        let manager = ConfigManager::new(temp_file.path().to_path_buf());

        assert!(matches!(manager.load().await, Err(ForecastError::Config(_))));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: ForecastConfig = serde_json::from_str(r#"{"domain_cap": 2, "models": {"critic": "o3"}}"#).unwrap();
        assert_eq!(config.domain_cap, 2);
        assert_eq!(config.market_alpha, 0.1);
        assert_eq!(config.models.for_role(AgentRole::Critic), "o3");
        assert_eq!(config.models.for_role(AgentRole::Planner), "gpt-4o");
    }

    #[test]
    fn test_validation_bounds() {
        let mut config = ForecastConfig::default();
        assert!(config.validate().is_ok());
        config.prior_floor = 0.9;
        assert!(config.validate().is_err());
        config = ForecastConfig { market_alpha: 0.0, ..Default::default() };
        assert!(config.validate().is_err());
        config = ForecastConfig { domain_cap: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ForecastConfig::default();
        let env: HashMap<&str, &str> = [
            ("FORECAST_LLM_BASE_URL", "http://localhost:11434/v1"),
            ("FORECAST_SEARCH_TOKEN", "tok"),
            ("FORECAST_LLM_API_KEY", "  "),
        ]
        .into_iter()
        .collect();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.llm_base_url, "http://localhost:11434/v1");
        assert_eq!(config.search_token.as_deref(), Some("tok"));
        assert_eq!(config.llm_api_key, None);
    }

    #[test]
    fn test_prior_from_mid() {
        let config = ForecastConfig::default();
        assert_eq!(config.prior_from_mid(Some(0.97)), 0.9);
        assert_eq!(config.prior_from_mid(Some(0.02)), 0.1);
        assert_eq!(config.prior_from_mid(Some(0.42)), 0.42);
        assert_eq!(config.prior_from_mid(None), 0.5);
    }
}
