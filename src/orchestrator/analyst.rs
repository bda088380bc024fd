//! Analyst
//!
//! The Aggregate stage. Applies critic exclusions, the topic-relevance
//! filter and the logLR adjustments, then fixes the neutral posterior.
//! The market is consulted only after that.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::agent::{
    invoke_structured, truncate, AgentRole, ForecastError, ForecastResult, LLMProvider, StructuredOutcome,
    StructuredSchema, TaskSpec,
};
use crate::config::ForecastConfig;
use crate::forecasting::{
    aggregate_neutral, BlendedPosterior, Evidence, MarketSnapshot, NeutralPosterior, NicheAuthorityScorer,
    PathwayBooster, RecencyWeighter,
};
use crate::tools::{FetchOptions, MarketDataFetcher, MarketPayload};

use super::critic::Critique;

/// Source of the live market probability, read after the neutral posterior is fixed.
#[async_trait]
pub trait MarketFn: Send + Sync {
    async fn snapshot(&self, question: &str) -> ForecastResult<MarketSnapshot>;
}

/// Uses the price already present in a fetched payload.
pub struct PayloadMarket {
    payload: MarketPayload,
}

impl PayloadMarket {
    pub fn new(payload: MarketPayload) -> Self {
        Self { payload }
    }
}

#[async_trait]
impl MarketFn for PayloadMarket {
    async fn snapshot(&self, _question: &str) -> ForecastResult<MarketSnapshot> {
        let probability = self
            .payload
            .current_mid()
            .ok_or_else(|| ForecastError::EmptyResult("market payload has no mid price".into()))?;
        Ok(MarketSnapshot {
            probability,
            as_of: Utc::now(),
            source: Some(self.payload.platform.clone()),
        })
    }
}

/// Re-reads the market when the snapshot is requested.
pub struct LiveMarket {
    fetcher: Arc<dyn MarketDataFetcher>,
    market_url: String,
    opts: FetchOptions,
}

impl LiveMarket {
    pub fn new(fetcher: Arc<dyn MarketDataFetcher>, market_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            market_url: market_url.into(),
            opts: FetchOptions {
                with_books: true,
                with_trades: false,
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl MarketFn for LiveMarket {
    async fn snapshot(&self, question: &str) -> ForecastResult<MarketSnapshot> {
        let payload = self
            .fetcher
            .fetch(&self.market_url, &self.opts)
            .await
            .map_err(|e| ForecastError::Provider(format!("{:#}", e)))?;
        PayloadMarket::new(payload).snapshot(question).await
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelevanceVerdict {
    id: String,
    is_relevant: bool,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelevanceVerdicts {
    #[serde(default)]
    relevant_evidence: Vec<RelevanceVerdict>,
}

impl StructuredSchema for RelevanceVerdicts {
    const NAME: &'static str = "topic_relevance";
}

#[derive(Debug, Clone, Deserialize)]
struct NicheScore {
    id: String,
    authority: f64,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, Clone, Deserialize)]
struct NicheScores {
    #[serde(default)]
    niche: Vec<NicheScore>,
}

impl StructuredSchema for NicheScores {
    const NAME: &'static str = "niche_authority";

    fn validate(mut self) -> Result<Self, String> {
        self.niche.retain(|s| s.authority.is_finite());
        for s in &mut self.niche {
            s.authority = s.authority.clamp(0.0, 1.0);
        }
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub struct AnalystSettings {
    pub default_rho: f64,
    pub rho_by_cluster: HashMap<String, f64>,
    pub market_alpha: f64,
}

impl AnalystSettings {
    pub fn from_config(config: &ForecastConfig) -> Self {
        Self {
            default_rho: config.default_rho,
            rho_by_cluster: config.rho_by_cluster.clone(),
            market_alpha: config.market_alpha,
        }
    }
}

impl Default for AnalystSettings {
    fn default() -> Self {
        Self::from_config(&ForecastConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub posterior: BlendedPosterior,
    /// Adjusted items that entered the aggregation
    pub evidence_used: Vec<Evidence>,
    pub excluded: usize,
}

pub struct Analyst {
    provider: Arc<dyn LLMProvider>,
    model: String,
    settings: AnalystSettings,
    now: DateTime<Utc>,
}

impl Analyst {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            model: AgentRole::Analyst.default_model().to_string(),
            settings: AnalystSettings::default(),
            now: Utc::now(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_settings(mut self, settings: AnalystSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Full Aggregate stage. `market` is asked for a price only after the
    /// neutral posterior exists; a market failure leaves `p_aware` unset.
    pub async fn analyze(
        &self,
        question: &str,
        p0: f64,
        evidence: Vec<Evidence>,
        critique: &Critique,
        market: Option<&dyn MarketFn>,
    ) -> AnalysisOutcome {
        let before = evidence.len();
        let (neutral, evidence_used) = self.neutral(question, p0, evidence, critique).await;
        let excluded = before - evidence_used.len();

        let posterior = match market {
            Some(market) => match market.snapshot(question).await {
                Ok(snapshot) => neutral.blend(&snapshot, self.settings.market_alpha),
                Err(e) => {
                    warn!("Market snapshot unavailable, reporting neutral only: {}", e);
                    neutral.without_market(self.settings.market_alpha)
                }
            },
            None => neutral.without_market(self.settings.market_alpha),
        };

        info!(
            "Aggregation: p0={:.3}, pNeutral={:.3}, pAware={}, used={}, excluded={}",
            posterior.neutral().p0(),
            posterior.neutral().p_neutral(),
            posterior.p_aware().map(|p| format!("{:.3}", p)).unwrap_or_else(|| "n/a".into()),
            evidence_used.len(),
            excluded
        );

        AnalysisOutcome {
            posterior,
            evidence_used,
            excluded,
        }
    }

    /// Evidence-only half of the stage. Never sees a market price.
    pub async fn neutral(
        &self,
        question: &str,
        p0: f64,
        evidence: Vec<Evidence>,
        critique: &Critique,
    ) -> (NeutralPosterior, Vec<Evidence>) {
        let before = evidence.len();
        let kept: Vec<Evidence> = evidence.into_iter().filter(|e| !critique.excludes(e)).collect();
        if kept.len() != before {
            info!("Critic filter removed {} evidence items", before - kept.len());
        }

        let kept = self.filter_relevant(question, kept).await;
        let authority = self.score_authority(question, &kept).await;

        let recency = RecencyWeighter::new(self.now);
        let adjusted: Vec<Evidence> = NicheAuthorityScorer::apply_all(kept, &authority)
            .into_iter()
            .map(PathwayBooster::apply)
            .map(|e| recency.apply(e))
            .collect();

        let mut rho = self.settings.rho_by_cluster.clone();
        rho.extend(critique.correlation_adjustments.iter().map(|(k, v)| (k.clone(), *v)));

        let neutral = aggregate_neutral(p0, &adjusted, &rho, self.settings.default_rho);
        (neutral, adjusted)
    }

    async fn filter_relevant(&self, question: &str, evidence: Vec<Evidence>) -> Vec<Evidence> {
        if evidence.is_empty() {
            return evidence;
        }
        let prompt = format!(
            "Question: {}\n\nFor each evidence item decide whether it is about the question's subject. \
             Mark unrelated entities or topics irrelevant.\n\n{}\n\n\
             Return JSON: {{\"relevantEvidence\": [{{\"id\": \"string\", \"isRelevant\": true, \"reasoning\": \"string\"}}]}}",
            question,
            evidence_list(&evidence)
        );
        let task = TaskSpec::new(&self.model, prompt).with_system(AgentRole::Analyst.system_prompt());

        match invoke_structured::<RelevanceVerdicts>(self.provider.as_ref(), &task).await {
            StructuredOutcome::Ok(verdicts) => {
                let irrelevant: HashSet<String> = verdicts
                    .relevant_evidence
                    .into_iter()
                    .filter(|v| !v.is_relevant)
                    .inspect(|v| info!("Dropping off-topic evidence {}: {}", v.id, truncate(&v.reasoning, 120)))
                    .map(|v| v.id)
                    .collect();
                evidence.into_iter().filter(|e| !irrelevant.contains(&e.id)).collect()
            }
            StructuredOutcome::SchemaMismatch(e) | StructuredOutcome::ProviderFailure(e) => {
                warn!("Topic relevance check failed, keeping all evidence: {}", e);
                evidence
            }
        }
    }

    async fn score_authority(&self, question: &str, evidence: &[Evidence]) -> HashMap<String, f64> {
        if evidence.is_empty() {
            return HashMap::new();
        }
        let prompt = format!(
            "Question: {}\n\nRate each source's authority in [0,1] as a specialist outlet for this topic, \
             independent of general brand reputation.\n\n{}\n\n\
             Return JSON: {{\"niche\": [{{\"id\": \"string\", \"authority\": 0.0, \"rationale\": \"string\"}}]}}",
            question,
            evidence_list(evidence)
        );
        let task = TaskSpec::new(&self.model, prompt).with_system(AgentRole::Analyst.system_prompt());

        match invoke_structured::<NicheScores>(self.provider.as_ref(), &task).await {
            StructuredOutcome::Ok(scores) => scores
                .niche
                .into_iter()
                .inspect(|s| tracing::debug!("niche {} = {:.2} ({})", s.id, s.authority, truncate(&s.rationale, 80)))
                .map(|s| (s.id, s.authority))
                .collect(),
            StructuredOutcome::SchemaMismatch(e) | StructuredOutcome::ProviderFailure(e) => {
                warn!("Niche authority scoring failed, applying no boost: {}", e);
                HashMap::new()
            }
        }
    }
}

fn evidence_list(evidence: &[Evidence]) -> String {
    evidence
        .iter()
        .map(|e| {
            format!(
                "- {} [{}] {}: {}",
                e.id,
                e.kind,
                e.urls.first().map(String::as_str).unwrap_or(e.origin_id.as_str()),
                truncate(&e.claim, 240)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecasting::{evidence_log_lr, EvidenceType, Polarity};
    use crate::tools::OutcomeQuote;

    struct Scripted {
        relevance: &'static str,
        niche: &'static str,
    }

    #[async_trait]
    impl LLMProvider for Scripted {
        async fn generate(&self, _model: &str, prompt: String, _system: Option<String>) -> anyhow::Result<String> {
            if prompt.contains("relevantEvidence") {
                Ok(self.relevance.to_string())
            } else if prompt.contains("\"niche\"") {
                Ok(self.niche.to_string())
            } else {
                anyhow::bail!("unexpected prompt")
            }
        }
    }

    struct Failing;

    #[async_trait]
    impl LLMProvider for Failing {
        async fn generate(&self, _model: &str, _prompt: String, _system: Option<String>) -> anyhow::Result<String> {
            anyhow::bail!("provider down")
        }
    }

    struct FixedMarket(f64);

    #[async_trait]
    impl MarketFn for FixedMarket {
        async fn snapshot(&self, _question: &str) -> ForecastResult<MarketSnapshot> {
            Ok(MarketSnapshot { probability: self.0, as_of: Utc::now(), source: None })
        }
    }

    struct BrokenMarket;

    #[async_trait]
    impl MarketFn for BrokenMarket {
        async fn snapshot(&self, _question: &str) -> ForecastResult<MarketSnapshot> {
            Err(ForecastError::Provider("timeout".into()))
        }
    }

    fn ev(id: &str, origin: &str, polarity: Polarity) -> Evidence {
        Evidence::new(id, format!("claim {}", id), polarity, EvidenceType::B)
            .with_origin(origin)
            .with_quality(0.8, 0.8, 1)
    }

    fn sample() -> Vec<Evidence> {
        vec![
            ev("pro-1", "a.com", Polarity::Supports),
            ev("pro-2", "b.com", Polarity::Supports),
            ev("con-1", "c.com", Polarity::Contradicts),
        ]
    }

    #[tokio::test]
    async fn test_failures_degrade_without_filtering() {
        let analyst = Analyst::new(Arc::new(Failing));
        let out = analyst.analyze("Q?", 0.5, sample(), &Critique::default(), None).await;
        assert_eq!(out.evidence_used.len(), 3);
        assert_eq!(out.excluded, 0);
        assert_eq!(out.posterior.p_aware(), None);
    }

    #[tokio::test]
    async fn test_exclusion_and_relevance() {
        let analyst = Analyst::new(Arc::new(Scripted {
            relevance: r#"{"relevantEvidence": [{"id": "pro-2", "isRelevant": false, "reasoning": "other team"}]}"#,
            niche: r#"{"niche": []}"#,
        }));
        let critique = Critique { duplication_flags: vec!["c.com".into()], ..Default::default() };
        let out = analyst.analyze("Q?", 0.5, sample(), &critique, None).await;
        let ids: Vec<&str> = out.evidence_used.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["pro-1"]);
        assert_eq!(out.excluded, 2);
    }

    #[tokio::test]
    async fn test_niche_boost_respects_cap() {
        let analyst = Analyst::new(Arc::new(Scripted {
            relevance: r#"{"relevantEvidence": []}"#,
            niche: r#"{"niche": [{"id": "pro-1", "authority": 4.0}]}"#,
        }));
        let out = analyst.analyze("Q?", 0.5, sample(), &Critique::default(), None).await;
        for e in &out.evidence_used {
            assert!(evidence_log_lr(e).abs() <= e.kind.cap() + 1e-12);
        }
    }

    #[tokio::test]
    async fn test_neutral_is_independent_of_market() {
        let analyst = Analyst::new(Arc::new(Failing)).with_now(Utc::now());
        let without = analyst.analyze("Q?", 0.4, sample(), &Critique::default(), None).await;
        let with = analyst
            .analyze("Q?", 0.4, sample(), &Critique::default(), Some(&FixedMarket(0.9)))
            .await;
        assert_eq!(
            without.posterior.neutral().p_neutral().to_bits(),
            with.posterior.neutral().p_neutral().to_bits()
        );
        let expected = 0.1 * 0.9 + 0.9 * with.posterior.neutral().p_neutral();
        assert!((with.posterior.p_aware().unwrap() - expected).abs() < 1e-12);

        let broken = analyst
            .analyze("Q?", 0.4, sample(), &Critique::default(), Some(&BrokenMarket))
            .await;
        assert_eq!(broken.posterior.p_aware(), None);
    }

    #[tokio::test]
    async fn test_critic_rho_overrides_config() {
        let mut settings = AnalystSettings::default();
        settings.rho_by_cluster.insert("a.com".into(), 0.0);
        let analyst = Analyst::new(Arc::new(Failing)).with_settings(settings);
        let items = vec![ev("p1", "a.com", Polarity::Supports), ev("p2", "a.com", Polarity::Supports)];
        let critique = Critique {
            correlation_adjustments: [("a.com".to_string(), 1.0)].into_iter().collect(),
            ..Default::default()
        };
        let (neutral, _) = analyst.neutral("Q?", 0.5, items, &critique).await;
        let cluster = &neutral.clusters()[0];
        assert_eq!(cluster.rho, 1.0);
        assert!((cluster.m_eff - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_payload_market_requires_mid() {
        let mut payload = MarketPayload::default();
        assert!(PayloadMarket::new(payload.clone()).snapshot("q").await.is_err());
        payload.market_state_now.push(OutcomeQuote { token_id: "t".into(), mid: Some(0.3), ..Default::default() });
        let snap = PayloadMarket::new(payload).snapshot("q").await.unwrap();
        assert_eq!(snap.probability, 0.3);
    }
}
