//! End-to-end pipeline scenarios with scripted collaborators.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use forecast_agency::agent::{ForecastError, LLMProvider};
use forecast_agency::config::ForecastConfig;
use forecast_agency::forecasting::ForecastCard;
use forecast_agency::orchestrator::{steps, EventKind, ForecastPipeline, ForecastRequest, RecordingSink};
use forecast_agency::tools::{
    FetchOptions, MarketDataFetcher, MarketPayload, OutcomeQuote, PricePoint, PriceSeries, SearchContext, SearchHit,
    SearchOptions, SearchProvider, SearchResponse,
};

const QUESTION: &str = "Will the Riverton bridge reopen by December?";
const MARKET_URL: &str = "https://polymarket.com/event/riverton-bridge";

const PLAN: &str = r#"{
    "subclaims": ["Repairs finish on schedule", "Inspection passes"],
    "keyVariables": ["contractor progress"],
    "searchSeeds": ["riverton bridge repairs", "riverton bridge inspection", "riverton council vote", "riverton funding delay"],
    "decisionCriteria": ["official statements"],
    "recency": {"needed": false}
}"#;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
}

const NO_FOLLOW_UPS: &str = r#"{"missing": [], "duplicationFlags": [], "dataConcerns": [], "followUpSearches": []}"#;

const BOTH_FOLLOW_UP: &str = r#"{
    "missing": ["independent engineering view"],
    "followUpSearches": [{"query": "riverton engineers assessment", "rationale": "neutral expert view", "side": "BOTH"}]
}"#;

/// Dispatches on prompt keywords the way each pipeline role phrases its request.
struct ScriptedLlm {
    plan: String,
    critique: String,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedLlm {
    fn new(plan: &str, critique: &str) -> Self {
        Self {
            plan: plan.to_string(),
            critique: critique.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self, kind: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|k| **k == kind).count()
    }
}

fn classify(prompt: &str) -> &'static str {
    if prompt.contains("Write the narrative sections") {
        "narrative"
    } else if prompt.contains("duplicationFlags") {
        "critic"
    } else if prompt.contains("relevantEvidence") {
        "relevance"
    } else if prompt.contains("\"niche\"") {
        "niche"
    } else if prompt.contains("searchSeeds") {
        "planner"
    } else if prompt.contains("Compress these findings") {
        "summary"
    } else if prompt.contains("\"items\"") {
        "evidence"
    } else if prompt.contains("key drivers") {
        "drivers"
    } else {
        "unknown"
    }
}

fn evidence_reply(prompt: &str) -> String {
    let url_line = Regex::new(r"(?m)^\d+\. (https?://\S+)$").unwrap();
    let adjacent = prompt.contains("adjacent catalysts");
    let date = (now() - Duration::days(10)).format("%Y-%m-%d").to_string();

    let items: Vec<serde_json::Value> = url_line
        .captures_iter(prompt)
        .take(8)
        .enumerate()
        .map(|(i, c)| {
            let mut item = serde_json::json!({
                "id": format!("m{}", i),
                "claim": format!("Report {} from {}", i, &c[1]),
                "polarity": 1,
                "type": "B",
                "publishedAt": date,
                "urls": [&c[1]],
                "originId": "",
                "firstReport": false,
                "verifiability": 0.8,
                "corroborationsIndep": 1,
                "consistency": 0.8
            });
            if adjacent {
                item["pathway"] = "regulatory".into();
                item["connectionStrength"] = 0.6.into();
            }
            item
        })
        .collect();
    serde_json::json!({ "items": items }).to_string()
}

#[async_trait]
impl LLMProvider for ScriptedLlm {
    async fn generate(&self, _model: &str, prompt: String, _system: Option<String>) -> Result<String> {
        let kind = classify(&prompt);
        self.calls.lock().unwrap().push(kind);
        Ok(match kind {
            "narrative" => "## Why This Prediction\nScripted narrative.".to_string(),
            "critic" => self.critique.clone(),
            "relevance" => r#"{"relevantEvidence": []}"#.to_string(),
            "niche" => r#"{"niche": []}"#.to_string(),
            "planner" => self.plan.clone(),
            "summary" => "- condensed findings with dates".to_string(),
            "evidence" => evidence_reply(&prompt),
            "drivers" => r#"{"drivers": ["Inspection results", "Funding", "Weather"], "reasoning": "r"}"#.to_string(),
            _ => bail!("unscripted prompt"),
        })
    }
}

/// Two hits per query, on a host derived from the query text.
struct MockSearch {
    queries: Mutex<Vec<String>>,
}

impl MockSearch {
    fn new() -> Self {
        Self { queries: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl SearchProvider for MockSearch {
    fn name(&self) -> &str {
        "mock"
    }

    async fn search(&self, _ctx: &SearchContext, query: &str, opts: &SearchOptions) -> Result<SearchResponse> {
        assert!(opts.start_date.is_some());
        self.queries.lock().unwrap().push(query.to_string());
        let host: String = query.chars().map(|c| if c.is_alphanumeric() { c } else { '-' }).collect();
        Ok(SearchResponse {
            results: (1..=2)
                .map(|i| SearchHit {
                    title: format!("{} {}", query, i),
                    url: format!("https://{}.example.org/story-{}", host, i),
                    content: format!("Coverage of {}", query),
                })
                .collect(),
        })
    }
}

/// First call of a run returns the full payload; later calls serve the snapshot price.
struct MockMarket {
    calls: AtomicUsize,
    snapshot_mid: Option<f64>,
    fail_first: bool,
}

impl MockMarket {
    fn new(snapshot_mid: Option<f64>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            snapshot_mid,
            fail_first: false,
        }
    }

    fn unreachable() -> Self {
        Self {
            fail_first: true,
            ..Self::new(None)
        }
    }

    fn payload(mid: f64) -> MarketPayload {
        let mut payload = MarketPayload {
            platform: "polymarket".into(),
            ..Default::default()
        };
        payload.market_facts.question = QUESTION.into();
        payload.market_facts.volume = Some(125_000.0);
        payload.market_facts.close_time = Some(serde_json::json!((now() + Duration::days(400)).timestamp()));
        payload.market_state_now.push(OutcomeQuote {
            token_id: "yes".into(),
            outcome: Some("Yes".into()),
            mid: Some(mid),
            ..Default::default()
        });
        payload.history.push(PriceSeries {
            token_id: "yes".into(),
            points: (0..30).map(|i| PricePoint { t: 1_700_000_000 + i * 86_400, p: 0.6 }).collect(),
        });
        payload
    }
}

#[async_trait]
impl MarketDataFetcher for MockMarket {
    async fn fetch(&self, _market_url: &str, _opts: &FetchOptions) -> Result<MarketPayload> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_first {
            bail!("market data service unreachable");
        }
        if n == 0 {
            return Ok(Self::payload(0.62));
        }
        match self.snapshot_mid {
            Some(mid) => Ok(Self::payload(mid)),
            None => bail!("snapshot unavailable"),
        }
    }
}

fn config() -> ForecastConfig {
    ForecastConfig {
        seed_queries_per_side: 2,
        ..Default::default()
    }
}

async fn run(
    llm: Arc<ScriptedLlm>,
    market: MockMarket,
    req: ForecastRequest,
) -> (Result<ForecastCard, ForecastError>, RecordingSink) {
    let pipeline = ForecastPipeline::new(llm, Arc::new(MockSearch::new()), Arc::new(market), config()).with_now(now());
    let sink = RecordingSink::new();
    let result = pipeline.run_with_events(&req, &sink).await;
    (result, sink)
}

fn details(sink: &RecordingSink, step: &str) -> serde_json::Value {
    sink.events()
        .into_iter()
        .find(|e| e.step.as_deref() == Some(step))
        .and_then(|e| e.details)
        .unwrap_or_default()
}

#[tokio::test]
async fn test_follow_up_skipped_when_critic_has_no_directives() {
    let llm = Arc::new(ScriptedLlm::new(PLAN, NO_FOLLOW_UPS));
    let (result, sink) = run(llm.clone(), MockMarket::new(Some(0.7)), ForecastRequest::new(MARKET_URL)).await;
    let card = result.unwrap();

    assert_eq!(
        sink.steps(),
        vec![
            steps::FETCH_COMPLETE_DATA,
            steps::COMPLETE_DATA_READY,
            steps::OPTIMIZE_PARAMETERS,
            steps::PARAMETERS_OPTIMIZED,
            steps::PLANNING,
            steps::PLAN_COMPLETE,
            steps::RESEARCHING,
            steps::INITIAL_RESEARCH_COMPLETE,
            steps::CRITICISM,
            steps::CRITICISM_COMPLETE,
            steps::FOLLOWUP_RESEARCH_SKIPPED,
            steps::AGGREGATING,
            steps::AGGREGATION_COMPLETE,
            steps::REPORTING,
            steps::REPORT_COMPLETE,
        ]
    );

    let events = sink.events();
    assert_eq!(events.first().unwrap().kind, EventKind::Connected);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert_eq!(events.last().unwrap().kind, EventKind::Complete);

    assert_eq!(card.question, QUESTION);
    assert_eq!(card.p0, 0.62);
    assert_eq!(card.drivers, vec!["Inspection results", "Funding", "Weather"]);
    assert!(card.p_aware.is_some());
    // Mirror-image pro and con evidence cancels out.
    assert!((card.p_neutral - card.p0).abs() < 1e-9);
    assert_eq!(card.provenance.last().map(String::as_str), Some(MARKET_URL));
    assert!(card.markdown_report.contains("Scripted narrative."));
    assert_eq!(llm.calls("critic"), 1);

    let research = details(&sink, steps::INITIAL_RESEARCH_COMPLETE);
    assert_eq!(research["proEvidence"], 4);
    assert_eq!(research["conEvidence"], 4);
}

#[tokio::test]
async fn test_both_side_follow_up_is_neutral() {
    let llm = Arc::new(ScriptedLlm::new(PLAN, BOTH_FOLLOW_UP));
    let (result, sink) = run(llm, MockMarket::new(Some(0.7)), ForecastRequest::new(MARKET_URL)).await;
    let card = result.unwrap();

    assert!(sink.steps().contains(&steps::FOLLOWUP_RESEARCH_COMPLETE.to_string()));
    assert!(!sink.steps().contains(&steps::FOLLOWUP_RESEARCH_SKIPPED.to_string()));

    let follow_up = details(&sink, steps::FOLLOWUP_RESEARCH_COMPLETE);
    assert_eq!(follow_up["additionalPro"], 0);
    assert_eq!(follow_up["additionalCon"], 0);
    assert_eq!(follow_up["neutralEvidence"], 2);
    assert_eq!(follow_up["totalPro"], 4);
    assert_eq!(follow_up["totalCon"], 4);

    let neutral: Vec<_> = card.influence.iter().filter(|i| i.evidence_id.starts_with("fu1-")).collect();
    assert_eq!(neutral.len(), 2);
    assert!(neutral.iter().all(|i| i.log_lr == 0.0));
}

#[tokio::test]
async fn test_neutral_posterior_ignores_market_snapshot() {
    let req = ForecastRequest::new(MARKET_URL).with_drivers(vec!["Funding".into()]);

    let llm = Arc::new(ScriptedLlm::new(PLAN, NO_FOLLOW_UPS));
    let (with_market, _) = run(llm, MockMarket::new(Some(0.95)), req.clone()).await;
    let llm = Arc::new(ScriptedLlm::new(PLAN, NO_FOLLOW_UPS));
    let (without_market, sink) = run(llm.clone(), MockMarket::new(None), req).await;

    let with_market = with_market.unwrap();
    let without_market = without_market.unwrap();
    assert_eq!(with_market.p_neutral.to_bits(), without_market.p_neutral.to_bits());
    assert_eq!(without_market.p_aware, None);

    let expected = 0.1 * 0.95 + 0.9 * with_market.p_neutral;
    assert!((with_market.p_aware.unwrap() - expected).abs() < 1e-12);

    // Supplied drivers skip generation.
    assert_eq!(llm.calls("drivers"), 0);
    assert_eq!(without_market.drivers, vec!["Funding"]);
    assert_eq!(sink.events().last().unwrap().kind, EventKind::Complete);
}

#[tokio::test]
async fn test_market_fetch_failure_is_fatal() {
    let llm = Arc::new(ScriptedLlm::new(PLAN, NO_FOLLOW_UPS));
    let (result, sink) = run(llm.clone(), MockMarket::unreachable(), ForecastRequest::new(MARKET_URL)).await;

    match result {
        Err(ForecastError::PipelineFatal { stage, .. }) => assert_eq!(stage, steps::FETCH_COMPLETE_DATA),
        other => panic!("expected fatal market error, got {:?}", other.map(|c| c.question)),
    }

    let events = sink.events();
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    let last = events.last().unwrap();
    assert_eq!(last.kind, EventKind::Error);
    assert!(last.forecast.is_none());
    assert!(last.error.as_deref().unwrap().contains("unreachable"));
    assert_eq!(llm.calls("planner"), 0);
}

#[tokio::test]
async fn test_unusable_plan_aborts_run() {
    let llm = Arc::new(ScriptedLlm::new(r#"{"subclaims": ["x"], "searchSeeds": []}"#, NO_FOLLOW_UPS));
    let (result, sink) = run(llm.clone(), MockMarket::new(Some(0.5)), ForecastRequest::new(MARKET_URL)).await;

    assert!(matches!(result, Err(ForecastError::PipelineFatal { ref stage, .. }) if stage == steps::PLANNING));
    assert!(!sink.steps().contains(&steps::RESEARCHING.to_string()));
    assert_eq!(sink.events().last().unwrap().details.as_ref().unwrap()["stage"], "planning");
    assert_eq!(llm.calls("evidence"), 0);
}

struct SlowLlm;

#[async_trait]
impl LLMProvider for SlowLlm {
    async fn generate(&self, _model: &str, _prompt: String, _system: Option<String>) -> Result<String> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        bail!("too late")
    }
}

#[tokio::test]
async fn test_budget_exceeded_times_out() {
    let cfg = ForecastConfig {
        max_duration_secs: 1,
        ..config()
    };
    let pipeline = ForecastPipeline::new(
        Arc::new(SlowLlm),
        Arc::new(MockSearch::new()),
        Arc::new(MockMarket::new(Some(0.5))),
        cfg,
    );
    let sink = RecordingSink::new();
    let req = ForecastRequest::new(MARKET_URL).with_drivers(vec!["d".into()]);
    let result = pipeline.run_with_events(&req, &sink).await;

    assert!(matches!(result, Err(ForecastError::Timeout(1))));
    assert_eq!(sink.events().last().unwrap().kind, EventKind::Error);
}

#[tokio::test]
async fn test_caller_rho_override_reaches_clusters() {
    let llm = Arc::new(ScriptedLlm::new(PLAN, NO_FOLLOW_UPS));
    let host = "riverton-bridge-repairs.example.org";
    let req = ForecastRequest::new(MARKET_URL).with_rho(host, 1.0);
    let (result, _) = run(llm, MockMarket::new(Some(0.5)), req).await;
    let card = result.unwrap();

    let cluster = card.clusters.iter().find(|c| c.cluster_id == host).unwrap();
    assert_eq!(cluster.size, 2);
    assert_eq!(cluster.rho, 1.0);
    assert!((cluster.m_eff - 1.0).abs() < 1e-12);

    let mut ids: HashMap<&str, usize> = HashMap::new();
    for item in &card.influence {
        *ids.entry(item.evidence_id.split('-').next().unwrap_or("")).or_insert(0) += 1;
    }
    assert_eq!(ids.get("pro"), Some(&4));
    assert_eq!(ids.get("con"), Some(&4));
}
