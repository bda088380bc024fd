//! Forecast Pipeline
//!
//! Drives one forecast run:
//! FetchMarketData -> OptimizeParameters -> Plan -> ResearchCycle1 ->
//! Critique -> [FollowUpResearch] -> Aggregate -> Report -> Done.
//!
//! Progress is reported through a `ProgressSink`. `run_with_events` wraps
//! a run in one `connected` event and exactly one `complete` or `error`.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::agent::{AgentRole, ForecastError, ForecastResult, LLMProvider};
use crate::config::ForecastConfig;
use crate::forecasting::{make_forecast_card, CardParts, Evidence, EvidenceNormalizer, ForecastCard, Polarity};
use crate::tools::{FetchOptions, HistoryInterval, MarketDataFetcher, MarketPayload, SearchContext, SearchProvider};

use super::analyst::{Analyst, AnalystSettings, LiveMarket};
use super::critic::Critic;
use super::drivers::DriverGenerator;
use super::event_bus::{steps, ProgressEvent, ProgressSink};
use super::interval::{explain_interval_choice, select_history_interval};
use super::planner::ResearchPlanner;
use super::reporter::{ReportInput, Reporter};
use super::researcher::{ResearchInput, ResearchSettings, Researcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    FetchMarketData,
    OptimizeParameters,
    Plan,
    ResearchCycle1,
    Critique,
    FollowUpResearch,
    Aggregate,
    Report,
    Done,
    Failed,
}

impl PipelineState {
    /// Legal successors. Any state may fail.
    pub fn successors(self) -> &'static [PipelineState] {
        use PipelineState::*;
        match self {
            FetchMarketData => &[OptimizeParameters, Failed],
            OptimizeParameters => &[Plan, Failed],
            Plan => &[ResearchCycle1, Failed],
            ResearchCycle1 => &[Critique, Failed],
            Critique => &[FollowUpResearch, Aggregate, Failed],
            FollowUpResearch => &[Aggregate, Failed],
            Aggregate => &[Report, Failed],
            Report => &[Done, Failed],
            Done | Failed => &[],
        }
    }

    pub fn can_advance_to(self, next: PipelineState) -> bool {
        self.successors().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct StateMachine {
    state: PipelineState,
}

impl StateMachine {
    fn new() -> Self {
        Self {
            state: PipelineState::FetchMarketData,
        }
    }

    fn advance(&mut self, next: PipelineState) -> ForecastResult<()> {
        if !self.state.can_advance_to(next) {
            return Err(ForecastError::fatal(
                "orchestration",
                format!("illegal transition {} -> {}", self.state, next),
            ));
        }
        debug!("pipeline: {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = PipelineState::Failed;
        }
    }
}

/// One forecast request. Unset options fall back to the configuration.
#[derive(Debug, Clone, Default)]
pub struct ForecastRequest {
    pub market_url: String,
    pub search: SearchContext,
    /// Extra `originId -> rho` overrides for this run
    pub rho_by_cluster: HashMap<String, f64>,
    pub drivers: Option<Vec<String>>,
    pub history_interval: Option<HistoryInterval>,
    pub with_books: Option<bool>,
    pub with_trades: Option<bool>,
}

impl ForecastRequest {
    pub fn new(market_url: impl Into<String>) -> Self {
        Self {
            market_url: market_url.into(),
            ..Default::default()
        }
    }

    pub fn with_search_context(mut self, ctx: SearchContext) -> Self {
        self.search = ctx;
        self
    }

    pub fn with_drivers(mut self, drivers: Vec<String>) -> Self {
        self.drivers = Some(drivers);
        self
    }

    pub fn with_history_interval(mut self, interval: HistoryInterval) -> Self {
        self.history_interval = Some(interval);
        self
    }

    pub fn with_rho(mut self, cluster_id: impl Into<String>, rho: f64) -> Self {
        self.rho_by_cluster.insert(cluster_id.into(), rho);
        self
    }
}

fn market_details(payload: &MarketPayload, opts: &FetchOptions) -> Value {
    let facts = &payload.market_facts;
    json!({
        "interval": opts.history_interval.as_str(),
        "withBooks": opts.with_books,
        "withTrades": opts.with_trades,
        "platform": payload.platform,
        "question": facts.question,
        "outcomes": facts.token_map.len(),
        "historySeries": payload.history.len(),
        "volume": facts.volume,
        "liquidity": facts.liquidity,
        "closeTime": facts.close_time,
        "resolutionSource": facts.resolution_source,
        "pricesNow": payload.market_state_now.iter().map(|q| json!({
            "outcome": q.outcome, "bid": q.bid, "ask": q.ask, "mid": q.mid,
        })).collect::<Vec<_>>(),
    })
}

fn evidence_summary(items: &[Evidence]) -> Vec<Value> {
    items
        .iter()
        .map(|e| {
            json!({
                "id": e.id,
                "claim": e.claim,
                "type": e.kind,
                "polarity": e.polarity,
                "urls": e.urls,
                "pathway": e.pathway,
                "connectionStrength": e.connection_strength,
            })
        })
        .collect()
}

fn error_details(err: &ForecastError) -> Value {
    match err {
        ForecastError::PipelineFatal { stage, .. } => json!({"kind": "pipeline_fatal", "stage": stage}),
        ForecastError::Timeout(secs) => json!({"kind": "timeout", "budgetSecs": secs}),
        ForecastError::Provider(_) => json!({"kind": "provider"}),
        ForecastError::Parse(_) => json!({"kind": "parse"}),
        ForecastError::EmptyResult(_) => json!({"kind": "empty_result"}),
        ForecastError::Config(_) => json!({"kind": "config"}),
        ForecastError::Io(_) => json!({"kind": "io"}),
    }
}

pub struct ForecastPipeline {
    llm: Arc<dyn LLMProvider>,
    search: Arc<dyn SearchProvider>,
    market: Arc<dyn MarketDataFetcher>,
    config: ForecastConfig,
    now: Option<DateTime<Utc>>,
}

impl ForecastPipeline {
    pub fn new(
        llm: Arc<dyn LLMProvider>,
        search: Arc<dyn SearchProvider>,
        market: Arc<dyn MarketDataFetcher>,
        config: ForecastConfig,
    ) -> Self {
        Self {
            llm,
            search,
            market,
            config,
            now: None,
        }
    }

    /// Pin the clock used for recency, age filtering and interval choice.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Run with the wall-clock budget from the configuration.
    #[tracing::instrument(skip(self, req, sink), fields(market = %req.market_url))]
    pub async fn run(&self, req: &ForecastRequest, sink: &dyn ProgressSink) -> ForecastResult<ForecastCard> {
        let budget = self.config.max_duration_secs;
        let mut machine = StateMachine::new();
        let result = match tokio::time::timeout(Duration::from_secs(budget), self.execute(req, sink, &mut machine)).await
        {
            Ok(result) => result,
            Err(_) => Err(ForecastError::Timeout(budget)),
        };
        if let Err(e) = &result {
            warn!("Pipeline failed during {}: {}", machine.state, e);
            machine.fail();
        }
        result
    }

    /// `run` framed by a `connected` event and exactly one terminal event.
    pub async fn run_with_events(&self, req: &ForecastRequest, sink: &dyn ProgressSink) -> ForecastResult<ForecastCard> {
        sink.emit(ProgressEvent::connected());
        let result = self.run(req, sink).await;
        match &result {
            Ok(card) => sink.emit(ProgressEvent::complete(card.clone())),
            Err(e) => {
                error!("Forecast failed: {}", e);
                sink.emit(ProgressEvent::error(e.to_string(), Some(error_details(e))));
            }
        }
        result
    }

    async fn fetch(&self, market_url: &str, opts: &FetchOptions) -> ForecastResult<MarketPayload> {
        let payload = self
            .market
            .fetch(market_url, opts)
            .await
            .map_err(|e| ForecastError::fatal(steps::FETCH_COMPLETE_DATA, format!("{:#}", e)))?;
        if payload.market_facts.question.trim().is_empty() {
            return Err(ForecastError::fatal(steps::FETCH_COMPLETE_DATA, "market has no question"));
        }
        Ok(payload)
    }

    async fn execute(
        &self,
        req: &ForecastRequest,
        sink: &dyn ProgressSink,
        machine: &mut StateMachine,
    ) -> ForecastResult<ForecastCard> {
        let started = Instant::now();
        let now = self.now.unwrap_or_else(Utc::now);
        let models = &self.config.models;

        let fetch_opts = FetchOptions {
            history_interval: HistoryInterval::OneDay,
            with_books: req.with_books.unwrap_or(self.config.with_books),
            with_trades: req.with_trades.unwrap_or(self.config.with_trades),
        };

        // Market data
        sink.emit(ProgressEvent::progress(
            steps::FETCH_COMPLETE_DATA,
            "Fetching complete market data...",
            json!({ "marketUrl": req.market_url }),
        ));
        let first = self.fetch(&req.market_url, &fetch_opts).await?;
        sink.emit(ProgressEvent::progress(
            steps::COMPLETE_DATA_READY,
            "Complete market data retrieved",
            market_details(&first, &fetch_opts),
        ));

        // Parameters
        machine.advance(PipelineState::OptimizeParameters)?;
        sink.emit(ProgressEvent::progress(
            steps::OPTIMIZE_PARAMETERS,
            "Optimizing analysis parameters...",
            json!({}),
        ));
        let interval = req
            .history_interval
            .or(self.config.history_interval)
            .unwrap_or_else(|| select_history_interval(&first, now));
        let supplied = req
            .drivers
            .clone()
            .filter(|d| !d.is_empty())
            .or_else(|| self.config.drivers.clone().filter(|d| !d.is_empty()));
        let drivers = match supplied {
            Some(d) => d,
            None => {
                DriverGenerator::new(self.llm.clone())
                    .with_model(models.for_role(AgentRole::DriverGenerator))
                    .generate(&first)
                    .await
            }
        };
        sink.emit(ProgressEvent::progress(
            steps::PARAMETERS_OPTIMIZED,
            "Parameters optimized",
            json!({
                "interval": interval.as_str(),
                "drivers": drivers,
                "intervalExplanation": explain_interval_choice(interval, &first, now),
            }),
        ));

        let market = if interval == HistoryInterval::OneDay {
            first
        } else {
            let opts = FetchOptions {
                history_interval: interval,
                ..fetch_opts
            };
            sink.emit(ProgressEvent::progress(
                steps::FETCH_COMPLETE_DATA,
                format!("Refetching market data at interval {}...", interval),
                json!({ "interval": interval.as_str() }),
            ));
            match self.fetch(&req.market_url, &opts).await {
                Ok(refreshed) => {
                    sink.emit(ProgressEvent::progress(
                        steps::COMPLETE_DATA_READY,
                        "Complete market data updated",
                        market_details(&refreshed, &opts),
                    ));
                    refreshed
                }
                Err(e) => {
                    warn!("Refetch at {} failed, keeping daily data: {}", interval, e);
                    first
                }
            }
        };

        let question = market.market_facts.question.clone();
        let p0 = self.config.prior_from_mid(market.current_mid());
        info!("Prior (p0) from market mid: {:.3}", p0);

        // Plan
        machine.advance(PipelineState::Plan)?;
        sink.emit(ProgressEvent::progress(
            steps::PLANNING,
            "Planning research strategy...",
            json!({ "question": question }),
        ));
        let plan = ResearchPlanner::new(self.llm.clone())
            .with_model(models.for_role(AgentRole::Planner))
            .plan(&question)
            .await
            .map_err(|e| e.at_stage(steps::PLANNING))?;
        sink.emit(ProgressEvent::progress(
            steps::PLAN_COMPLETE,
            "Research plan generated",
            json!({
                "subclaims": plan.subclaims.len(),
                "searchSeeds": plan.search_seeds.len(),
                "variables": plan.key_variables.len(),
                "criteria": plan.decision_criteria.len(),
                "response": plan,
            }),
        ));

        // Research cycle 1
        machine.advance(PipelineState::ResearchCycle1)?;
        sink.emit(ProgressEvent::progress(
            steps::RESEARCHING,
            "Starting initial evidence research...",
            json!({ "searchSeeds": plan.search_seeds.len() }),
        ));
        let researcher = Researcher::new(self.llm.clone(), self.search.clone())
            .with_models(models.for_role(AgentRole::Researcher), models.for_role(AgentRole::Summarizer))
            .with_settings(ResearchSettings::from_config(&self.config))
            .with_now(now);
        let input = ResearchInput {
            question: &question,
            plan: &plan,
            market: &market,
            search: &req.search,
        };
        let ((pro, con), adjacent) =
            tokio::join!(researcher.research_both_sides(input), researcher.research_adjacent(input));

        let (adj_pro, rest): (Vec<Evidence>, Vec<Evidence>) =
            adjacent.into_iter().partition(|e| e.polarity == Polarity::Supports);
        let (adj_con, adj_neutral): (Vec<Evidence>, Vec<Evidence>) =
            rest.into_iter().partition(|e| e.polarity == Polarity::Contradicts);

        let initial_urls: Vec<&String> = {
            let mut seen = std::collections::HashSet::new();
            pro.iter()
                .chain(&con)
                .chain(&adj_pro)
                .chain(&adj_con)
                .chain(&adj_neutral)
                .flat_map(|e| e.urls.iter())
                .filter(|u| seen.insert(u.as_str()))
                .take(10)
                .collect()
        };
        sink.emit(ProgressEvent::progress(
            steps::INITIAL_RESEARCH_COMPLETE,
            "Initial evidence research completed",
            json!({
                "proEvidence": pro.len() + adj_pro.len(),
                "conEvidence": con.len() + adj_con.len(),
                "adjacentEvidence": adj_pro.len() + adj_con.len() + adj_neutral.len(),
                "urls": initial_urls,
                "response": {
                    "proEvidence": evidence_summary(&pro),
                    "conEvidence": evidence_summary(&con),
                    "adjacentEvidence": evidence_summary(&[adj_pro.as_slice(), adj_con.as_slice(), adj_neutral.as_slice()].concat()),
                },
            }),
        ));

        // Critique
        machine.advance(PipelineState::Critique)?;
        sink.emit(ProgressEvent::progress(
            steps::CRITICISM,
            "Running critical analysis to identify gaps...",
            json!({ "evidenceCount": pro.len() + con.len() }),
        ));
        let critique = Critic::new(self.llm.clone())
            .with_model(models.for_role(AgentRole::Critic))
            .with_max_follow_ups(self.config.max_follow_up_searches)
            .critique(&question, &pro, &con)
            .await
            .map_err(|e| e.at_stage(steps::CRITICISM))?;
        sink.emit(ProgressEvent::progress(
            steps::CRITICISM_COMPLETE,
            "Critical analysis completed",
            json!({
                "missingAreas": critique.missing.len(),
                "followUpSearches": critique.follow_up_searches.len(),
                "duplicationFlags": critique.duplication_flags.len(),
                "dataConcerns": critique.data_concerns.len(),
                "response": critique,
            }),
        ));

        // Follow-up research
        let mut total_pro: Vec<Evidence> = pro.into_iter().chain(adj_pro).collect();
        let mut total_con: Vec<Evidence> = con.into_iter().chain(adj_con).collect();
        let mut neutral = adj_neutral;

        if critique.follow_up_searches.is_empty() {
            info!("Follow-up research skipped: critic found no gaps");
            sink.emit(ProgressEvent::progress(
                steps::FOLLOWUP_RESEARCH_SKIPPED,
                "Follow-up research skipped - no gaps identified",
                json!({}),
            ));
        } else {
            machine.advance(PipelineState::FollowUpResearch)?;
            sink.emit(ProgressEvent::progress(
                steps::FOLLOWUP_RESEARCH,
                "Conducting targeted follow-up research...",
                json!({ "followUpSearches": critique.follow_up_searches.len() }),
            ));
            let extra = researcher.follow_up(input, &critique.follow_up_searches).await;
            let (add_pro, add_con, add_neutral) = (extra.pro.len(), extra.con.len(), extra.neutral.len());
            total_pro.extend(extra.pro);
            total_con.extend(extra.con);
            neutral.extend(extra.neutral);
            sink.emit(ProgressEvent::progress(
                steps::FOLLOWUP_RESEARCH_COMPLETE,
                "Follow-up research completed",
                json!({
                    "additionalPro": add_pro,
                    "additionalCon": add_con,
                    "neutralEvidence": add_neutral,
                    "totalPro": total_pro.len(),
                    "totalCon": total_con.len(),
                }),
            ));
        }

        // Aggregate
        machine.advance(PipelineState::Aggregate)?;
        let merged: Vec<Evidence> = total_pro.into_iter().chain(total_con).chain(neutral).collect();
        let all = EvidenceNormalizer::new(self.config.domain_cap).normalize(merged);
        sink.emit(ProgressEvent::progress(
            steps::AGGREGATING,
            "Aggregating evidence with critic feedback...",
            json!({ "totalEvidence": all.len() }),
        ));

        let mut settings = AnalystSettings::from_config(&self.config);
        settings
            .rho_by_cluster
            .extend(req.rho_by_cluster.iter().map(|(k, v)| (k.clone(), *v)));
        let analyst = Analyst::new(self.llm.clone())
            .with_model(models.for_role(AgentRole::Analyst))
            .with_settings(settings)
            .with_now(now);
        let live = LiveMarket::new(self.market.clone(), req.market_url.clone());
        let total = all.len();
        let outcome = analyst.analyze(&question, p0, all, &critique, Some(&live)).await;

        let neutral_post = outcome.posterior.neutral();
        sink.emit(ProgressEvent::progress(
            steps::AGGREGATION_COMPLETE,
            "Probability aggregation completed",
            json!({
                "pNeutral": neutral_post.p_neutral(),
                "pAware": outcome.posterior.p_aware(),
                "influenceItems": neutral_post.influence().len(),
                "clusters": neutral_post.clusters().len(),
                "evidenceUsed": outcome.evidence_used.len(),
                "evidenceFiltered": total - outcome.evidence_used.len(),
                "topInfluences": neutral_post.influence().iter().take(5).collect::<Vec<_>>(),
            }),
        ));

        // Report
        machine.advance(PipelineState::Report)?;
        sink.emit(ProgressEvent::progress(
            steps::REPORTING,
            "Generating final report...",
            json!({ "drivers": drivers }),
        ));
        let markdown = Reporter::new(self.llm.clone())
            .with_model(models.for_role(AgentRole::Reporter))
            .with_narrative(self.config.narrative_report)
            .compose(&ReportInput {
                question: &question,
                posterior: &outcome.posterior,
                evidence: &outcome.evidence_used,
                drivers: &drivers,
            })
            .await;
        let elapsed = started.elapsed().as_secs_f64();
        sink.emit(ProgressEvent::progress(
            steps::REPORT_COMPLETE,
            "Final report generated",
            json!({
                "reportLength": markdown.len(),
                "totalTimeSeconds": elapsed,
                "finalProbabilities": {
                    "p0": p0,
                    "pNeutral": neutral_post.p_neutral(),
                    "pAware": outcome.posterior.p_aware(),
                },
            }),
        ));

        let provenance = outcome
            .evidence_used
            .iter()
            .flat_map(|e| e.urls.iter().cloned())
            .chain(std::iter::once(req.market_url.clone()))
            .collect();
        let card = make_forecast_card(
            outcome.posterior,
            CardParts {
                question,
                drivers,
                provenance,
                markdown_report: markdown,
            },
        );
        machine.advance(PipelineState::Done)?;
        info!("Pipeline finished in {:.1}s: pNeutral={:.3}", elapsed, card.p_neutral);
        Ok(card)
    }
}
