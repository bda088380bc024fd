//! Researcher
//!
//! Evidence gathering for one research track: concurrent searches, a
//! side-aware digest of the findings, one structured evidence call, then
//! polarity forcing, normalization, age filtering and fresh-first selection.
//! Every failure inside a track yields an empty list.

use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::{
    clip, invoke_structured, invoke_text, truncate, AgentRole, LLMProvider, StructuredOutcome, StructuredSchema,
    TaskSpec,
};
use crate::config::ForecastConfig;
use crate::forecasting::{canonicalize_url, days_since, Evidence, EvidenceNormalizer, Polarity};
use crate::tools::{MarketPayload, SearchContext, SearchHit, SearchOptions, SearchProvider};

use super::critic::{FollowUpSearch, Side};
use super::planner::ResearchPlan;

const MAX_ITEMS_PER_CALL: usize = 10;
const MAX_URLS_IN_PROMPT: usize = 20;
const RAW_FINDINGS_LIMIT: usize = 8_000;

/// Structured evidence returned by the research model.
#[derive(Debug, Clone, Deserialize)]
pub struct EvidenceBatch {
    #[serde(default, deserialize_with = "usable_items")]
    pub items: Vec<Evidence>,
}

/// Items that fail to decode are dropped one by one instead of failing the batch.
fn usable_items<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Evidence>, D::Error> {
    let raw: Vec<serde_json::Value> = Vec::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<Evidence>(v) {
            Ok(e) => Some(e),
            Err(e) => {
                debug!("Skipping malformed evidence item: {}", e);
                None
            }
        })
        .collect())
}

impl StructuredSchema for EvidenceBatch {
    const NAME: &'static str = "evidence_batch";

    fn validate(mut self) -> Result<Self, String> {
        self.items.retain(|e| !e.claim.trim().is_empty());
        self.items.truncate(MAX_ITEMS_PER_CALL);
        self.items = self.items.into_iter().map(Evidence::sanitized).collect();
        Ok(self)
    }
}

/// Limits for fresh-first selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub max_items: usize,
    pub min_items: usize,
    pub max_old_frac: f64,
}

pub const MAIN_SELECTION: Selection = Selection { max_items: 8, min_items: 4, max_old_frac: 0.25 };
pub const ADJACENT_SELECTION: Selection = Selection { max_items: 6, min_items: 3, max_old_frac: 0.25 };
pub const FOLLOW_UP_SELECTION: Selection = Selection { max_items: 6, min_items: 2, max_old_frac: 0.25 };

/// Prefer items from the last 30 days, then the last 180, then a bounded
/// share of older or undated items, topping up to `min_items`.
pub fn fresh_first(items: Vec<Evidence>, sel: Selection, now: DateTime<Utc>) -> Vec<Evidence> {
    let mut aged: Vec<(Option<f64>, Evidence)> = items
        .into_iter()
        .map(|e| (days_since(e.published_at.as_deref(), now), e))
        .collect();
    aged.sort_by(|(a, _), (b, _)| match (a, b) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (Some(_), None) => std::cmp::Ordering::Less,
        (Some(x), Some(y)) => x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal),
    });

    let mut fresh30 = Vec::new();
    let mut fresh180 = Vec::new();
    let mut older = Vec::new();
    for (age, e) in aged {
        match age {
            Some(d) if d <= 30.0 => fresh30.push(e),
            Some(d) if d <= 180.0 => fresh180.push(e),
            _ => older.push(e),
        }
    }

    let mut out: Vec<Evidence> = fresh30.into_iter().chain(fresh180).take(sel.max_items).collect();

    let old_cap = ((sel.max_items as f64 * sel.max_old_frac).floor() as usize).max(1);
    let mut older = older.into_iter();
    let mut old_added = 0;
    while out.len() < sel.max_items && old_added < old_cap {
        match older.next() {
            Some(e) => {
                out.push(e);
                old_added += 1;
            }
            None => break,
        }
    }
    for e in older {
        if out.len() >= sel.min_items {
            break;
        }
        out.push(e);
    }
    out
}

/// Drop items older than `max_age_days`; undated items survive only when allowed.
pub fn within_age(e: &Evidence, now: DateTime<Utc>, max_age_days: i64, drop_undated: bool) -> bool {
    match days_since(e.published_at.as_deref(), now) {
        Some(days) => days <= max_age_days as f64,
        None => !drop_undated,
    }
}

/// Up to `n` seeds, preferring those at indices of the given parity so the
/// two sides search different phrasings first.
pub fn pick_seeds(seeds: &[String], parity: usize, n: usize) -> Vec<String> {
    let preferred = seeds.iter().enumerate().filter(|(i, _)| i % 2 == parity);
    let rest = seeds.iter().enumerate().filter(|(i, _)| i % 2 != parity);
    preferred.chain(rest).map(|(_, s)| s.clone()).take(n).collect()
}

#[derive(Debug, Clone)]
pub struct ResearchSettings {
    pub domain_cap: usize,
    pub max_evidence_age_days: i64,
    pub drop_undated: bool,
    pub seed_queries_per_side: usize,
    pub search_start_lookback_days: i64,
}

impl ResearchSettings {
    pub fn from_config(config: &ForecastConfig) -> Self {
        Self {
            domain_cap: config.domain_cap,
            max_evidence_age_days: config.max_evidence_age_days,
            drop_undated: config.drop_undated,
            seed_queries_per_side: config.seed_queries_per_side.max(1),
            search_start_lookback_days: config.search_start_lookback_days,
        }
    }
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self::from_config(&ForecastConfig::default())
    }
}

/// Shared inputs of every research call in one run.
#[derive(Clone, Copy)]
pub struct ResearchInput<'a> {
    pub question: &'a str,
    pub plan: &'a ResearchPlan,
    pub market: &'a MarketPayload,
    pub search: &'a SearchContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Track {
    Side(Side),
    Adjacent,
}

struct Brief<'a> {
    track: Track,
    label: String,
    queries: Vec<String>,
    rationale: Option<&'a str>,
    selection: Selection,
    digest_chars: usize,
}

/// Follow-up evidence merged by directive side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FollowUpEvidence {
    pub pro: Vec<Evidence>,
    pub con: Vec<Evidence>,
    pub neutral: Vec<Evidence>,
}

pub struct Researcher {
    llm: Arc<dyn LLMProvider>,
    search: Arc<dyn SearchProvider>,
    research_model: String,
    summary_model: String,
    settings: ResearchSettings,
    now: DateTime<Utc>,
}

impl Researcher {
    pub fn new(llm: Arc<dyn LLMProvider>, search: Arc<dyn SearchProvider>) -> Self {
        Self {
            llm,
            search,
            research_model: AgentRole::Researcher.default_model().to_string(),
            summary_model: AgentRole::Summarizer.default_model().to_string(),
            settings: ResearchSettings::default(),
            now: Utc::now(),
        }
    }

    pub fn with_models(mut self, research: impl Into<String>, summary: impl Into<String>) -> Self {
        self.research_model = research.into();
        self.summary_model = summary.into();
        self
    }

    pub fn with_settings(mut self, settings: ResearchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Pin the clock used for search start dates and age filtering.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// First cycle: FOR and AGAINST run concurrently; neither can fail the other.
    pub async fn research_both_sides(&self, input: ResearchInput<'_>) -> (Vec<Evidence>, Vec<Evidence>) {
        let n = self.settings.seed_queries_per_side;
        let pro = self.gather(
            input,
            Brief {
                track: Track::Side(Side::For),
                label: "pro".to_string(),
                queries: pick_seeds(&input.plan.search_seeds, 0, n),
                rationale: None,
                selection: MAIN_SELECTION,
                digest_chars: 2_500,
            },
        );
        let con = self.gather(
            input,
            Brief {
                track: Track::Side(Side::Against),
                label: "con".to_string(),
                queries: pick_seeds(&input.plan.search_seeds, 1, n),
                rationale: None,
                selection: MAIN_SELECTION,
                digest_chars: 2_500,
            },
        );
        let (pro, con) = tokio::join!(pro, con);
        info!("Research complete: {} pro, {} con", pro.len(), con.len());
        (pro, con)
    }

    /// Catalysts and indirect signals from the plan's adjacent seeds.
    pub async fn research_adjacent(&self, input: ResearchInput<'_>) -> Vec<Evidence> {
        if input.plan.adjacent_seeds.is_empty() {
            debug!("No adjacent seeds; skipping adjacent research");
            return Vec::new();
        }
        let queries = input
            .plan
            .adjacent_seeds
            .iter()
            .take(self.settings.seed_queries_per_side)
            .cloned()
            .collect();
        self.gather(
            input,
            Brief {
                track: Track::Adjacent,
                label: "adj".to_string(),
                queries,
                rationale: None,
                selection: ADJACENT_SELECTION,
                digest_chars: 1_500,
            },
        )
        .await
    }

    /// Second cycle: every directive runs concurrently; results merge by side.
    pub async fn follow_up(&self, input: ResearchInput<'_>, searches: &[FollowUpSearch]) -> FollowUpEvidence {
        let tasks = searches.iter().enumerate().map(|(i, s)| async move {
            let items = self
                .gather(
                    input,
                    Brief {
                        track: Track::Side(s.side),
                        label: format!("fu{}", i + 1),
                        queries: vec![s.query.clone()],
                        rationale: Some(s.rationale.as_str()),
                        selection: FOLLOW_UP_SELECTION,
                        digest_chars: 2_000,
                    },
                )
                .await;
            (s.side, items)
        });

        let mut merged = FollowUpEvidence::default();
        for (side, items) in join_all(tasks).await {
            match side {
                Side::For => merged.pro.extend(items),
                Side::Against => merged.con.extend(items),
                Side::Neutral | Side::Both => merged.neutral.extend(items),
            }
        }
        info!(
            "Follow-up research complete: {} pro, {} con, {} neutral",
            merged.pro.len(),
            merged.con.len(),
            merged.neutral.len()
        );
        merged
    }

    async fn gather(&self, input: ResearchInput<'_>, brief: Brief<'_>) -> Vec<Evidence> {
        let hits = self.run_searches(input, &brief).await;
        if hits.is_empty() {
            warn!("[{}] searches returned no results", brief.label);
            return Vec::new();
        }
        let allowed: HashSet<String> = hits.iter().filter_map(|h| canonicalize_url(&h.url)).collect();

        let digest = self.summarize(input.question, &brief, &hits).await;
        let prompt = evidence_prompt(input, &brief, &digest, &hits);
        let task = TaskSpec::new(&self.research_model, prompt).with_system(AgentRole::Researcher.system_prompt());

        let batch = match invoke_structured::<EvidenceBatch>(self.llm.as_ref(), &task).await {
            StructuredOutcome::Ok(batch) => batch,
            StructuredOutcome::SchemaMismatch(e) | StructuredOutcome::ProviderFailure(e) => {
                warn!("[{}] evidence generation failed: {}", brief.label, e);
                return Vec::new();
            }
        };

        let drafted = batch.items.len();
        let items: Vec<Evidence> = batch
            .items
            .into_iter()
            .enumerate()
            .map(|(i, mut e)| {
                e.id = format!("{}-{}", brief.label, i + 1);
                if let Track::Side(side) = brief.track {
                    e.polarity = side.forced_polarity();
                }
                e.urls.retain(|u| canonicalize_url(u).is_some_and(|c| allowed.contains(&c)));
                e
            })
            .collect();

        let items = EvidenceNormalizer::new(self.settings.domain_cap).normalize(items);
        let before = items.len();
        let items: Vec<Evidence> = items
            .into_iter()
            .filter(|e| within_age(e, self.now, self.settings.max_evidence_age_days, self.settings.drop_undated))
            .collect();
        if items.len() != before {
            warn!("[{}] dropped {} old/undated evidence items", brief.label, before - items.len());
        }
        let selected = fresh_first(items, brief.selection, self.now);
        debug!("[{}] kept {}/{} drafted items", brief.label, selected.len(), drafted);
        selected
    }

    async fn run_searches(&self, input: ResearchInput<'_>, brief: &Brief<'_>) -> Vec<SearchHit> {
        let start = input
            .plan
            .start_date()
            .unwrap_or_else(|| (self.now - Duration::days(self.settings.search_start_lookback_days)).date_naive());
        let opts = SearchOptions::since(start);

        let responses = join_all(brief.queries.iter().map(|q| self.search.search(input.search, q, &opts))).await;

        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for (query, response) in brief.queries.iter().zip(responses) {
            match response {
                Ok(r) => {
                    for hit in r.results {
                        let key = canonicalize_url(&hit.url).unwrap_or_else(|| hit.url.clone());
                        if !hit.url.is_empty() && seen.insert(key) {
                            hits.push(hit);
                        }
                    }
                }
                Err(e) => warn!("[{}] search '{}' failed: {:#}", brief.label, query, e),
            }
        }
        hits
    }

    async fn summarize(&self, question: &str, brief: &Brief<'_>, hits: &[SearchHit]) -> String {
        let raw = hits
            .iter()
            .map(|h| format!("- {} ({})\n  {}", h.title, h.url, truncate(&h.content, 600)))
            .collect::<Vec<_>>()
            .join("\n");
        let raw = clip(&raw, RAW_FINDINGS_LIMIT);

        let directive = match brief.track {
            Track::Side(Side::For) => {
                "Target: PRO side. Emphasize findings that SUPPORT the outcome; note contradicting points only if essential."
            }
            Track::Side(Side::Against) => {
                "Target: CON side. Emphasize findings that CONTRADICT the outcome; note supporting points only if essential."
            }
            _ => "Target: NEUTRAL. Give a factual, topic-focused summary without taking a side.",
        };
        let prompt = format!(
            "Question: {}\n{}\nStay strictly on topic and drop unrelated entities.\n\
             Compress these findings into a tight bullet list. Keep dates, numbers and source URLs. Max {} characters.\n\n---\n{}",
            question, directive, brief.digest_chars, raw
        );
        let task = TaskSpec::new(&self.summary_model, prompt).with_system(AgentRole::Summarizer.system_prompt());

        match invoke_text(self.llm.as_ref(), &task).await {
            Ok(text) if !text.trim().is_empty() => clip(&text, brief.digest_chars).to_string(),
            Ok(_) => clip(raw, brief.digest_chars).to_string(),
            Err(e) => {
                warn!("[{}] summarization failed, truncating: {}", brief.label, e);
                clip(raw, brief.digest_chars).to_string()
            }
        }
    }
}

fn evidence_prompt(input: ResearchInput<'_>, brief: &Brief<'_>, digest: &str, hits: &[SearchHit]) -> String {
    let market = match input.market.current_mid() {
        Some(mid) => format!("{:.1}%", mid * 100.0),
        None => "N/A".to_string(),
    };
    let urls = hits
        .iter()
        .take(MAX_URLS_IN_PROMPT)
        .enumerate()
        .map(|(i, h)| format!("{}. {}", i + 1, h.url))
        .collect::<Vec<_>>()
        .join("\n");

    let (role, count, extra_fields) = match brief.track {
        Track::Side(Side::For) => ("evidence SUPPORTING the outcome; polarity 1", "4-8", ""),
        Track::Side(Side::Against) => ("evidence CONTRADICTING the outcome; polarity -1", "4-8", ""),
        Track::Side(_) => ("neutral evidence filling the stated gap; polarity 0", "2-4", ""),
        Track::Adjacent => (
            "adjacent catalysts; polarity 1 if the signal raises the probability, -1 if it lowers it",
            "3-6",
            ",\n      \"pathway\": \"platform-policy|regulatory|award/media|viral|release/tour|macro|distribution\",\n      \"connectionStrength\": number",
        ),
    };
    let rationale = brief
        .rationale
        .map(|r| format!("Gap to fill: {}\n", r))
        .unwrap_or_default();

    format!(
        r#"Question: {question}
Current market price: {market}
Subclaims: {subclaims}
{rationale}
Research summary:
{digest}

Source URLs from search (use only these; use [] when none applies):
{urls}

Create {count} evidence items: {role}.
Types: A = primary/official documents, B = high-quality secondary with verified sourcing, C = standard secondary, D = weak or speculative.
Include a publication date for every item. Reject anything not about the question's subject.

Return JSON:
{{
  "items": [
    {{
      "id": "string",
      "claim": "string",
      "polarity": 1,
      "type": "A|B|C|D",
      "publishedAt": "YYYY-MM-DD",
      "urls": ["string"],
      "originId": "string",
      "firstReport": false,
      "verifiability": 0.0,
      "corroborationsIndep": 0,
      "consistency": 0.0{extra_fields}
    }}
  ]
}}"#,
        question = input.question,
        subclaims = input.plan.subclaims.join(" | "),
    )
}
