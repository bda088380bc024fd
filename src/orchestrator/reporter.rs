//! Reporter
//!
//! Renders the Markdown forecast card from aggregation output. The
//! template is deterministic; a model-written narrative is appended when
//! available.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::warn;

use crate::agent::{invoke_text, AgentRole, LLMProvider, TaskSpec};
use crate::forecasting::{host_of, BlendedPosterior, ClusterMeta, Evidence, InfluenceItem, Polarity};

pub const TOP_INFLUENCES: usize = 12;

/// Everything the report needs, borrowed from the finished stage outputs.
pub struct ReportInput<'a> {
    pub question: &'a str,
    pub posterior: &'a BlendedPosterior,
    pub evidence: &'a [Evidence],
    pub drivers: &'a [String],
}

fn pct(p: f64) -> String {
    format!("{:.1}%", p * 100.0)
}

/// Influence items ordered by absolute probability shift.
pub fn top_influences(influence: &[InfluenceItem], n: usize) -> Vec<&InfluenceItem> {
    let mut sorted: Vec<&InfluenceItem> = influence.iter().collect();
    sorted.sort_by(|a, b| {
        b.delta_pp
            .abs()
            .partial_cmp(&a.delta_pp.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted.truncate(n);
    sorted
}

pub struct ReportComposer;

impl ReportComposer {
    pub fn render(input: &ReportInput<'_>) -> String {
        let neutral = input.posterior.neutral();
        let p_neutral = neutral.p_neutral();
        let direction = if p_neutral > 0.5 { "YES" } else { "NO" };
        let confidence = (p_neutral - 0.5).abs() * 200.0;

        let by_id: HashMap<&str, &Evidence> = input.evidence.iter().map(|e| (e.id.as_str(), e)).collect();
        let clusters: HashMap<&str, &ClusterMeta> =
            neutral.clusters().iter().map(|c| (c.cluster_id.as_str(), c)).collect();

        let mut out = String::new();
        let _ = writeln!(out, "# Forecast Card\n\n**Question:** {}\n", input.question);
        let _ = writeln!(out, "## Prediction: {} ({})\n", direction, pct(p_neutral));
        let _ = writeln!(out, "Confidence: {:.1}%\n", confidence);

        let _ = writeln!(out, "## Probabilities\n");
        let _ = writeln!(out, "- Prior (p0): {}", pct(neutral.p0()));
        let _ = writeln!(out, "- Evidence-only (pNeutral): {}", pct(p_neutral));
        match (input.posterior.p_aware(), input.posterior.market()) {
            (Some(p_aware), Some(m)) => {
                let _ = writeln!(
                    out,
                    "- Market-aware (pAware): {} (market {}, alpha {:.2})",
                    pct(p_aware),
                    pct(m.probability),
                    input.posterior.alpha()
                );
            }
            _ => {
                let _ = writeln!(out, "- Market-aware (pAware): omitted");
            }
        }

        let _ = writeln!(out, "\n## Top Influences\n");
        let top = top_influences(neutral.influence(), TOP_INFLUENCES);
        if top.is_empty() {
            let _ = writeln!(out, "_No evidence contributed to this estimate._");
        }
        for item in &top {
            let Some(e) = by_id.get(item.evidence_id.as_str()) else {
                let _ = writeln!(out, "- {} | Δpp={:+.2}", item.evidence_id, item.delta_pp * 100.0);
                continue;
            };
            let sign = match e.polarity {
                Polarity::Supports => "+",
                Polarity::Contradicts => "-",
                Polarity::Neutral => "0",
            };
            let src = e.urls.first().and_then(|u| host_of(u)).unwrap_or_else(|| "unknown".to_string());
            let cluster = clusters
                .get(e.origin_id.as_str())
                .map(|c| format!("cluster={}, rho={:.2}, mEff={:.2}", c.cluster_id, c.rho, c.m_eff))
                .unwrap_or_else(|| "cluster=n/a".to_string());
            let _ = writeln!(
                out,
                "- **{}** | {} | Type {} | Δpp={:+.2} | logLR={:.3} | date={} | src={} | {}\n  {}",
                e.id,
                sign,
                e.kind,
                item.delta_pp * 100.0,
                item.log_lr,
                e.published_at.as_deref().unwrap_or("n/a"),
                src,
                cluster,
                e.claim
            );
        }

        let correlated: Vec<&ClusterMeta> = neutral.clusters().iter().filter(|c| c.size > 1).collect();
        if !correlated.is_empty() {
            let _ = writeln!(out, "\n## Correlation Clusters\n");
            for c in &correlated {
                let _ = writeln!(
                    out,
                    "- {}: {} items, rho={:.2}, mEff={:.2}, meanLLR={:.3}",
                    c.cluster_id, c.size, c.rho, c.m_eff, c.mean_llr
                );
            }
        }

        let adjacent: Vec<&Evidence> = input.evidence.iter().filter(|e| e.pathway.is_some()).collect();
        if !adjacent.is_empty() {
            let _ = writeln!(out, "\n## Adjacent Signals & Catalysts\n");
            for e in adjacent {
                let _ = writeln!(
                    out,
                    "- {} | pathway={} | strength={} | Type {}\n  {}",
                    e.id,
                    e.pathway.as_deref().unwrap_or("adjacent"),
                    e.connection_strength.map(|s| format!("{:.2}", s)).unwrap_or_else(|| "n/a".into()),
                    e.kind,
                    e.claim
                );
            }
        }

        if !input.drivers.is_empty() {
            let _ = writeln!(out, "\n## Key Drivers\n");
            for d in input.drivers.iter().take(5) {
                let _ = writeln!(out, "- {}", d);
            }
        }

        let _ = writeln!(out, "\n## Caveats & Limitations\n");
        for caveat in Self::caveats(input) {
            let _ = writeln!(out, "- {}", caveat);
        }
        out
    }

    fn caveats(input: &ReportInput<'_>) -> Vec<String> {
        let neutral = input.posterior.neutral();
        let mut caveats = Vec::new();
        if input.evidence.is_empty() {
            caveats.push("No evidence survived filtering; the estimate equals the prior.".to_string());
        }
        let discounted = neutral.clusters().iter().filter(|c| c.m_eff < c.size as f64).count();
        if discounted > 0 {
            caveats.push(format!("{} source cluster(s) were discounted for correlated reporting.", discounted));
        }
        let undated = input.evidence.iter().filter(|e| e.published_at.is_none()).count();
        if undated > 0 {
            caveats.push(format!("{} undated item(s) were weighted as stale.", undated));
        }
        match input.posterior.market() {
            None => caveats.push("No live market price was available; pAware is omitted.".to_string()),
            Some(m) if (m.probability - neutral.p_neutral()).abs() > 0.2 => caveats.push(format!(
                "Evidence-only estimate diverges from the market by {:.1} points.",
                (m.probability - neutral.p_neutral()).abs() * 100.0
            )),
            Some(_) => {}
        }
        caveats.push("Model-extracted claims can misstate their sources; check the cited URLs.".to_string());
        caveats
    }
}

pub struct Reporter {
    provider: Arc<dyn LLMProvider>,
    model: String,
    narrative: bool,
}

impl Reporter {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            model: AgentRole::Reporter.default_model().to_string(),
            narrative: true,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_narrative(mut self, enabled: bool) -> Self {
        self.narrative = enabled;
        self
    }

    pub async fn compose(&self, input: &ReportInput<'_>) -> String {
        let card = ReportComposer::render(input);
        if !self.narrative {
            return card;
        }

        let prompt = format!(
            "Question: {}\n\nBelow is a forecast card. Write the narrative sections only:\n\
             \"## Why This Prediction\" linking the top positive and negative evidence to the shift (cite evidence ids and Δpp),\n\
             and \"## What Would Change Our Mind\" with 3-5 concrete events and their likely direction.\n\
             Do not restate the probabilities table. Markdown only.\n\n{}",
            input.question, card
        );
        let task = TaskSpec::new(&self.model, prompt).with_system(AgentRole::Reporter.system_prompt());

        match invoke_text(self.provider.as_ref(), &task).await {
            Ok(text) if !text.trim().is_empty() => format!("{}\n{}\n", card, text.trim()),
            Ok(_) => card,
            Err(e) => {
                warn!("Narrative generation failed, using template report: {}", e);
                card
            }
        }
    }
}
