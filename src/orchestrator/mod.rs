//! Orchestrator Module
//!
//! Runs a forecast end to end: planning, two research cycles with a
//! critique in between, aggregation and reporting, with progress events
//! at every stage.

pub mod analyst;
pub mod critic;
pub mod drivers;
pub mod event_bus;
pub mod history;
pub mod interval;
pub mod pipeline;
pub mod planner;
pub mod reporter;
pub mod researcher;

pub use analyst::{AnalysisOutcome, Analyst, AnalystSettings, LiveMarket, MarketFn, PayloadMarket};
pub use critic::{Critic, Critique, FollowUpSearch, Side, MAX_FOLLOW_UP_SEARCHES};
pub use drivers::{fallback_drivers, DriverGenerator, DriverSet};
pub use event_bus::{
    steps, ChannelSink, EventBus, EventKind, FanoutSink, NullSink, ProgressEvent, ProgressSink, RecordingSink,
    TracingSink,
};
pub use history::{migrate_record, HistoryRecord, HistoryStore, HISTORY_VERSION};
pub use interval::{explain_interval_choice, select_history_interval};
pub use pipeline::{ForecastPipeline, ForecastRequest, PipelineState};
pub use planner::{RecencyGuidance, ResearchPlan, ResearchPlanner};
pub use reporter::{ReportComposer, ReportInput, Reporter};
pub use researcher::{fresh_first, FollowUpEvidence, ResearchInput, ResearchSettings, Researcher, Selection};
