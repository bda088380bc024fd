//! Progress Event Bus
//!
//! Ordered, out-of-band progress events for a forecast run. Sinks are
//! best-effort: `emit` cannot fail, and a slow or closed consumer never
//! blocks the pipeline.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::forecasting::ForecastCard;

/// Step names emitted by the pipeline, in run order.
pub mod steps {
    pub const FETCH_COMPLETE_DATA: &str = "fetch_complete_data";
    pub const COMPLETE_DATA_READY: &str = "complete_data_ready";
    pub const OPTIMIZE_PARAMETERS: &str = "optimize_parameters";
    pub const PARAMETERS_OPTIMIZED: &str = "parameters_optimized";
    pub const PLANNING: &str = "planning";
    pub const PLAN_COMPLETE: &str = "plan_complete";
    pub const RESEARCHING: &str = "researching";
    pub const INITIAL_RESEARCH_COMPLETE: &str = "initial_research_complete";
    pub const CRITICISM: &str = "criticism";
    pub const CRITICISM_COMPLETE: &str = "criticism_complete";
    pub const FOLLOWUP_RESEARCH: &str = "followup_research";
    pub const FOLLOWUP_RESEARCH_COMPLETE: &str = "followup_research_complete";
    pub const FOLLOWUP_RESEARCH_SKIPPED: &str = "followup_research_skipped";
    pub const AGGREGATING: &str = "aggregating";
    pub const AGGREGATION_COMPLETE: &str = "aggregation_complete";
    pub const REPORTING: &str = "reporting";
    pub const REPORT_COMPLETE: &str = "report_complete";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Connected,
    Progress,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast: Option<ForecastCard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

impl ProgressEvent {
    fn base(kind: EventKind) -> Self {
        Self {
            kind,
            step: None,
            message: None,
            details: None,
            forecast: None,
            error: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn connected() -> Self {
        Self {
            message: Some("Connected to forecast stream".to_string()),
            ..Self::base(EventKind::Connected)
        }
    }

    pub fn progress(step: &str, message: impl Into<String>, details: Value) -> Self {
        Self {
            step: Some(step.to_string()),
            message: Some(message.into()),
            details: Some(details),
            ..Self::base(EventKind::Progress)
        }
    }

    pub fn complete(card: ForecastCard) -> Self {
        Self {
            message: Some("Forecast complete".to_string()),
            forecast: Some(card),
            ..Self::base(EventKind::Complete)
        }
    }

    pub fn error(error: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            error: Some(error.into()),
            details,
            ..Self::base(EventKind::Error)
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Complete | EventKind::Error)
    }
}

/// Fire-and-forget progress consumer.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<T: ProgressSink + ?Sized> ProgressSink for Arc<T> {
    fn emit(&self, event: ProgressEvent) {
        (**self).emit(event)
    }
}

/// Broadcast fan-out to any number of subscribers
pub struct EventBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Create a new subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for EventBus {
    fn emit(&self, event: ProgressEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

/// Single-consumer stream, e.g. a JSON-lines writer.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            warn!("progress consumer disconnected; dropping event");
        }
    }
}

/// Writes progress to the log.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, event: ProgressEvent) {
        match event.kind {
            EventKind::Error => warn!(error = ?event.error, "forecast failed"),
            _ => info!(
                kind = ?event.kind,
                step = event.step.as_deref().unwrap_or("-"),
                "{}",
                event.message.as_deref().unwrap_or("")
            ),
        }
    }
}

pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn steps(&self) -> Vec<String> {
        self.events().into_iter().filter_map(|e| e.step).collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Forwards each event to several sinks in order.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ProgressSink>>) -> Self {
        Self { sinks }
    }
}

impl ProgressSink for FanoutSink {
    fn emit(&self, event: ProgressEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}
