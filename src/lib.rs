//! Forecast Agency
//!
//! Evidence aggregation and multi-cycle research orchestration for
//! prediction-market forecasting:
//! - Research planning, pro/con/adjacent evidence gathering and critique
//! - Log-odds aggregation with correlation-aware discounting
//! - Market blending strictly after the evidence-only posterior is fixed
//! - Streaming progress events and a versioned forecast history

pub mod agent;
pub mod config;
pub mod forecasting;
pub mod orchestrator;
pub mod telemetry;
pub mod tools;

// Re-exports for convenience
pub use agent::{ForecastError, ForecastResult, LLMProvider};
pub use config::{ConfigManager, ForecastConfig};
pub use forecasting::{Evidence, ForecastCard};
pub use orchestrator::{ForecastPipeline, ForecastRequest};
