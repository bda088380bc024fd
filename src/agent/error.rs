//! Error taxonomy for the forecasting pipeline

use thiserror::Error;

/// Failure categories the orchestrator reacts to.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// A language-model or search call failed outright
    #[error("provider error: {0}")]
    Provider(String),

    /// The provider answered, but not in the expected shape
    #[error("schema mismatch: {0}")]
    Parse(String),

    /// The call succeeded with zero usable items
    #[error("empty result: {0}")]
    EmptyResult(String),

    /// A required upstream artifact could not be obtained
    #[error("{stage} failed: {message}")]
    PipelineFatal { stage: String, message: String },

    #[error("pipeline exceeded its {0}s budget")]
    Timeout(u64),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ForecastError {
    pub fn fatal(stage: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ForecastError::PipelineFatal {
            stage: stage.into(),
            message: message.to_string(),
        }
    }

    /// Escalate a recoverable failure into a stage-fatal one.
    pub fn at_stage(self, stage: &str) -> Self {
        match self {
            ForecastError::PipelineFatal { .. } | ForecastError::Timeout(_) => self,
            other => ForecastError::fatal(stage, other),
        }
    }
}

pub type ForecastResult<T> = std::result::Result<T, ForecastError>;

/// Tagged result of one structured capability call, validated once at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredOutcome<T> {
    Ok(T),
    SchemaMismatch(String),
    ProviderFailure(String),
}

impl<T> StructuredOutcome<T> {
    pub fn into_result(self) -> ForecastResult<T> {
        match self {
            StructuredOutcome::Ok(v) => Ok(v),
            StructuredOutcome::SchemaMismatch(m) => Err(ForecastError::Parse(m)),
            StructuredOutcome::ProviderFailure(m) => Err(ForecastError::Provider(m)),
        }
    }
}
