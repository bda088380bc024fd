//! Forecasting Core
//!
//! Pure numeric pipeline: normalization, log-odds weighting, correlation
//! discounting and the market blend.

pub mod aggregator;
pub mod cluster;
pub mod evidence;
pub mod math;
pub mod normalize;
pub mod report_card;
pub mod types;
pub mod weighting;

pub use aggregator::{aggregate_neutral, BlendedPosterior, MarketSnapshot, NeutralPosterior, DEFAULT_MARKET_ALPHA};
pub use cluster::{effective_sample_size, CorrelationClusterer, DEFAULT_RHO};
pub use evidence::{base_log_lr, evidence_log_lr, TYPE_CAPS};
pub use normalize::{canonicalize_url, host_of, EvidenceNormalizer, DEFAULT_DOMAIN_CAP};
pub use report_card::{make_forecast_card, CardParts};
pub use types::{ClusterMeta, Evidence, EvidenceType, ForecastCard, InfluenceItem, Polarity};
pub use weighting::{days_since, parse_published_at, NicheAuthorityScorer, PathwayBooster, RecencyWeighter};
