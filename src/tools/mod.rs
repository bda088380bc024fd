//! Tool System Module
//!
//! External capabilities the pipeline consumes: web search and market data.

mod market;
mod search;
mod web_search;

pub use market::{
    detect_platform, FetchOptions, HistoryInterval, HttpMarketFetcher, MarketDataFetcher, MarketFacts, MarketPayload,
    OutcomeQuote, PricePoint, PriceSeries,
};
pub use search::{
    HttpSearchProvider, SearchContext, SearchHit, SearchOptions, SearchProvider, SearchResponse, SearchType,
};
pub use web_search::{parse_ddg_html, DuckDuckGoSearchProvider};
