//! Agent Module
//!
//! Capability boundary for language-model calls: the provider trait,
//! structured invocation, response caching and the error taxonomy.

mod cache;
mod error;
mod provider;
mod structured;
mod types;

pub use cache::{CacheStats, CachedProvider, LLMCache, DEFAULT_CACHE_CAPACITY};
pub use error::{ForecastError, ForecastResult, StructuredOutcome};
pub use provider::{LLMProvider, OpenAICompatibleProvider};
pub use structured::{invoke_structured, invoke_text, parse_structured, StructuredSchema, TaskSpec};
pub use types::AgentRole;

pub fn truncate(s: &str, max_len: usize) -> String {
    let s = s.replace('\n', " ");
    if s.len() <= max_len {
        s
    } else {
        let target_len = max_len.saturating_sub(3);
        let mut end = target_len;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

/// Cut `s` to at most `max_len` bytes on a char boundary, keeping newlines.
pub fn clip(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
