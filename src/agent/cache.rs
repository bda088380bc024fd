//! LLM Response Cache
//!
//! In-memory cache keyed by model and SHA-256 digests of the prompt pair.
//! Re-running a forecast on the same market inside one process reuses
//! planner and critic answers instead of paying for them twice.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::provider::LLMProvider;

pub const DEFAULT_CACHE_CAPACITY: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    model: String,
    prompt_hash: [u8; 32],
    system_hash: [u8; 32],
}

impl CacheKey {
    fn new(model: &str, prompt: &str, system: Option<&str>) -> Self {
        Self {
            model: model.to_string(),
            prompt_hash: LLMCache::hash(prompt),
            system_hash: LLMCache::hash(system.unwrap_or("")),
        }
    }
}

#[derive(Default)]
struct CacheInner {
    responses: HashMap<CacheKey, String>,
    order: VecDeque<CacheKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Bounded FIFO cache for LLM responses
pub struct LLMCache {
    inner: RwLock<CacheInner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LLMCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(CacheInner::default()),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn hash(text: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.finalize().into()
    }

    pub async fn get(&self, model: &str, prompt: &str, system: Option<&str>) -> Option<String> {
        let key = CacheKey::new(model, prompt, system);
        let inner = self.inner.read().await;
        let found = inner.responses.get(&key).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    pub async fn set(&self, model: &str, prompt: &str, system: Option<&str>, response: String) {
        let key = CacheKey::new(model, prompt, system);
        let mut inner = self.inner.write().await;
        if inner.responses.insert(key.clone(), response).is_none() {
            inner.order.push_back(key);
        }
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.responses.remove(&oldest);
            }
        }
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.responses.clear();
        inner.order.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.inner.read().await.responses.len(),
        }
    }
}

impl Default for LLMCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Provider that wraps another provider with a cache
pub struct CachedProvider {
    inner: Arc<dyn LLMProvider>,
    cache: Arc<LLMCache>,
}

impl CachedProvider {
    pub fn new(inner: Arc<dyn LLMProvider>, cache: Arc<LLMCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl LLMProvider for CachedProvider {
    async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> anyhow::Result<String> {
        if let Some(cached) = self.cache.get(model, &prompt, system.as_deref()).await {
            tracing::debug!("LLM cache hit for model {}", model);
            return Ok(cached);
        }

        let response = self.inner.generate(model, prompt.clone(), system.clone()).await?;
        self.cache.set(model, &prompt, system.as_deref(), response.clone()).await;
        Ok(response)
    }
}
