//! Content-addressed embedding cache.
//!
//! Keys are `(model, dims, sha256(text))`; values are the embedding vectors.
//! Bounded by entry count with a time-to-live (`mini_moka`). Concurrent
//! misses for the same key are collapsed: the first caller computes, the
//! rest wait on a per-key gate and then read the cached value.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mini_moka::sync::{Cache, ConcurrentCacheExt};
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    model: String,
    dims: usize,
    text_hash: [u8; 32],
}

impl CacheKey {
    pub fn new(model: &str, dims: usize, text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Self {
            model: model.to_string(),
            dims,
            text_hash: hasher.finalize().into(),
        }
    }
}

type Gate = Arc<tokio::sync::Mutex<()>>;

pub struct EmbeddingCache {
    cache: Option<Cache<CacheKey, Vec<f32>>>,
    in_flight: Mutex<HashMap<CacheKey, Gate>>,
}

impl EmbeddingCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = config.enabled.then(|| {
            Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(Duration::from_secs(config.ttl_secs))
                .build()
        });
        Self {
            cache,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            cache: None,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<f32>> {
        self.cache.as_ref().and_then(|c| c.get(key))
    }

    /// Return the cached vector for `key`, or run `compute` and cache an `Ok`.
    ///
    /// At most one `compute` runs per key at a time. Errors are not cached.
    pub async fn get_or_try_insert<F, Fut, E>(&self, key: CacheKey, compute: F) -> Result<Vec<f32>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<f32>, E>>,
    {
        let Some(cache) = &self.cache else {
            return compute().await;
        };
        if let Some(hit) = cache.get(&key) {
            tracing::trace!("embedding cache hit");
            return Ok(hit);
        }

        // Declared before the lock guard so the guard drops first, also when
        // the caller abandons this future mid-compute.
        let slot = GateSlot::acquire(self, &key);
        let _guard = slot.gate().lock().await;

        match cache.get(&key) {
            Some(hit) => Ok(hit),
            None => {
                let computed = compute().await;
                if let Ok(vector) = &computed {
                    cache.insert(key, vector.clone());
                }
                computed
            }
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.as_ref().map_or(0, |c| {
            c.sync();
            c.entry_count()
        })
    }

    pub fn invalidate_all(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
            cache.sync();
        }
    }

    fn gates(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Gate>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One caller's hold on a per-key gate.
///
/// Dropping it forgets the key once no other caller holds the gate. Clones
/// are only created and dropped under the map lock, so the count seen there
/// is exact.
struct GateSlot<'a> {
    cache: &'a EmbeddingCache,
    key: CacheKey,
    gate: Gate,
}

impl<'a> GateSlot<'a> {
    fn acquire(cache: &'a EmbeddingCache, key: &CacheKey) -> Self {
        let gate = cache.gates().entry(key.clone()).or_default().clone();
        Self {
            cache,
            key: key.clone(),
            gate,
        }
    }

    fn gate(&self) -> &tokio::sync::Mutex<()> {
        &self.gate
    }
}

impl Drop for GateSlot<'_> {
    fn drop(&mut self) {
        let mut map = self.cache.gates();
        drop(std::mem::take(&mut self.gate));
        if map.get(&self.key).is_some_and(|g| Arc::strong_count(g) == 1) {
            map.remove(&self.key);
        }
    }
}
