use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

use crate::errors::AppError;
use crate::store::kv::KeyValueStore;

/// Cache-aside layer: the key-value store (tier 1) in front of the primary
/// record store (tier 2, the source of truth, handled by the loader passed
/// to `read`).
///
/// Reads populate on miss; writers call `invalidate` after their primary
/// commit. The cache is an optimization only: when the key-value store is
/// unreachable reads fall through to the loader and invalidation failures
/// are logged, never surfaced.
///
/// Concurrent misses for one key inside this process are coalesced so only
/// one loader runs. Separate processes may still load the same key at once.
#[derive(Clone)]
pub struct CacheAside {
    kv: Arc<dyn KeyValueStore>,
    /// Bumped on every invalidation. A loader that started before a bump
    /// must not leave its (possibly stale) value behind.
    epochs: Arc<DashMap<String, u64>>,
    in_flight: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl CacheAside {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            epochs: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Return the cached value for `key`, or run `load`, cache its result
    /// for `ttl_secs` and return it. Loader errors propagate untouched.
    pub async fn read<T, F, Fut>(&self, key: &str, ttl_secs: u64, load: F) -> Result<T, AppError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        if let Some(hit) = self.lookup(key).await {
            return Ok(hit);
        }

        let flight = self.in_flight.entry(key.to_string()).or_default().clone();
        let result = {
            let _guard = flight.lock().await;
            // another caller may have populated the key while we waited
            match self.lookup(key).await {
                Some(hit) => Ok(hit),
                None => self.load_and_populate(key, ttl_secs, load).await,
            }
        };
        drop(flight);
        self.in_flight
            .remove_if(key, |_, flight| Arc::strong_count(flight) == 1);
        result
    }

    /// Drop every key in `keys`. Call only after the primary store commit.
    pub async fn invalidate(&self, keys: &[String]) {
        for key in keys {
            *self.epochs.entry(key.clone()).or_insert(0) += 1;
            match self.kv.delete(key).await {
                Ok(_) => tracing::debug!(key = %key, "cache invalidated"),
                Err(e) => tracing::error!(key = %key, error = %e, "cache invalidation failed"),
            }
        }
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.kv.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    tracing::debug!(key, "cache hit");
                    Some(value)
                }
                Err(e) => {
                    tracing::warn!(key, error = %e, "undecodable cache entry, treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache unavailable, falling through to primary store");
                None
            }
        }
    }

    async fn load_and_populate<T, F, Fut>(
        &self,
        key: &str,
        ttl_secs: u64,
        load: F,
    ) -> Result<T, AppError>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let epoch = self.epoch(key);
        tracing::debug!(key, "cache miss");
        let value = load().await?;

        if self.epoch(key) != epoch {
            return Ok(value);
        }
        let json = match serde_json::to_string(&value) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(key, error = %e, "value not cacheable");
                return Ok(value);
            }
        };
        if let Err(e) = self.kv.set_ex(key, &json, ttl_secs).await {
            tracing::warn!(key, error = %e, "cache populate failed");
            return Ok(value);
        }
        // an invalidation may have slipped in between the check and the set
        if self.epoch(key) != epoch {
            if let Err(e) = self.kv.delete(key).await {
                tracing::error!(key, error = %e, "failed to drop raced cache entry");
            }
        }
        Ok(value)
    }

    fn epoch(&self, key: &str) -> u64 {
        self.epochs.get(key).map(|e| *e).unwrap_or(0)
    }
}
