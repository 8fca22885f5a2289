//! Cache-aside layer shielding the GitHub API from repeated load.
//!
//! `CacheAside::with_cache` reads a key, and on a miss runs the supplied fetch,
//! then writes the result back with a per-operation TTL. The backing
//! `CacheStore` may fail at any time; such failures are logged and treated as
//! a miss so the pipeline degrades to direct upstream calls.

use crate::config::AppConfig;
use crate::error::CacheError;
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Key-value store holding serialized JSON values with a TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
}

#[derive(Clone)]
struct StoredValue {
    payload: Arc<str>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, StoredValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process store backed by moka, honouring a TTL per entry.
#[derive(Clone)]
pub struct MemoryStore {
    cache: Cache<String, StoredValue>,
}

impl MemoryStore {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self
            .cache
            .get(key)
            .await
            .map(|stored| stored.payload.to_string()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let stored = StoredValue {
            payload: Arc::from(value),
            ttl,
        };
        self.cache.insert(key.to_string(), stored).await;
        Ok(())
    }
}

#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

#[cfg(feature = "redis")]
mod redis_store {
    use super::*;
    use redis::AsyncCommands;
    use tokio::time::timeout;

    /// Shared Redis store. Every value is written with `SET key value EX ttl`.
    ///
    /// Each operation, connecting included, is bounded by `timeout`; a store
    /// that accepts connections but never answers reads as unavailable.
    #[derive(Clone)]
    pub struct RedisStore {
        client: redis::Client,
        timeout: Duration,
    }

    impl RedisStore {
        pub fn new(url: &str, timeout: Duration) -> Result<Self, CacheError> {
            let client =
                redis::Client::open(url).map_err(|e| CacheError::Unavailable(e.to_string()))?;
            Ok(Self { client, timeout })
        }

        async fn bounded<T, Fut>(&self, op: Fut) -> Result<T, CacheError>
        where
            Fut: Future<Output = redis::RedisResult<T>>,
        {
            match timeout(self.timeout, op).await {
                Ok(result) => result.map_err(|e| CacheError::Unavailable(e.to_string())),
                Err(_) => Err(CacheError::Unavailable(format!(
                    "redis timeout after {:?}",
                    self.timeout
                ))),
            }
        }
    }

    #[async_trait]
    impl CacheStore for RedisStore {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            self.bounded(async {
                let mut conn = self.client.get_multiplexed_async_connection().await?;
                Ok::<_, redis::RedisError>(conn.get::<_, Option<String>>(key).await?)
            })
            .await
        }

        async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
            // EX 0 is rejected by Redis
            let seconds = ttl.as_secs().max(1);
            self.bounded(async {
                let mut conn = self.client.get_multiplexed_async_connection().await?;
                conn.set_ex::<_, _, ()>(key, value, seconds).await?;
                Ok::<_, redis::RedisError>(())
            })
            .await
        }
    }

}

/// Builds the store selected by configuration.
pub fn store_from_config(config: &AppConfig) -> Arc<dyn CacheStore> {
    #[cfg(feature = "redis")]
    {
        if let Some(url) = &config.cache_redis_url {
            match RedisStore::new(url, config.cache_timeout()) {
                Ok(store) => {
                    tracing::info!("Using Redis cache store");
                    return Arc::new(store);
                }
                Err(e) => {
                    tracing::warn!("Redis store unavailable, falling back to memory: {}", e);
                }
            }
        }
    }

    #[cfg(not(feature = "redis"))]
    {
        if config.cache_redis_url.is_some() {
            tracing::warn!("CACHE_REDIS_URL set but built without the `redis` feature; using memory");
        }
    }

    Arc::new(MemoryStore::new(config.cache_max_capacity))
}

/// Hit/miss counters for the cache-aside layer.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Point-in-time copy of `CacheStats`, as served to observability consumers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit rate in 0.0..=1.0, zero before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            hit_rate: self.hit_rate(),
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

/// Identity discriminator embedded in every cache key.
///
/// Authenticated callers are separated by a short SHA-256 fingerprint of their
/// credential so that private data never bleeds between users. The raw token
/// never reaches a key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TokenClass {
    Anonymous,
    Authenticated(String),
}

impl TokenClass {
    pub fn of(token: Option<&str>) -> Self {
        match token {
            Some(token) if !token.is_empty() => {
                let digest = Sha256::digest(token.as_bytes());
                let fingerprint: String = digest
                    .iter()
                    .take(8)
                    .map(|byte| format!("{:02x}", byte))
                    .collect();
                Self::Authenticated(fingerprint)
            }
            _ => Self::Anonymous,
        }
    }
}

impl fmt::Display for TokenClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anon"),
            Self::Authenticated(fingerprint) => write!(f, "auth-{}", fingerprint),
        }
    }
}

/// Deterministic cache keys, one builder per cached operation.
pub mod keys {
    use super::TokenClass;

    pub fn repos(username: &str, class: &TokenClass) -> String {
        format!("repos:{}:{}", username, class)
    }

    pub fn commit_count(
        owner: &str,
        repo: &str,
        author: Option<&str>,
        since: Option<&str>,
        class: &TokenClass,
    ) -> String {
        format!(
            "commitCount:{}:{}:{}:{}:{}",
            owner,
            repo,
            author.unwrap_or("any"),
            since.unwrap_or("all"),
            class
        )
    }

    pub fn repo_languages(owner: &str, repo: &str, class: &TokenClass) -> String {
        format!("repoLang:{}:{}:{}", owner, repo, class)
    }

    pub fn language_breakdown(username: &str, class: &TokenClass) -> String {
        format!("langSummary:{}:{}", username, class)
    }

    pub fn score(username: &str, class: &TokenClass) -> String {
        format!("score:{}:{}", username, class)
    }

    pub fn wrapped(username: &str, class: &TokenClass) -> String {
        format!("wrapped:{}:{}", username, class)
    }
}

type InflightMap = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

enum Lookup<T> {
    Hit(T),
    Miss,
    /// The store itself failed.
    Unavailable,
}

/// Cache-aside wrapper around a `CacheStore`.
///
/// Concurrent misses on one key are coalesced: the first caller runs the
/// fetch while the others wait, then re-read the store.
#[derive(Clone)]
pub struct CacheAside {
    store: Arc<dyn CacheStore>,
    stats: Arc<CacheStats>,
    inflight: InflightMap,
}

impl CacheAside {
    pub fn new(store: Arc<dyn CacheStore>, stats: Arc<CacheStats>) -> Self {
        Self {
            store,
            stats,
            inflight: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }

    /// Returns the cached value for `key`, or runs `fetch` and caches its result.
    ///
    /// Errors from `fetch` propagate and nothing is written. Store failures are
    /// logged and never returned. While the store is unreachable, callers skip
    /// the fill lock and fetch directly, in parallel.
    pub async fn with_cache<T, E, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.read::<T>(key).await {
            Lookup::Hit(value) => {
                self.stats.record_hit();
                tracing::debug!(key, "cache hit");
                return Ok(value);
            }
            Lookup::Unavailable => {
                self.stats.record_miss();
                let value = fetch().await?;
                self.write(key, &value, ttl).await;
                return Ok(value);
            }
            Lookup::Miss => {}
        }

        let _fill = self.acquire_fill_lock(key).await;

        // Filled by another caller while we waited
        if let Lookup::Hit(value) = self.read::<T>(key).await {
            self.stats.record_hit();
            tracing::debug!(key, "cache hit after coalesced fill");
            return Ok(value);
        }

        self.stats.record_miss();
        tracing::debug!(key, "cache miss");

        let value = fetch().await?;
        self.write(key, &value, ttl).await;
        Ok(value)
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Lookup<T> {
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Lookup::Hit(value),
                Err(e) => {
                    tracing::warn!(key, "Discarding undecodable cache entry: {}", e);
                    Lookup::Miss
                }
            },
            Ok(None) => Lookup::Miss,
            Err(e) => {
                tracing::warn!(key, "Cache read failed, treating as miss: {}", e);
                Lookup::Unavailable
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, "Skipping cache write: {}", CacheError::from(e));
                return;
            }
        };
        if let Err(e) = self.store.set(key, raw, ttl).await {
            tracing::warn!(key, "Cache write failed: {}", e);
        }
    }

    async fn acquire_fill_lock(&self, key: &str) -> FillGuard {
        let lock = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                inflight
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let guard = Arc::clone(&lock).lock_owned().await;
        FillGuard {
            inflight: Arc::clone(&self.inflight),
            key: key.to_string(),
            lock,
            guard: Some(guard),
        }
    }
}

/// Holds the per-key fill lock; forgets the key once nobody else waits on it.
struct FillGuard {
    inflight: InflightMap,
    key: String,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FillGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        // map entry + our handle
        if Arc::strong_count(&self.lock) <= 2 {
            inflight.remove(&self.key);
        }
    }
}
