use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};
use lru::LruCache;

use crate::core::{DbError, Result, ShardId, Value};
use crate::result::QueryResult;

tokio::task_local! {
    /// Per-task override of the global enable switch.
    static TASK_CACHING: bool;
}

/// Result-cache key within one shard. The shard itself selects the
/// per-shard cache, so identical SQL on two shards never collides.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub sql: String,
    pub binds: Vec<Value>,
}

impl CacheKey {
    pub fn new(sql: &str, binds: &[Value]) -> Self {
        Self {
            sql: sql.to_string(),
            binds: binds.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub shard: ShardId,
    pub result: QueryResult,
    pub created_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub entries: usize,
}

/// Rows returned by [`QueryCache::fetch`], and whether they came from cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheFetch {
    pub result: QueryResult,
    pub cached: bool,
}

struct ShardCache {
    entries: LruCache<CacheKey, CacheEntry>,
    /// Bumped by every invalidation so results computed before it are not stored.
    generation: u64,
}

impl ShardCache {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            generation: 0,
        }
    }
}

enum Lookup {
    Hit(QueryResult),
    Miss { generation: u64 },
}

/// Shard-scoped cache of query results, invalidated per shard on writes.
pub struct QueryCache {
    shards: Mutex<HashMap<ShardId, ShardCache>>,
    capacity: NonZeroUsize,
    ttl: Option<Duration>,
    enabled: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl QueryCache {
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// `capacity` bounds each shard's entries; 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            shards: Mutex::new(HashMap::new()),
            capacity: NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            ttl: None,
            enabled: AtomicBool::new(true),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Whether reads of the running task are served from and stored in the
    /// cache: a [`cached`](Self::cached) or [`uncached`](Self::uncached) scope
    /// decides, else the global switch.
    pub fn is_enabled(&self) -> bool {
        TASK_CACHING
            .try_with(|enabled| *enabled)
            .unwrap_or_else(|_| self.enabled.load(Ordering::Acquire))
    }

    /// Runs `fut` with caching on for this task only.
    pub async fn cached<F: Future>(fut: F) -> F::Output {
        TASK_CACHING.scope(true, fut).await
    }

    /// Runs `fut` with caching off for this task only. Nothing is flushed and
    /// writes still invalidate.
    pub async fn uncached<F: Future>(fut: F) -> F::Output {
        TASK_CACHING.scope(false, fut).await
    }

    /// Turning the cache off globally also drops everything in it.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        if !enabled {
            self.clear();
        }
    }

    /// Returns the cached rows for `(shard, sql, binds)`, or runs `execute`
    /// and caches what it returns. No lock is held while `execute` runs, so
    /// concurrent misses on one key may both execute; the last one stored wins.
    pub async fn fetch<F, Fut>(&self, shard: ShardId, sql: &str, binds: &[Value], execute: F) -> Result<CacheFetch>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<QueryResult>>,
    {
        if !self.is_enabled() {
            return Ok(CacheFetch {
                result: execute().await?,
                cached: false,
            });
        }

        let key = CacheKey::new(sql, binds);
        let generation = match self.lookup(shard, &key) {
            Ok(Lookup::Hit(result)) => return Ok(CacheFetch { result, cached: true }),
            Ok(Lookup::Miss { generation }) => Some(generation),
            Err(DbError::LockError(reason)) => {
                warn!("query cache unavailable ({}), executing on shard {} directly", reason, shard);
                None
            }
            Err(err) => return Err(err),
        };

        let result = execute().await?;
        if let Some(generation) = generation {
            self.store(shard, key, &result, generation);
        }
        Ok(CacheFetch { result, cached: false })
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<ShardId, ShardCache>>> {
        Ok(self.shards.lock()?)
    }

    fn lookup(&self, shard: ShardId, key: &CacheKey) -> Result<Lookup> {
        let mut shards = self.lock()?;
        let cache = shards
            .entry(shard)
            .or_insert_with(|| ShardCache::new(self.capacity));

        let expired = match cache.entries.get(key) {
            Some(entry) if entry.shard != shard => {
                return Err(DbError::CacheConsistency(format!(
                    "entry for shard {} found in the cache of shard {}",
                    entry.shard, shard
                )));
            }
            Some(entry) => match self.ttl {
                Some(ttl) if entry.created_at.elapsed() > ttl => true,
                _ => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!("query cache hit on shard {}: {}", shard, key.sql);
                    return Ok(Lookup::Hit(entry.result.clone()));
                }
            },
            None => false,
        };
        if expired {
            cache.entries.pop(key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(Lookup::Miss {
            generation: cache.generation,
        })
    }

    fn store(&self, shard: ShardId, key: CacheKey, result: &QueryResult, generation: u64) {
        let Ok(mut shards) = self.shards.lock() else {
            warn!("query cache lock poisoned, result for shard {} not cached", shard);
            return;
        };
        if !self.is_enabled() {
            return;
        }
        let cache = shards
            .entry(shard)
            .or_insert_with(|| ShardCache::new(self.capacity));
        if cache.generation != generation {
            debug!("shard {} was written to during the query, not caching", shard);
            return;
        }
        cache.entries.put(
            key,
            CacheEntry {
                shard,
                result: result.clone(),
                created_at: Instant::now(),
            },
        );
    }

    /// Drops every entry of `shard`. Returns how many were dropped.
    pub fn invalidate(&self, shard: ShardId) -> usize {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        match self.shards.lock() {
            Ok(mut shards) => {
                let cache = shards
                    .entry(shard)
                    .or_insert_with(|| ShardCache::new(self.capacity));
                let dropped = cache.entries.len();
                cache.entries.clear();
                cache.generation += 1;
                debug!("invalidated {} cached results on shard {}", dropped, shard);
                dropped
            }
            Err(poisoned) => {
                // Nothing in a poisoned cache can be trusted.
                warn!("query cache lock poisoned, clearing every shard");
                let dropped = Self::reset(&mut poisoned.into_inner());
                self.shards.clear_poison();
                dropped
            }
        }
    }

    pub fn clear(&self) {
        let mut shards = self.shards.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Self::reset(&mut shards);
        drop(shards);
        self.shards.clear_poison();
    }

    fn reset(shards: &mut HashMap<ShardId, ShardCache>) -> usize {
        shards
            .values_mut()
            .map(|cache| {
                let dropped = cache.entries.len();
                cache.entries.clear();
                cache.generation += 1;
                dropped
            })
            .sum()
    }

    pub fn len(&self, shard: ShardId) -> usize {
        self.shards
            .lock()
            .ok()
            .and_then(|shards| shards.get(&shard).map(|cache| cache.entries.len()))
            .unwrap_or(0)
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self
            .shards
            .lock()
            .map(|shards| shards.values().map(|cache| cache.entries.len()).sum())
            .unwrap_or(0);
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries,
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
