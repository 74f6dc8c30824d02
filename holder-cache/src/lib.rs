//! Per-holder cache of resolved views, keyed by [`QueryOptions`].
//!
//! Each holder gets a [`HolderCache`]. A view is computed lazily on first
//! request and then shared. Concurrent requests for the same holder and
//! query wait on one computation instead of racing. A view that contains a
//! temporary node is dropped once that node expires.

pub mod view;

use authz::{HolderId, QueryOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

pub use view::{CachedView, PermissionView};

type Slot = Arc<OnceCell<Arc<CachedView>>>;

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    invalidations: AtomicU64,
}

/// Cache statistics across all holders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub computations: u64,
    pub invalidations: u64,
    pub holders: usize,
    pub live_entries: usize,
}

/// Views for one holder.
#[derive(Debug)]
pub struct HolderCache {
    holder: HolderId,
    entries: RwLock<HashMap<QueryOptions, Slot>>,
    counters: Arc<Counters>,
}

impl HolderCache {
    fn new(holder: HolderId, counters: Arc<Counters>) -> Self {
        Self {
            holder,
            entries: RwLock::new(HashMap::new()),
            counters,
        }
    }

    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    /// Returns the cached view for `query`, computing it with `compute` if
    /// there is none or the cached one went stale at `now`.
    pub async fn get_or_compute<F>(
        &self,
        query: &QueryOptions,
        now: DateTime<Utc>,
        compute: F,
    ) -> Arc<CachedView>
    where
        F: FnOnce() -> CachedView,
    {
        {
            let entries = self.entries.read().await;
            if let Some(view) = entries.get(query).and_then(|slot| slot.get()) {
                if !view.is_stale(now) {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    debug!("Cache hit: holder={}, query={}", self.holder, query);
                    return Arc::clone(view);
                }
            }
        }

        let slot = {
            let mut entries = self.entries.write().await;
            let stale = entries
                .get(query)
                .and_then(|slot| slot.get())
                .is_some_and(|view| view.is_stale(now));
            if stale {
                debug!("Cached view expired: holder={}, query={}", self.holder, query);
                entries.remove(query);
            }
            Arc::clone(entries.entry(query.clone()).or_default())
        };

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Cache miss: holder={}, query={}", self.holder, query);
        let view = slot
            .get_or_init(|| async {
                self.counters.computations.fetch_add(1, Ordering::Relaxed);
                Arc::new(compute())
            })
            .await;
        Arc::clone(view)
    }

    /// Drops every view.
    pub async fn invalidate(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Drops views that depend on `group`, plus any still being computed.
    pub async fn invalidate_through(&self, group: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, slot| slot.get().is_some_and(|view| !view.depends_on(group)));
        let removed = before - entries.len();
        if removed > 0 {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Thread-safe registry of holder caches.
#[derive(Debug, Default)]
pub struct CacheManager {
    caches: RwLock<HashMap<HolderId, Arc<HolderCache>>>,
    counters: Arc<Counters>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache for `holder`, created on first use.
    pub async fn cache_for(&self, holder: &HolderId) -> Arc<HolderCache> {
        if let Some(cache) = self.caches.read().await.get(holder) {
            return Arc::clone(cache);
        }
        let mut caches = self.caches.write().await;
        let cache = caches.entry(holder.clone()).or_insert_with(|| {
            Arc::new(HolderCache::new(holder.clone(), Arc::clone(&self.counters)))
        });
        Arc::clone(cache)
    }

    pub async fn invalidate(&self, holder: &HolderId) -> usize {
        let cache = self.caches.read().await.get(holder).cloned();
        match cache {
            Some(cache) => cache.invalidate().await,
            None => 0,
        }
    }

    /// Drops every view of every holder.
    pub async fn invalidate_all(&self) -> usize {
        let caches: Vec<_> = self.caches.read().await.values().cloned().collect();
        let mut count = 0;
        for cache in caches {
            count += cache.invalidate().await;
        }
        info!("Invalidated {} cached views across all holders", count);
        count
    }

    /// Drops every view, of any holder, that depends on `group`.
    pub async fn invalidate_dependents(&self, group: &str) -> usize {
        let caches: Vec<_> = self.caches.read().await.values().cloned().collect();
        let mut count = 0;
        for cache in caches {
            count += cache.invalidate_through(group).await;
        }
        info!("Invalidated {} cached views depending on group {}", count, group);
        count
    }

    /// Forgets a holder entirely, e.g. when it is unloaded.
    pub async fn remove(&self, holder: &HolderId) -> bool {
        self.caches.write().await.remove(holder).is_some()
    }

    pub async fn stats(&self) -> CacheStats {
        let caches: Vec<_> = self.caches.read().await.values().cloned().collect();
        let mut live_entries = 0;
        for cache in &caches {
            live_entries += cache.len().await;
        }
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            computations: self.counters.computations.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            holders: caches.len(),
            live_entries,
        }
    }
}
