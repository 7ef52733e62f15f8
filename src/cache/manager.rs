//! Page-object cache implementation
//!
//! Single-flight construction with TTL expiry and strict LRU eviction.
//! Entry and pending tables sit behind one mutex that is never held across
//! an await; constructions run in spawned tasks so an abandoned caller does
//! not cancel them.

use async_trait::async_trait;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::cache::key::CacheKey;
use crate::cache::traits::{AcquireOptions, CachePolicy, CacheStats, PageObject};
use crate::events::{CacheEventKind, EventDispatcher, LifecycleEvent};
use crate::{Error, Result};

/// Object-safe view of a cached page object
#[async_trait]
trait ErasedPageObject: Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    async fn cleanup(&self) -> Result<()>;
}

#[async_trait]
impl<T: PageObject> ErasedPageObject for T {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    async fn cleanup(&self) -> Result<()> {
        PageObject::cleanup(self).await
    }
}

type Instance = Arc<dyn ErasedPageObject>;
type Outcome = Result<Instance>;

struct CacheEntry {
    instance: Instance,
    created_at: Instant,
    last_accessed_at: Instant,
    /// Tie-breaker for accesses at the same instant
    access_seq: u64,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

struct PendingConstruction {
    rx: watch::Receiver<Option<Outcome>>,
    waiters: usize,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    pending: HashMap<CacheKey, PendingConstruction>,
    access_seq: u64,
}

impl CacheState {
    fn next_seq(&mut self) -> u64 {
        self.access_seq += 1;
        self.access_seq
    }

    /// Remove `key` if its entry has expired
    fn take_expired(&mut self, key: &CacheKey, now: Instant) -> Option<(CacheKey, Instance)> {
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            return self.entries.remove(key).map(|e| (key.clone(), e.instance));
        }
        None
    }

    /// Bump the access time of a live entry
    fn touch(&mut self, key: &CacheKey, now: Instant) -> Option<Instance> {
        let seq = self.next_seq();
        let entry = self.entries.get_mut(key)?;
        if entry.is_expired(now) {
            return None;
        }
        entry.last_accessed_at = now;
        entry.access_seq = seq;
        Some(entry.instance.clone())
    }

    /// Evict least recently used entries until at most `target` remain
    fn evict_lru(&mut self, target: usize) -> Vec<(CacheKey, Instance)> {
        let mut evicted = Vec::new();
        while self.entries.len() > target {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| (e.last_accessed_at, e.access_seq))
                .map(|(k, _)| k.clone());

            let Some(key) = oldest else { break };
            if let Some(entry) = self.entries.remove(&key) {
                evicted.push((key, entry.instance));
            }
        }
        evicted
    }

    fn drain_where<P>(&mut self, mut predicate: P) -> Vec<(CacheKey, Instance)>
    where
        P: FnMut(&CacheKey, &CacheEntry) -> bool,
    {
        let keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(k, e)| predicate(k, e))
            .map(|(k, _)| k.clone())
            .collect();

        keys.into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|e| (k, e.instance)))
            .collect()
    }
}

#[derive(Default)]
struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    constructions: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

struct CacheInner {
    state: Mutex<CacheState>,
    policy: RwLock<CachePolicy>,
    stats: StatsCounters,
    events: Option<Arc<EventDispatcher>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CacheInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn policy(&self) -> CachePolicy {
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn emit(&self, kind: CacheEventKind, key: &CacheKey) {
        if let Some(events) = &self.events {
            events.emit(LifecycleEvent::cache(kind, key));
        }
    }

    /// Resolve a pending construction: drop the pending record and cache a
    /// successful instance. Returns the entries evicted to make room.
    fn finish(&self, key: &CacheKey, outcome: &Outcome) -> Vec<(CacheKey, Instance)> {
        let policy = self.policy();
        let mut state = self.lock_state();
        state.pending.remove(key);

        let Ok(instance) = outcome else {
            return Vec::new();
        };

        let now = Instant::now();
        let mut evicted = state.evict_lru(policy.max_size.saturating_sub(1));
        let seq = state.next_seq();
        let entry = CacheEntry {
            instance: instance.clone(),
            created_at: now,
            last_accessed_at: now,
            access_seq: seq,
            expires_at: (!policy.ttl.is_zero()).then(|| now + policy.ttl),
        };
        if let Some(previous) = state.entries.insert(key.clone(), entry) {
            evicted.push((key.clone(), previous.instance));
        }
        evicted
    }

    /// Run cleanup hooks for removed entries, logging failures
    async fn release(&self, kind: CacheEventKind, removed: Vec<(CacheKey, Instance)>) {
        let counter = match kind {
            CacheEventKind::Evict => Some(&self.stats.evictions),
            CacheEventKind::Expire => Some(&self.stats.expirations),
            CacheEventKind::Invalidate => Some(&self.stats.invalidations),
            _ => None,
        };

        for (key, instance) in removed {
            if let Some(counter) = counter {
                StatsCounters::bump(counter, 1);
            }
            self.emit(kind, &key);

            match instance.cleanup().await {
                Ok(()) => debug!("Released page object {} ({:?})", key, kind),
                Err(e) => warn!("Cleanup failed for page object {}: {}", key, e),
            }
        }
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        let slot = self.sweeper.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

/// Removes a pending record if its construction task dies before resolving
struct PendingGuard {
    inner: Arc<CacheInner>,
    key: CacheKey,
    rx: watch::Receiver<Option<Outcome>>,
    armed: bool,
}

impl PendingGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Construction of {} aborted before resolving", self.key);
        let mut state = self.inner.lock_state();
        if state
            .pending
            .get(&self.key)
            .is_some_and(|p| p.rx.same_channel(&self.rx))
        {
            state.pending.remove(&self.key);
        }
    }
}

enum Lookup {
    Hit(Instance),
    Wait(watch::Receiver<Option<Outcome>>),
    Lead(watch::Sender<Option<Outcome>>, watch::Receiver<Option<Outcome>>),
}

/// Page-object cache
///
/// Cloning yields another handle to the same cache.
#[derive(Clone)]
pub struct PageObjectCache {
    inner: Arc<CacheInner>,
}

static GLOBAL_CACHE: OnceLock<PageObjectCache> = OnceLock::new();

impl Default for PageObjectCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PageObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageObjectCache")
            .field("policy", &self.policy())
            .field("size", &self.len())
            .finish()
    }
}

impl PageObjectCache {
    /// Create a cache with the default policy
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a cache that reports to `events`
    pub fn with_events(events: Arc<EventDispatcher>) -> Self {
        Self::build(Some(events))
    }

    /// Create a cache from configuration, starting its sweep if configured
    pub async fn from_config(
        config: &crate::config::Config,
        events: Option<Arc<EventDispatcher>>,
    ) -> Result<Self> {
        let cache = Self::build(events);
        cache.configure(config.cache_policy()).await?;
        Ok(cache)
    }

    fn build(events: Option<Arc<EventDispatcher>>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState::default()),
                policy: RwLock::new(CachePolicy::default()),
                stats: StatsCounters::default(),
                events,
                sweeper: Mutex::new(None),
            }),
        }
    }

    /// Process-wide default cache
    pub fn global() -> &'static PageObjectCache {
        GLOBAL_CACHE.get_or_init(PageObjectCache::new)
    }

    /// Current policy
    pub fn policy(&self) -> CachePolicy {
        self.inner.policy()
    }

    /// Get a ready instance for `key`, constructing it at most once
    ///
    /// Concurrent callers for the same key share one construction and all
    /// observe its outcome. A failed construction is never cached.
    #[instrument(skip(self, construct, options))]
    pub async fn acquire<T, F, Fut>(
        &self,
        key: CacheKey,
        construct: F,
        options: AcquireOptions<T>,
    ) -> Result<Arc<T>>
    where
        T: PageObject,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if !key.is_type::<T>() {
            return Err(Error::illegal_state(format!(
                "cache key {} does not describe {}",
                key,
                type_name::<T>()
            )));
        }

        let (lookup, expired) = {
            let mut state = self.inner.state.lock()?;
            let now = Instant::now();
            let expired = state.take_expired(&key, now);

            let lookup = if let Some(instance) = state.touch(&key, now) {
                Lookup::Hit(instance)
            } else if let Some(pending) = state.pending.get_mut(&key) {
                pending.waiters += 1;
                Lookup::Wait(pending.rx.clone())
            } else {
                let (tx, rx) = watch::channel(None);
                state.pending.insert(
                    key.clone(),
                    PendingConstruction {
                        rx: rx.clone(),
                        waiters: 1,
                    },
                );
                Lookup::Lead(tx, rx)
            };
            (lookup, expired)
        };

        if let Some(expired) = expired {
            self.inner.release(CacheEventKind::Expire, vec![expired]).await;
        }

        let instance = match lookup {
            Lookup::Hit(instance) => {
                StatsCounters::bump(&self.inner.stats.hits, 1);
                self.inner.emit(CacheEventKind::Hit, &key);
                debug!("Cache hit for {}", key);
                instance
            }
            Lookup::Wait(rx) => {
                StatsCounters::bump(&self.inner.stats.coalesced, 1);
                self.inner.emit(CacheEventKind::Coalesced, &key);
                debug!("Joining in-flight construction of {}", key);
                Self::wait_outcome(&key, rx).await?
            }
            Lookup::Lead(tx, rx) => {
                StatsCounters::bump(&self.inner.stats.misses, 1);
                self.inner.emit(CacheEventKind::Miss, &key);
                debug!("Cache miss for {}, constructing", key);
                self.spawn_construction(key.clone(), tx, rx.clone(), construct, options);
                Self::wait_outcome(&key, rx).await?
            }
        };

        instance.into_any().downcast::<T>().map_err(|_| {
            Error::internal(format!("cached instance for {} has an unexpected type", key))
        })
    }

    /// [`acquire`](Self::acquire) with `T::default()` as the constructor
    pub async fn acquire_default<T>(
        &self,
        locator: impl Into<String>,
        options: AcquireOptions<T>,
    ) -> Result<Arc<T>>
    where
        T: PageObject + Default,
    {
        self.acquire(CacheKey::of::<T>(locator), || async { Ok(T::default()) }, options)
            .await
    }

    fn spawn_construction<T, F, Fut>(
        &self,
        key: CacheKey,
        tx: watch::Sender<Option<Outcome>>,
        rx: watch::Receiver<Option<Outcome>>,
        construct: F,
        options: AcquireOptions<T>,
    ) where
        T: PageObject,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut guard = PendingGuard {
                inner: inner.clone(),
                key: key.clone(),
                rx,
                armed: true,
            };

            StatsCounters::bump(&inner.stats.constructions, 1);
            let outcome: Outcome = Self::construct_instance(&key, construct, options)
                .await
                .map(|instance| instance as Instance);

            let evicted = inner.finish(&key, &outcome);
            guard.disarm();

            match &outcome {
                Ok(_) => info!("Constructed page object {}", key),
                Err(e) => {
                    StatsCounters::bump(&inner.stats.failures, 1);
                    inner.emit(CacheEventKind::ConstructionFailed, &key);
                    warn!("Construction of {} failed: {}", key, e);
                }
            }

            // Every receiver may already be gone; the cache is populated anyway
            let _ = tx.send(Some(outcome));

            inner.release(CacheEventKind::Evict, evicted).await;
        });
    }

    async fn construct_instance<T, F, Fut>(
        key: &CacheKey,
        construct: F,
        options: AcquireOptions<T>,
    ) -> Result<Arc<T>>
    where
        T: PageObject,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut instance = construct().await.map_err(|e| Error::construction(key, e))?;

        if !options.skip_initialize {
            let page = options.page.ok_or_else(|| {
                Error::construction(
                    key,
                    Error::illegal_state("no page capability supplied for initialize"),
                )
            })?;
            instance
                .initialize(page)
                .await
                .map_err(|e| Error::construction(key, e))?;
        }

        let instance = Arc::new(instance);
        if let Some(ready) = options.ready {
            ready(instance.clone())
                .await
                .map_err(|e| Error::construction(key, e))?;
        }

        Ok(instance)
    }

    async fn wait_outcome(key: &CacheKey, mut rx: watch::Receiver<Option<Outcome>>) -> Outcome {
        let resolved: Option<Outcome> = {
            let value = rx.wait_for(Option::is_some).await.map_err(|_| {
                Error::construction(key, Error::internal("construction task aborted"))
            })?;
            (*value).clone()
        };

        resolved.unwrap_or_else(|| {
            Err(Error::internal(format!("construction of {} resolved empty", key)))
        })
    }

    /// Live instance for `key`, bumping its access time
    pub fn get<T: PageObject>(&self, key: &CacheKey) -> Option<Arc<T>> {
        let instance = self.inner.lock_state().touch(key, Instant::now())?;
        instance.into_any().downcast::<T>().ok()
    }

    /// Like [`get`](Self::get), failing with `NotFound` when absent
    pub fn get_required<T: PageObject>(&self, key: &CacheKey) -> Result<Arc<T>> {
        self.get(key)
            .ok_or_else(|| Error::not_found(format!("cache entry {}", key)))
    }

    /// Check for a live, non-expired entry without touching it
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = Instant::now();
        self.inner
            .lock_state()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    /// Time since the live entry under `key` was constructed
    pub fn age(&self, key: &CacheKey) -> Option<Duration> {
        let now = Instant::now();
        self.inner
            .lock_state()
            .entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| now.saturating_duration_since(e.created_at))
    }

    /// Check for an unresolved construction
    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.inner.lock_state().pending.contains_key(key)
    }

    /// Callers currently attached to an unresolved construction
    pub fn pending_waiters(&self, key: &CacheKey) -> usize {
        self.inner
            .lock_state()
            .pending
            .get(key)
            .map(|p| p.waiters)
            .unwrap_or(0)
    }

    /// Number of cached entries, expired ones included until swept
    pub fn len(&self) -> usize {
        self.inner.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached keys, least recently used first
    pub fn keys(&self) -> Vec<CacheKey> {
        let state = self.inner.lock_state();
        let mut entries: Vec<(&CacheKey, &CacheEntry)> = state.entries.iter().collect();
        entries.sort_by_key(|(_, e)| (e.last_accessed_at, e.access_seq));
        entries.into_iter().map(|(k, _)| k.clone()).collect()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> CacheStats {
        let (size, pending) = {
            let state = self.inner.lock_state();
            (state.entries.len(), state.pending.len())
        };
        let s = &self.inner.stats;
        CacheStats {
            hits: s.hits.load(Ordering::Relaxed),
            misses: s.misses.load(Ordering::Relaxed),
            coalesced: s.coalesced.load(Ordering::Relaxed),
            constructions: s.constructions.load(Ordering::Relaxed),
            failures: s.failures.load(Ordering::Relaxed),
            evictions: s.evictions.load(Ordering::Relaxed),
            expirations: s.expirations.load(Ordering::Relaxed),
            invalidations: s.invalidations.load(Ordering::Relaxed),
            size,
            pending,
        }
    }

    /// Remove one entry, running its cleanup hook
    #[instrument(skip(self))]
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        let removed = self.inner.lock_state().entries.remove(key);
        match removed {
            Some(entry) => {
                self.inner
                    .release(CacheEventKind::Invalidate, vec![(key.clone(), entry.instance)])
                    .await;
                true
            }
            None => false,
        }
    }

    /// Remove every entry of page object type `T`
    #[instrument(skip(self))]
    pub async fn invalidate_class<T: 'static>(&self) -> usize {
        let removed = self
            .inner
            .lock_state()
            .drain_where(|k, _| k.is_type::<T>());
        let count = removed.len();
        self.inner.release(CacheEventKind::Invalidate, removed).await;
        count
    }

    /// Remove every entry
    #[instrument(skip(self))]
    pub async fn clear(&self) -> usize {
        let removed = self.inner.lock_state().drain_where(|_, _| true);
        let count = removed.len();
        self.inner.release(CacheEventKind::Invalidate, removed).await;
        info!("Cleared {} page objects", count);
        count
    }

    /// Remove expired entries now
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let removed = self
            .inner
            .lock_state()
            .drain_where(|_, e| e.is_expired(now));
        let count = removed.len();
        if count > 0 {
            debug!("Swept {} expired page objects", count);
        }
        self.inner.release(CacheEventKind::Expire, removed).await;
        count
    }

    /// Replace the policy
    ///
    /// Shrinking `max_size` evicts immediately. The new TTL applies to
    /// entries created afterwards. A sweep interval (re)starts the background
    /// sweep; `None` stops it.
    #[instrument(skip(self))]
    pub async fn configure(&self, policy: CachePolicy) -> Result<()> {
        policy.validate()?;

        *self.inner.policy.write()? = policy.clone();

        let evicted = self.inner.lock_state().evict_lru(policy.max_size);
        self.inner.release(CacheEventKind::Evict, evicted).await;

        self.restart_sweeper(policy.sweep_interval);
        info!(
            "Cache configured: ttl={:?}, max_size={}, sweep={:?}",
            policy.ttl, policy.max_size, policy.sweep_interval
        );
        Ok(())
    }

    fn restart_sweeper(&self, interval: Option<Duration>) {
        let mut slot = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }

        let Some(interval) = interval else { return };
        let weak = Arc::downgrade(&self.inner);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                PageObjectCache { inner }.sweep_expired().await;
            }
        }));
    }

    /// Check if a background sweep is running
    pub fn is_sweeping(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}
