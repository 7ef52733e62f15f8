//! Page-object cache traits and option types

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::capability::PageRef;

/// Page object trait
///
/// A stateful proxy bound to a page. Instances are built once per cache key,
/// initialized while still exclusively owned, then shared behind an `Arc`.
#[async_trait]
pub trait PageObject: Send + Sync + 'static {
    /// Bind the instance to its page
    async fn initialize(&mut self, page: PageRef) -> Result<(), crate::Error>;

    /// Release resources when the cache drops the instance
    ///
    /// Failures are logged by the cache and never reach its callers.
    async fn cleanup(&self) -> Result<(), crate::Error> {
        Ok(())
    }
}

/// Hook run on a freshly initialized instance before it is cached
pub type ReadinessHook<T> =
    Box<dyn FnOnce(Arc<T>) -> BoxFuture<'static, Result<(), crate::Error>> + Send>;

/// Per-call options for [`PageObjectCache::acquire`](super::PageObjectCache::acquire)
///
/// Only the caller that starts a construction has its options applied;
/// callers joining an in-flight construction share its outcome.
pub struct AcquireOptions<T> {
    /// Page handed to `PageObject::initialize`
    pub page: Option<PageRef>,
    /// Do not call `initialize`
    pub skip_initialize: bool,
    /// Readiness check; a failure discards the instance
    pub ready: Option<ReadinessHook<T>>,
}

impl<T> Default for AcquireOptions<T> {
    fn default() -> Self {
        Self {
            page: None,
            skip_initialize: false,
            ready: None,
        }
    }
}

impl<T> AcquireOptions<T> {
    /// Options that initialize against `page`
    pub fn with_page(page: PageRef) -> Self {
        Self {
            page: Some(page),
            ..Default::default()
        }
    }

    /// Options that skip initialization entirely
    pub fn uninitialized() -> Self {
        Self {
            skip_initialize: true,
            ..Default::default()
        }
    }

    /// Add a readiness hook
    pub fn ready<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(Arc<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), crate::Error>> + Send + 'static,
    {
        self.ready = Some(Box::new(move |instance| Box::pin(hook(instance))));
        self
    }
}

/// Cache policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    /// Entry lifetime; zero disables expiry
    pub ttl: Duration,
    /// Maximum number of cached entries (at least 1)
    pub max_size: usize,
    /// Period of the background expiry sweep
    pub sweep_interval: Option<Duration>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::ZERO,
            max_size: 50,
            sweep_interval: None,
        }
    }
}

impl CachePolicy {
    /// Policy with the given lifetime and capacity, no sweep
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            ttl,
            max_size,
            sweep_interval: None,
        }
    }

    /// Enable the background expiry sweep
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), crate::Error> {
        if self.max_size == 0 {
            return Err(crate::Error::configuration("max_size must be at least 1"));
        }
        if self.sweep_interval.is_some_and(|i| i.is_zero()) {
            return Err(crate::Error::configuration(
                "sweep_interval must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Calls that joined an in-flight construction
    pub coalesced: u64,
    pub constructions: u64,
    pub failures: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
    /// Live entries
    pub size: usize,
    /// Unresolved constructions
    pub pending: usize,
}
