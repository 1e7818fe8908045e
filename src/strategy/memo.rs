//! Result memoization ("cached" / "once")
//!
//! Results are stored per owner and argument fingerprint and handed back on
//! every later matching call, including while the first call is still running.
//! A rejected result is dropped so the next matching call runs again.
//! Successes stay until the operation is invalidated, either through
//! [`Memoize::invalidate`] or through the global [`invalidate`] side-channel.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::core::config::StrategyConfig;
use crate::core::errors::Result;
use crate::core::metrics::MetricsSnapshot;
use crate::core::runtime::{Scheduler, TokioScheduler};
use crate::outcome::{deferred, Outcome};
use crate::store::{CallTable, Fingerprint, OwnerStore};
use crate::strategy::{Operation, StrategyCore};

static NEXT_OPERATION: AtomicU64 = AtomicU64::new(1);

/// Identity of one memoized operation, independent of any owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(u64);

impl OperationId {
    fn next() -> Self {
        Self(NEXT_OPERATION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Anything whose stored results can be dropped from the outside
pub trait Invalidate: Send + Sync {
    /// Clear every stored result for every owner. Returns how many were cleared.
    fn invalidate_all(&self) -> usize;
}

/// Maps operation ids to the live stores behind them
pub struct InvalidationRegistry {
    stores: DashMap<OperationId, Weak<dyn Invalidate>>,
}

impl InvalidationRegistry {
    pub fn new() -> Self {
        Self {
            stores: DashMap::new(),
        }
    }

    pub fn register(&self, id: OperationId, store: Weak<dyn Invalidate>) {
        self.stores.insert(id, store);
    }

    pub fn unregister(&self, id: OperationId) -> bool {
        self.stores.remove(&id).is_some()
    }

    /// Invalidate the store registered under `id`, if it is still alive
    pub fn invalidate(&self, id: OperationId) -> Option<usize> {
        let store = self.stores.get(&id).and_then(|entry| entry.value().upgrade())?;
        Some(store.invalidate_all())
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

impl Default for InvalidationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    pub static ref INVALIDATION_REGISTRY: InvalidationRegistry = InvalidationRegistry::new();
}

/// Clear every stored result of the memoized operation `id`, for all owners.
///
/// Returns false if no live operation is registered under `id`. Other
/// operations are untouched, even when they share owners.
pub fn invalidate(id: OperationId) -> bool {
    match INVALIDATION_REGISTRY.invalidate(id) {
        Some(cleared) => {
            debug!(operation = %id, cleared, "invalidated through registry");
            true
        }
        None => {
            trace!(operation = %id, "no live operation to invalidate");
            false
        }
    }
}

struct MemoRecord<A, T: Clone> {
    entries: Mutex<CallTable<A, T>>,
}

impl<A: Fingerprint, T: Clone> MemoRecord<A, T> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(CallTable::new()),
        }
    }
}

struct MemoInner<O: ?Sized, A, T: Clone> {
    id: OperationId,
    core: Arc<StrategyCore<O, A, T>>,
    store: OwnerStore<O, MemoRecord<A, T>>,
}

impl<O, A, T> Invalidate for MemoInner<O, A, T>
where
    O: ?Sized + Send + Sync + 'static,
    A: Fingerprint + Send + 'static,
    T: Clone + Send + 'static,
{
    fn invalidate_all(&self) -> usize {
        let cleared: usize = self
            .store
            .records()
            .iter()
            .map(|record| record.entries.lock().clear())
            .sum();
        self.core.metrics.record_invalidation();
        debug!(strategy = %self.core.label, operation = %self.id, cleared, "cleared memoized results");
        cleared
    }
}

impl<O: ?Sized, A, T: Clone> Drop for MemoInner<O, A, T> {
    fn drop(&mut self) {
        INVALIDATION_REGISTRY.unregister(self.id);
    }
}

/// Memoizes results per owner and argument fingerprint
pub struct Memoize<O: ?Sized, A, T: Clone> {
    inner: Arc<MemoInner<O, A, T>>,
}

impl<O, A, T> Memoize<O, A, T>
where
    O: ?Sized + Send + Sync + 'static,
    A: Fingerprint + Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    /// One stored result per distinct argument list
    pub fn new<F, Fut>(op: F) -> Self
    where
        F: Fn(Arc<O>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let config = StrategyConfig {
            label: "memoize".to_string(),
            ..Default::default()
        };
        Self::build(Arc::new(op), config, Arc::new(TokioScheduler::new()))
    }

    /// A single slot per owner: a call with different arguments replaces it
    pub fn once<F, Fut>(op: F) -> Self
    where
        F: Fn(Arc<O>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let config = StrategyConfig {
            label: "once".to_string(),
            ..StrategyConfig::once()
        };
        Self::build(Arc::new(op), config, Arc::new(TokioScheduler::new()))
    }

    pub fn with_config<F, Fut>(op: F, config: StrategyConfig) -> Result<Self>
    where
        F: Fn(Arc<O>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::from_operation(Arc::new(op), config, Arc::new(TokioScheduler::new()))
    }

    pub fn from_operation(
        op: Arc<dyn Operation<O, A, T>>,
        config: StrategyConfig,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(op, config, scheduler))
    }

    fn build(op: Arc<dyn Operation<O, A, T>>, config: StrategyConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        let store = OwnerStore::new(config.reclaim_interval);
        let inner = Arc::new(MemoInner {
            id: OperationId::next(),
            core: Arc::new(StrategyCore::new(op, config, scheduler)),
            store,
        });
        let weak: Weak<dyn Invalidate> = Arc::downgrade(&inner) as Weak<dyn Invalidate>;
        INVALIDATION_REGISTRY.register(inner.id, weak);
        Self { inner }
    }

    /// Return the stored outcome for `args`, or run the operation and store it.
    pub fn call(&self, owner: &Arc<O>, args: A) -> Outcome<T> {
        let core = &self.inner.core;
        core.metrics.record_call();
        let record = self.inner.store.get_or_create(owner, MemoRecord::new);
        let (resolver, outcome) = deferred(Arc::clone(&core.label));

        let id = {
            let mut entries = record.entries.lock();
            // A rejection whose observer has not run yet is treated as gone.
            if let Some(stored) = entries.find(&args, |outcome| !outcome.is_rejected()) {
                core.metrics.record_joined();
                trace!(strategy = %core.label, "returning memoized outcome");
                return stored;
            }
            if let Some(capacity) = core.config.memo_capacity {
                let evicted = entries.truncate_oldest(capacity.saturating_sub(1));
                if evicted > 0 {
                    trace!(strategy = %core.label, evicted, "evicted memoized results");
                }
            }
            entries.insert(args.clone(), outcome.clone())
        };

        let weak = Arc::downgrade(&record);
        outcome.on_settle(move |result| {
            if result.is_err() {
                if let Some(record) = weak.upgrade() {
                    record.entries.lock().remove(id);
                }
            }
        });

        debug!(strategy = %core.label, operation = %self.inner.id, entry = id, "memoizing fresh call");
        let running = core.start(Arc::clone(owner), args);
        core.spawn(Box::pin(async move {
            resolver.settle(running.await);
        }));
        outcome
    }

    /// Identity to pass to [`invalidate`]
    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    /// Clear every stored result of this operation, for all owners
    pub fn invalidate(&self) -> usize {
        self.inner.invalidate_all()
    }

    /// Clear the stored results of one owner only
    pub fn invalidate_owner(&self, owner: &Arc<O>) -> usize {
        let cleared = self
            .inner
            .store
            .get(owner)
            .map(|record| record.entries.lock().clear())
            .unwrap_or(0);
        self.inner.core.metrics.record_invalidation();
        cleared
    }

    /// Results stored for `owner`, settled or still running
    pub fn cached(&self, owner: &Arc<O>) -> usize {
        self.inner
            .store
            .get(owner)
            .map(|record| record.entries.lock().len())
            .unwrap_or(0)
    }

    pub fn reclaim(&self) -> usize {
        self.inner.store.reclaim()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.core.metrics.snapshot()
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.inner.core.config
    }
}
