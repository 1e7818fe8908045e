//! Call deduplication ("singleflight")
//!
//! While a call is in flight, every call for the same owner with a
//! fingerprint-equal argument list gets the same outcome. The entry is removed
//! as soon as the outcome settles, so the next call executes again.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::core::config::StrategyConfig;
use crate::core::errors::Result;
use crate::core::metrics::MetricsSnapshot;
use crate::core::runtime::{Scheduler, TokioScheduler};
use crate::outcome::{deferred, Outcome};
use crate::store::{CallTable, Fingerprint, OwnerStore};
use crate::strategy::{Operation, StrategyCore};

struct DedupRecord<A, T: Clone> {
    in_flight: Mutex<CallTable<A, T>>,
}

impl<A: Fingerprint, T: Clone> DedupRecord<A, T> {
    fn new() -> Self {
        Self {
            in_flight: Mutex::new(CallTable::new()),
        }
    }
}

/// Deduplicates concurrent calls per owner and argument fingerprint
pub struct Singleflight<O: ?Sized, A, T: Clone> {
    core: Arc<StrategyCore<O, A, T>>,
    store: OwnerStore<O, DedupRecord<A, T>>,
}

impl<O, A, T> Singleflight<O, A, T>
where
    O: ?Sized + Send + Sync + 'static,
    A: Fingerprint + Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    pub fn new<F, Fut>(op: F) -> Self
    where
        F: Fn(Arc<O>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let config = StrategyConfig {
            label: "singleflight".to_string(),
            ..Default::default()
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
        Self {
            core: Arc::new(StrategyCore::new(op, config, scheduler)),
            store,
        }
    }

    /// Join the in-flight call for `args`, or start one.
    pub fn call(&self, owner: &Arc<O>, args: A) -> Outcome<T> {
        self.core.metrics.record_call();
        let record = self.store.get_or_create(owner, DedupRecord::new);
        let (resolver, outcome) = deferred(Arc::clone(&self.core.label));

        let id = {
            let mut in_flight = record.in_flight.lock();
            // A settled entry whose observer has not run yet counts as gone.
            if let Some(existing) = in_flight.find(&args, |outcome| !outcome.is_settled()) {
                self.core.metrics.record_joined();
                trace!(strategy = %self.core.label, "joining in-flight call");
                return existing;
            }
            in_flight.insert(args.clone(), outcome.clone())
        };

        let weak = Arc::downgrade(&record);
        outcome.on_settle(move |_| {
            if let Some(record) = weak.upgrade() {
                record.in_flight.lock().remove(id);
            }
        });

        debug!(strategy = %self.core.label, entry = id, "starting deduplicated call");
        let running = self.core.start(Arc::clone(owner), args);
        self.core.spawn(Box::pin(async move {
            resolver.settle(running.await);
        }));
        outcome
    }

    /// Number of calls currently in flight for `owner`
    pub fn in_flight(&self, owner: &Arc<O>) -> usize {
        self.store
            .get(owner)
            .map(|record| record.in_flight.lock().len())
            .unwrap_or(0)
    }

    /// Drop records of owners that no longer exist
    pub fn reclaim(&self) -> usize {
        self.store.reclaim()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.core.config
    }
}
