//! Serialized execution ("mutex")
//!
//! Every call for an owner is queued behind the previous one, whatever its
//! arguments. A call starts only after its predecessor has settled, and a
//! failure is delivered to its own caller without stalling the queue.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::core::config::StrategyConfig;
use crate::core::errors::Result;
use crate::core::metrics::MetricsSnapshot;
use crate::core::runtime::{Scheduler, TokioScheduler};
use crate::outcome::{deferred, Outcome, Resolver};
use crate::store::OwnerStore;
use crate::strategy::{Operation, StrategyCore};

#[derive(Default)]
struct SerialState {
    pending: usize,
    /// Settles when the most recently queued call has finished
    tail: Option<Outcome<()>>,
}

#[derive(Default)]
struct SerialRecord {
    state: Mutex<SerialState>,
}

/// One call's place in the queue. Releasing it (on drop, so an aborted driver
/// releases too) lets the next call start.
struct Turn {
    record: Arc<SerialRecord>,
    done: Option<Resolver<()>>,
}

impl Drop for Turn {
    fn drop(&mut self) {
        {
            let mut state = self.record.state.lock();
            state.pending = state.pending.saturating_sub(1);
            if state.pending == 0 {
                state.tail = None;
            }
        }
        if let Some(done) = self.done.take() {
            done.resolve(());
        }
    }
}

/// Runs calls one at a time per owner, in call order
pub struct Serial<O: ?Sized, A, T> {
    core: Arc<StrategyCore<O, A, T>>,
    store: OwnerStore<O, SerialRecord>,
}

impl<O, A, T> Serial<O, A, T>
where
    O: ?Sized + Send + Sync + 'static,
    A: Send + 'static,
    T: Clone + Send + 'static,
{
    pub fn new<F, Fut>(op: F) -> Self
    where
        F: Fn(Arc<O>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let config = StrategyConfig {
            label: "serial".to_string(),
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

    /// Queue a call. It runs once every earlier call for `owner` has settled.
    pub fn call(&self, owner: &Arc<O>, args: A) -> Outcome<T> {
        self.core.metrics.record_call();
        let record = self.store.get_or_create(owner, SerialRecord::default);
        let (resolver, outcome) = deferred(Arc::clone(&self.core.label));
        let (done, finished) = deferred::<()>(Arc::clone(&self.core.label));

        let (predecessor, position) = {
            let mut state = record.state.lock();
            state.pending += 1;
            (state.tail.replace(finished), state.pending)
        };
        let turn = Turn {
            record,
            done: Some(done),
        };

        let task: BoxFuture<'static, ()> = match predecessor {
            None => {
                debug!(strategy = %self.core.label, "queue empty, running immediately");
                let running = self.core.start(Arc::clone(owner), args);
                Box::pin(async move {
                    resolver.settle(running.await);
                    drop(turn);
                })
            }
            Some(predecessor) => {
                trace!(strategy = %self.core.label, position, "queued behind predecessor");
                let core = Arc::clone(&self.core);
                let owner = Arc::clone(owner);
                Box::pin(async move {
                    // Success or failure of the predecessor both release us.
                    let _ = predecessor.await;
                    let running = core.start(owner, args);
                    resolver.settle(running.await);
                    drop(turn);
                })
            }
        };
        self.core.spawn(task);
        outcome
    }

    /// Calls queued or running for `owner`
    pub fn pending(&self, owner: &Arc<O>) -> usize {
        self.store
            .get(owner)
            .map(|record| record.state.lock().pending)
            .unwrap_or(0)
    }

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
