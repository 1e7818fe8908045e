//! Cancel-previous coordination ("latest" / "debounce")
//!
//! Each call bumps the owner's version and cancels whatever attempt or quiet
//! period is pending. Only the newest attempt's result is delivered, and it is
//! delivered to every call made since the last delivery. Older results are
//! dropped without a trace.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::core::config::StrategyConfig;
use crate::core::errors::{Result, TetherError};
use crate::core::metrics::MetricsSnapshot;
use crate::core::runtime::{Scheduler, TaskHandle, TokioScheduler};
use crate::outcome::cancel::{scope_token, with_token};
use crate::outcome::{deferred, CancelToken, Outcome, Resolver};
use crate::store::OwnerStore;
use crate::strategy::{Operation, StrategyCore};

struct CancelState<T: Clone> {
    /// Only ever increases
    version: u64,
    /// Everyone waiting on the current cycle
    waiters: Vec<Resolver<T>>,
    active: Option<CancelToken>,
    timer: Option<TaskHandle>,
}

struct CancelRecord<T: Clone> {
    state: Mutex<CancelState<T>>,
}

impl<T: Clone> CancelRecord<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(CancelState {
                version: 0,
                waiters: Vec::new(),
                active: None,
                timer: None,
            }),
        }
    }
}

/// Supersedes older calls per owner, optionally after a quiet period
pub struct Latest<O: ?Sized, A, T: Clone> {
    core: Arc<StrategyCore<O, A, T>>,
    store: OwnerStore<O, CancelRecord<T>>,
}

impl<O, A, T> Latest<O, A, T>
where
    O: ?Sized + Send + Sync + 'static,
    A: Send + 'static,
    T: Clone + Send + 'static,
{
    /// Start every call immediately, cancelling the previous attempt
    pub fn new<F, Fut>(op: F) -> Self
    where
        F: Fn(Arc<O>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let config = StrategyConfig {
            label: "latest".to_string(),
            ..Default::default()
        };
        Self::build(Arc::new(op), config, Arc::new(TokioScheduler::new()))
    }

    /// Start only once no new call has arrived for `quiet_period`
    pub fn debounced<F, Fut>(op: F, quiet_period: Duration) -> Self
    where
        F: Fn(Arc<O>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let config = StrategyConfig {
            label: "debounce".to_string(),
            ..StrategyConfig::debounced(quiet_period)
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

    /// Supersede any earlier call for `owner` and join the new cycle.
    pub fn call(&self, owner: &Arc<O>, args: A) -> Outcome<T> {
        self.core.metrics.record_call();
        let record = self.store.get_or_create(owner, CancelRecord::new);
        let (resolver, outcome) = deferred(Arc::clone(&self.core.label));
        let quiet_period = self.core.config.quiet_period;

        // Only bookkeeping happens under the lock. Cancellation observers and
        // the scheduler run after it is released, so they may call back in.
        let (stale_timer, superseded, version, token) = {
            let mut state = record.state.lock();
            let stale_timer = state.timer.take();
            let superseded = state.active.take();
            state.version += 1;
            let version = state.version;
            state.waiters.push(resolver);
            let token = if quiet_period.is_zero() {
                let token = CancelToken::new(Arc::clone(&self.core.label), version);
                state.active = Some(token.clone());
                Some(token)
            } else {
                None
            };
            (stale_timer, superseded, version, token)
        };

        if let Some(timer) = stale_timer {
            timer.cancel();
            trace!(strategy = %self.core.label, "quiet period restarted");
        }
        if let Some(active) = superseded {
            if active.cancel() {
                self.core.metrics.record_superseded();
                debug!(strategy = %self.core.label, attempt = active.attempt(), "cancelled superseded attempt");
            }
        }

        match token {
            // The token is visible while the future is built and whenever it is polled.
            Some(token) => {
                let running = with_token(token.clone(), || self.core.start(Arc::clone(owner), args));
                let running = scope_token(token, running);
                let core = Arc::clone(&self.core);
                let driver_record = Arc::clone(&record);
                let spawned = self.core.spawn(Box::pin(async move {
                    let result = running.await;
                    Self::finish(&core, &driver_record, version, result);
                }));
                if !spawned {
                    Self::finish(
                        &self.core,
                        &record,
                        version,
                        Err(TetherError::runtime("no runtime to drive the operation")),
                    );
                }
            }
            None => self.schedule_quiet_period(&record, owner, args, version),
        }

        outcome
    }

    fn schedule_quiet_period(&self, record: &Arc<CancelRecord<T>>, owner: &Arc<O>, args: A, version: u64) {
        let task = Box::pin(Self::run_after_quiet_period(
            Arc::clone(&self.core),
            Arc::clone(record),
            Arc::clone(owner),
            args,
            version,
        ));
        let scheduled = self.core.scheduler.spawn_after(self.core.config.quiet_period, task);

        let mut state = record.state.lock();
        match scheduled {
            // Keep the handle only while the quiet period is still pending; once
            // the attempt is running it is stopped through its token instead.
            Ok(handle) if state.version == version && state.active.is_none() => state.timer = Some(handle),
            Ok(_) => {}
            Err(err) if state.version == version => {
                let waiters = std::mem::take(&mut state.waiters);
                drop(state);
                warn!(strategy = %self.core.label, error = %err, "failed to schedule quiet period");
                for waiter in waiters {
                    waiter.reject(err.clone());
                }
            }
            // The newer call owns the cycle and its own timer.
            Err(_) => {}
        }
    }

    async fn run_after_quiet_period(
        core: Arc<StrategyCore<O, A, T>>,
        record: Arc<CancelRecord<T>>,
        owner: Arc<O>,
        args: A,
        version: u64,
    ) {
        let token = CancelToken::new(Arc::clone(&core.label), version);
        {
            let mut state = record.state.lock();
            if state.version != version {
                trace!(strategy = %core.label, version, "quiet period ended for a superseded call");
                return;
            }
            state.timer = None;
            state.active = Some(token.clone());
        }

        debug!(strategy = %core.label, version, "quiet period elapsed, starting attempt");
        let running = with_token(token.clone(), || core.start(owner, args));
        let result = scope_token(token, running).await;
        Self::finish(&core, &record, version, result);
    }

    /// Deliver `result` to the whole cycle if `version` is still current
    fn finish(core: &StrategyCore<O, A, T>, record: &CancelRecord<T>, version: u64, result: Result<T>) {
        let waiters = {
            let mut state = record.state.lock();
            if state.version != version {
                None
            } else {
                state.active = None;
                Some(std::mem::take(&mut state.waiters))
            }
        };

        match waiters {
            Some(waiters) => {
                trace!(strategy = %core.label, version, waiters = waiters.len(), "delivering latest result");
                for waiter in waiters {
                    waiter.settle(result.clone());
                }
            }
            None => {
                core.metrics.record_discarded();
                debug!(strategy = %core.label, version, "discarding stale result");
            }
        }
    }

    /// Calls for `owner` still waiting on the current cycle
    pub fn waiting(&self, owner: &Arc<O>) -> usize {
        self.store
            .get(owner)
            .map(|record| record.state.lock().waiters.len())
            .unwrap_or(0)
    }

    /// Token of the attempt currently running for `owner`
    pub fn active_token(&self, owner: &Arc<O>) -> Option<CancelToken> {
        self.store
            .get(owner)
            .and_then(|record| record.state.lock().active.clone())
    }

    pub fn quiet_period(&self) -> Duration {
        self.core.config.quiet_period
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
