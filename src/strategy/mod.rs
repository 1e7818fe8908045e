//! Coordination strategies
//!
//! Every strategy wraps one [`Operation`] and answers `call(&owner, args)` with
//! an [`Outcome`](crate::outcome::Outcome):
//! - **Singleflight** - concurrent calls with equal arguments share one execution
//! - **Serial** - calls run one at a time in call order
//! - **Latest** - a new call cancels the previous attempt, optionally after a quiet period
//! - **Memoize** - results are kept per argument list until invalidated

pub mod latest;
pub mod memo;
pub mod serial;
pub mod singleflight;

pub use latest::Latest;
pub use memo::{invalidate, Invalidate, Memoize, OperationId};
pub use serial::Serial;
pub use singleflight::Singleflight;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use tracing::warn;

use crate::core::config::StrategyConfig;
use crate::core::errors::{Result, TetherError};
use crate::core::metrics::CallMetrics;
use crate::core::runtime::Scheduler;

/// The unit of work a strategy coordinates.
///
/// Closures `Fn(Arc<O>, A) -> impl Future<Output = anyhow::Result<T>>`
/// implement it automatically.
pub trait Operation<O: ?Sized, A, T>: Send + Sync + 'static {
    fn invoke(&self, owner: Arc<O>, args: A) -> BoxFuture<'static, anyhow::Result<T>>;
}

impl<O, A, T, F, Fut> Operation<O, A, T> for F
where
    O: ?Sized,
    F: Fn(Arc<O>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    fn invoke(&self, owner: Arc<O>, args: A) -> BoxFuture<'static, anyhow::Result<T>> {
        Box::pin(self(owner, args))
    }
}

/// What every strategy carries besides its store
pub(crate) struct StrategyCore<O: ?Sized, A, T> {
    pub(crate) config: StrategyConfig,
    pub(crate) label: Arc<str>,
    pub(crate) op: Arc<dyn Operation<O, A, T>>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) metrics: Arc<CallMetrics>,
}

impl<O, A, T> StrategyCore<O, A, T>
where
    O: ?Sized + Send + Sync + 'static,
    A: Send + 'static,
    T: Send + 'static,
{
    pub(crate) fn new(
        op: Arc<dyn Operation<O, A, T>>,
        config: StrategyConfig,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            label: Arc::from(config.label.as_str()),
            config,
            op,
            scheduler,
            metrics: Arc::new(CallMetrics::new()),
        }
    }

    /// Invoke the operation now.
    ///
    /// A panic while building the future, a panic while polling it and an
    /// `Err` result all come back as a `TetherError` from the returned future;
    /// nothing escapes to the caller of `start`.
    pub(crate) fn start(&self, owner: Arc<O>, args: A) -> BoxFuture<'static, Result<T>> {
        self.metrics.record_execution();
        let label = self.label.to_string();
        let metrics = Arc::clone(&self.metrics);

        let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| self.op.invoke(owner, args))) {
            Ok(fut) => fut,
            Err(payload) => {
                metrics.record_failed();
                return Box::pin(future::ready(Err(TetherError::panicked(label, payload))));
            }
        };

        Box::pin(async move {
            let result = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(TetherError::failed(label, err)),
                Err(payload) => Err(TetherError::panicked(label, payload)),
            };
            if result.is_err() {
                metrics.record_failed();
            }
            result
        })
    }

    /// Hand a driver task to the scheduler. On failure the task is dropped,
    /// which abandons any resolver it owned.
    pub(crate) fn spawn(&self, task: BoxFuture<'static, ()>) -> bool {
        match self.scheduler.spawn(task) {
            Ok(_) => true,
            Err(err) => {
                warn!(strategy = %self.label, error = %err, "failed to schedule operation");
                false
            }
        }
    }
}
