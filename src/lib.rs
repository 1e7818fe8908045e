//! Per-owner coordination of async calls.
//!
//! Wrap an operation `Fn(Arc<O>, A) -> impl Future<Output = anyhow::Result<T>>`
//! in one of the strategies below and route every call through
//! `strategy.call(&owner, args)`. State is kept per owner and never keeps an
//! owner alive.
//!
//! ```ignore
//! let fetch = tether::dedup(|client: Arc<Client>, (id,): (u64,)| async move {
//!     client.fetch(id).await
//! });
//! let a = fetch.call(&client, (7,));
//! let b = fetch.call(&client, (7,)); // joins `a`
//! ```

// Core infrastructure modules
pub mod core {
    pub mod config;
    pub mod errors;
    pub mod metrics;
    pub mod runtime;
}

pub mod outcome;
pub mod store;
pub mod strategy;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

// Re-exports for convenience
pub use crate::core::config::{StrategyConfig, StrategyConfigBuilder};
pub use crate::core::errors::{Result, TetherError};
pub use crate::core::metrics::{CallMetrics, MetricsSnapshot};
pub use crate::core::runtime::{Scheduler, TaskHandle, TokioScheduler};
pub use outcome::{current_token, deferred, CancelToken, Outcome, Resolver};
pub use store::Fingerprint;
pub use strategy::{invalidate, Latest, Memoize, Operation, OperationId, Serial, Singleflight};

/// Share one execution between concurrent calls with equal arguments
pub fn dedup<O, A, T, F, Fut>(op: F) -> Singleflight<O, A, T>
where
    O: ?Sized + Send + Sync + 'static,
    A: Fingerprint + Clone + Send + 'static,
    T: Clone + Send + 'static,
    F: Fn(Arc<O>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Singleflight::new(op)
}

/// Run calls one at a time per owner, in call order
pub fn serialize<O, A, T, F, Fut>(op: F) -> Serial<O, A, T>
where
    O: ?Sized + Send + Sync + 'static,
    A: Send + 'static,
    T: Clone + Send + 'static,
    F: Fn(Arc<O>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Serial::new(op)
}

/// Cancel the previous attempt on every call and deliver only the newest result
pub fn cancel_latest<O, A, T, F, Fut>(op: F) -> Latest<O, A, T>
where
    O: ?Sized + Send + Sync + 'static,
    A: Send + 'static,
    T: Clone + Send + 'static,
    F: Fn(Arc<O>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Latest::new(op)
}

/// Like [`cancel_latest`], but start only after `quiet_period` without new calls
pub fn cancel_debounced<O, A, T, F, Fut>(op: F, quiet_period: Duration) -> Latest<O, A, T>
where
    O: ?Sized + Send + Sync + 'static,
    A: Send + 'static,
    T: Clone + Send + 'static,
    F: Fn(Arc<O>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Latest::debounced(op, quiet_period)
}

/// Keep one result per owner and argument list until invalidated
pub fn memoize<O, A, T, F, Fut>(op: F) -> Memoize<O, A, T>
where
    O: ?Sized + Send + Sync + 'static,
    A: Fingerprint + Clone + Send + 'static,
    T: Clone + Send + 'static,
    F: Fn(Arc<O>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Memoize::new(op)
}

/// Keep a single result per owner; a call with other arguments replaces it
pub fn memoize_once<O, A, T, F, Fut>(op: F) -> Memoize<O, A, T>
where
    O: ?Sized + Send + Sync + 'static,
    A: Fingerprint + Clone + Send + 'static,
    T: Clone + Send + 'static,
    F: Fn(Arc<O>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Memoize::once(op)
}
