//! Cooperative cancellation for a single attempt

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::core::errors::{Result, TetherError};

tokio::task_local! {
    static CURRENT_TOKEN: CancelToken;
}

type CancelObserver = Box<dyn FnOnce() + Send>;

struct Inner {
    label: Arc<str>,
    attempt: u64,
    cancelled: AtomicBool,
    observers: Mutex<Vec<CancelObserver>>,
    notify: Notify,
}

/// One-shot abort signal for one attempt.
///
/// Signalling never stops the running operation; it flips a flag, wakes
/// `cancelled()` waiters and runs registered observers. The operation decides
/// what to do about it.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new(label: impl Into<Arc<str>>, attempt: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                label: label.into(),
                attempt,
                cancelled: AtomicBool::new(false),
                observers: Mutex::new(Vec::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation. Returns true only for the call that flipped the flag.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        let observers = std::mem::take(&mut *self.inner.observers.lock());
        self.inner.notify.notify_waiters();
        for observer in observers {
            observer();
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Register a callback for cancellation; runs immediately if already cancelled
    pub fn on_cancel<F>(&self, observer: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut observers = self.inner.observers.lock();
            if !self.is_cancelled() {
                observers.push(Box::new(observer));
                return;
            }
        }
        observer();
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// `Err(TetherError::Cancelled)` once cancelled, for use with `?`
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(TetherError::cancelled_with_reason(
                self.inner.label.to_string(),
                format!("attempt {} superseded", self.inner.attempt),
            ))
        } else {
            Ok(())
        }
    }

    /// Version of the call that started this attempt
    pub fn attempt(&self) -> u64 {
        self.inner.attempt
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("label", &self.label())
            .field("attempt", &self.attempt())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// The cancellation token of the attempt currently running on this task.
///
/// Only set while a cancel-previous strategy is building or polling its
/// operation's future; `None` everywhere else.
pub fn current_token() -> Option<CancelToken> {
    CURRENT_TOKEN.try_with(|token| token.clone()).ok()
}

/// Run `f` with `token` visible through [`current_token`]
pub(crate) fn with_token<R>(token: CancelToken, f: impl FnOnce() -> R) -> R {
    CURRENT_TOKEN.sync_scope(token, f)
}

/// Make `token` visible through [`current_token`] whenever `fut` is polled
pub(crate) fn scope_token<F: Future>(token: CancelToken, fut: F) -> impl Future<Output = F::Output> {
    CURRENT_TOKEN.scope(token, fut)
}
