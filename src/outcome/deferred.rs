//! Settleable outcome with any number of independent waiters
//!
//! A [`Resolver`] settles exactly once; every [`Outcome`] handle cloned from
//! the same deferred observes that one result. Settlement observers registered
//! with [`Outcome::on_settle`] run exactly once, before waiters are woken.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::core::errors::{Result, TetherError};

type Observer<T> = Box<dyn FnOnce(&Result<T>) + Send>;

enum State<T> {
    Pending {
        wakers: Vec<(u64, Waker)>,
        observers: Vec<Observer<T>>,
    },
    Settled(Result<T>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    next_waiter: AtomicU64,
    label: Arc<str>,
}

impl<T: Clone> Shared<T> {
    fn settle(&self, result: Result<T>) -> bool {
        let (wakers, observers) = {
            let mut state = self.state.lock();
            if matches!(*state, State::Settled(_)) {
                return false;
            }
            match std::mem::replace(&mut *state, State::Settled(result.clone())) {
                State::Pending { wakers, observers } => (wakers, observers),
                State::Settled(_) => (Vec::new(), Vec::new()),
            }
        };

        for observer in observers {
            observer(&result);
        }
        for (_, waker) in wakers {
            waker.wake();
        }
        true
    }
}

/// Create a pending deferred, returning its settling half and its first waiter.
pub fn deferred<T: Clone>(label: impl Into<Arc<str>>) -> (Resolver<T>, Outcome<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Pending {
            wakers: Vec::new(),
            observers: Vec::new(),
        }),
        next_waiter: AtomicU64::new(0),
        label: label.into(),
    });
    (
        Resolver {
            shared: Some(Arc::clone(&shared)),
        },
        Outcome { shared, waiter: None },
    )
}

/// The settling half of a deferred.
///
/// Dropping an unsettled resolver rejects every waiter with
/// [`TetherError::Abandoned`].
pub struct Resolver<T: Clone> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T: Clone> Resolver<T> {
    /// Settle the deferred. Returns false if it was already settled.
    pub fn settle(mut self, result: Result<T>) -> bool {
        match self.shared.take() {
            Some(shared) => shared.settle(result),
            None => false,
        }
    }

    pub fn resolve(self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(self, err: TetherError) -> bool {
        self.settle(Err(err))
    }

    /// Whether any waiter handle other than this resolver is still alive
    pub fn has_waiters(&self) -> bool {
        self.shared
            .as_ref()
            .map(|shared| Arc::strong_count(shared) > 1)
            .unwrap_or(false)
    }
}

impl<T: Clone> Drop for Resolver<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            let label = shared.label.to_string();
            shared.settle(Err(TetherError::abandoned(label)));
        }
    }
}

impl<T: Clone> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("settled", &self.shared.is_none())
            .finish()
    }
}

/// A waiter on a deferred result. Cloning yields another independent waiter
/// on the same deferred.
pub struct Outcome<T: Clone> {
    shared: Arc<Shared<T>>,
    waiter: Option<u64>,
}

impl<T: Clone> Outcome<T> {
    /// An outcome that is already settled
    pub fn ready(result: Result<T>) -> Self {
        let (resolver, outcome) = deferred("ready");
        resolver.settle(result);
        outcome
    }

    /// Whether two handles wait on the same deferred
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.shared, &b.shared)
    }

    pub fn is_settled(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Settled(_))
    }

    /// True once the outcome settled with an error
    pub fn is_rejected(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Settled(Err(_)))
    }

    /// Clone of the result if settled, without registering as a waiter
    pub fn peek(&self) -> Option<Result<T>> {
        match &*self.shared.state.lock() {
            State::Settled(result) => Some(result.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Register a callback that runs exactly once when the outcome settles.
    /// Runs immediately on the calling thread if already settled.
    pub fn on_settle<F>(&self, observer: F)
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        let settled = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Pending { observers, .. } => {
                    observers.push(Box::new(observer));
                    return;
                }
                State::Settled(result) => result.clone(),
            }
        };
        observer(&settled);
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }
}

impl<T: Clone> Clone for Outcome<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            waiter: None,
        }
    }
}

impl<T: Clone> Future for Outcome<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.shared.state.lock();
        match &mut *state {
            State::Settled(result) => Poll::Ready(result.clone()),
            State::Pending { wakers, .. } => {
                let id = *this
                    .waiter
                    .get_or_insert_with(|| this.shared.next_waiter.fetch_add(1, Ordering::Relaxed));
                match wakers.iter_mut().find(|(slot, _)| *slot == id) {
                    Some((_, waker)) if waker.will_wake(cx.waker()) => {}
                    Some((_, waker)) => *waker = cx.waker().clone(),
                    None => wakers.push((id, cx.waker().clone())),
                }
                Poll::Pending
            }
        }
    }
}

impl<T: Clone> Drop for Outcome<T> {
    fn drop(&mut self) {
        if let Some(id) = self.waiter {
            if let State::Pending { wakers, .. } = &mut *self.shared.state.lock() {
                wakers.retain(|(slot, _)| *slot != id);
            }
        }
    }
}

impl<T: Clone> fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outcome")
            .field("label", &self.label())
            .field("settled", &self.is_settled())
            .finish()
    }
}
