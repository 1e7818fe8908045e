//! Memoization and its invalidation side-channel

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tether::{invalidate, memoize, memoize_once, Outcome, TetherError};

struct Account {
    id: u32,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_result_is_shared() {
    init_tracing();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let balance = memoize(move |account: Arc<Account>, (currency,): (&'static str,)| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(format!("{}-{currency}", account.id))
        }
    });
    let account = Arc::new(Account { id: 9 });

    let a = balance.call(&account, ("eur",));
    let b = balance.call(&account, ("eur",));
    assert!(Outcome::ptr_eq(&a, &b));
    assert_eq!(a.await.unwrap(), "9-eur");

    // Settled successes stay memoized.
    let c = balance.call(&account, ("eur",));
    assert!(c.is_settled());
    assert_eq!(c.await.unwrap(), "9-eur");
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(balance.metrics().joined, 2);
}

#[tokio::test]
async fn test_invalidation_is_scoped_to_one_operation() {
    let f_runs = Arc::new(AtomicUsize::new(0));
    let g_runs = Arc::new(AtomicUsize::new(0));
    let (f_counter, g_counter) = (Arc::clone(&f_runs), Arc::clone(&g_runs));
    let f = memoize(move |account: Arc<Account>, (): ()| {
        f_counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(account.id) }
    });
    let g = memoize(move |account: Arc<Account>, (): ()| {
        g_counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(account.id * 2) }
    });
    let account = Arc::new(Account { id: 4 });

    assert_eq!(f.call(&account, ()).await.unwrap(), 4);
    assert_eq!(g.call(&account, ()).await.unwrap(), 8);
    assert_ne!(f.id(), g.id());

    assert!(invalidate(f.id()));
    assert_eq!(f.cached(&account), 0);
    assert_eq!(g.cached(&account), 1);

    f.call(&account, ()).await.unwrap();
    g.call(&account, ()).await.unwrap();
    assert_eq!(f_runs.load(Ordering::SeqCst), 2);
    assert_eq!(g_runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalidation_reaches_every_owner() {
    let memo = memoize(|account: Arc<Account>, (): ()| async move { Ok(account.id) });
    let owners: Vec<_> = (0..3).map(|id| Arc::new(Account { id })).collect();
    for owner in &owners {
        memo.call(owner, ()).await.unwrap();
    }

    assert_eq!(memo.invalidate(), 3);
    assert!(owners.iter().all(|owner| memo.cached(owner) == 0));
    assert_eq!(memo.metrics().invalidations, 1);
}

#[tokio::test]
async fn test_rejection_is_not_retained() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let lookup = memoize(move |_account: Arc<Account>, (key,): (u32,)| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::task::yield_now().await;
            if attempt == 0 {
                anyhow::bail!("key {key} unavailable");
            }
            Ok(key)
        }
    });
    let account = Arc::new(Account { id: 1 });

    assert!(matches!(lookup.call(&account, (5,)).await, Err(TetherError::Failed { .. })));
    assert_eq!(lookup.cached(&account), 0);
    assert_eq!(lookup.call(&account, (5,)).await.unwrap(), 5);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_once_replaces_its_single_slot() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let settings = memoize_once(move |_account: Arc<Account>, (path,): (&'static str,)| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(path.len()) }
    });
    let account = Arc::new(Account { id: 2 });

    settings.call(&account, ("a",)).await.unwrap();
    settings.call(&account, ("a",)).await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    settings.call(&account, ("bb",)).await.unwrap();
    assert_eq!(settings.cached(&account), 1);
    settings.call(&account, ("a",)).await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_synchronous_panic_is_not_retained() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let lookup = memoize(move |account: Arc<Account>, (): ()| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("ledger locked");
        }
        async move { Ok(account.id) }
    });
    let account = Arc::new(Account { id: 3 });

    match lookup.call(&account, ()).await {
        Err(TetherError::Panicked { message, .. }) => assert_eq!(message, "ledger locked"),
        other => panic!("Expected panic rejection, got {other:?}"),
    }
    assert_eq!(lookup.cached(&account), 0);

    assert_eq!(lookup.call(&account, ()).await.unwrap(), 3);
    assert_eq!(lookup.cached(&account), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}
