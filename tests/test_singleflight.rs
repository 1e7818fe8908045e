//! Deduplication of concurrent calls per owner and argument fingerprint

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tether::{dedup, Operation, Outcome, Singleflight, StrategyConfig, TokioScheduler};

struct Repo {
    name: &'static str,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn flush() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_share_one_execution() {
    init_tracing();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let fetch = dedup(move |repo: Arc<Repo>, (page,): (u32,)| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(format!("{}:{}", repo.name, page))
        }
    });
    let repo = Arc::new(Repo { name: "tether" });

    let first = fetch.call(&repo, (1,));
    let second = fetch.call(&repo, (1,));
    let other_page = fetch.call(&repo, (2,));
    assert!(Outcome::ptr_eq(&first, &second));
    assert!(!Outcome::ptr_eq(&first, &other_page));
    assert_eq!(fetch.in_flight(&repo), 2);

    assert_eq!(first.await.unwrap(), "tether:1");
    assert_eq!(second.await.unwrap(), "tether:1");
    assert_eq!(other_page.await.unwrap(), "tether:2");
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    // Settled entries are gone; the next call executes again.
    let third = fetch.call(&repo, (1,));
    assert_eq!(third.await.unwrap(), "tether:1");
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    let metrics = fetch.metrics();
    assert_eq!(metrics.calls, 4);
    assert_eq!(metrics.executions, 3);
    assert_eq!(metrics.joined, 1);
}

#[tokio::test(start_paused = true)]
async fn test_owners_never_share_entries() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let fetch = dedup(move |repo: Arc<Repo>, (): ()| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(repo.name)
        }
    });
    let left = Arc::new(Repo { name: "left" });
    let right = Arc::new(Repo { name: "right" });

    let a = fetch.call(&left, ());
    let b = fetch.call(&right, ());
    assert!(!Outcome::ptr_eq(&a, &b));
    assert_eq!(a.await.unwrap(), "left");
    assert_eq!(b.await.unwrap(), "right");
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shared_arguments_compare_by_identity() {
    let fetch = dedup(|_repo: Arc<Repo>, (query,): (Arc<String>,)| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(query.len())
    });
    let repo = Arc::new(Repo { name: "ids" });
    let query = Arc::new("select".to_string());
    let equal_but_distinct = Arc::new("select".to_string());

    let a = fetch.call(&repo, (Arc::clone(&query),));
    let b = fetch.call(&repo, (Arc::clone(&query),));
    let c = fetch.call(&repo, (equal_but_distinct,));
    assert!(Outcome::ptr_eq(&a, &b));
    assert!(!Outcome::ptr_eq(&a, &c));
    assert_eq!(c.await.unwrap(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_outcome_settles_without_being_awaited() {
    let fetch = dedup(|_repo: Arc<Repo>, (): ()| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(1u8)
    });
    let repo = Arc::new(Repo { name: "bg" });

    drop(fetch.call(&repo, ()));
    flush().await;
    tokio::time::advance(Duration::from_millis(10)).await;
    flush().await;
    assert_eq!(fetch.in_flight(&repo), 0);
}

#[tokio::test]
async fn test_records_of_dropped_owners_are_reclaimed() {
    let fetch = dedup(|_repo: Arc<Repo>, (): ()| async move { Ok(0u8) });
    let repo = Arc::new(Repo { name: "gone" });
    fetch.call(&repo, ()).await.unwrap();

    drop(repo);
    assert_eq!(fetch.reclaim(), 1);
    assert_eq!(fetch.reclaim(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_first_calls_execute_once() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let (open, gate) = tokio::sync::watch::channel(false);
    let fetch = Arc::new(dedup(move |repo: Arc<Repo>, (page,): (u32,)| {
        counter.fetch_add(1, Ordering::SeqCst);
        let mut gate = gate.clone();
        async move {
            while !*gate.borrow_and_update() {
                if gate.changed().await.is_err() {
                    break;
                }
            }
            Ok(format!("{}:{}", repo.name, page))
        }
    }));
    let repo = Arc::new(Repo { name: "shared" });

    let callers: Vec<_> = (0..32)
        .map(|_| {
            let fetch = Arc::clone(&fetch);
            let repo = Arc::clone(&repo);
            tokio::spawn(async move { fetch.call(&repo, (1,)) })
        })
        .collect();
    let mut outcomes = Vec::new();
    for caller in callers {
        outcomes.push(caller.await.unwrap());
    }
    assert!(outcomes.iter().all(|outcome| Outcome::ptr_eq(outcome, &outcomes[0])));
    assert_eq!(fetch.in_flight(&repo), 1);

    open.send(true).unwrap();
    for outcome in outcomes {
        assert_eq!(outcome.await.unwrap(), "shared:1");
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(fetch.metrics().joined, 31);
}

#[test]
fn test_driven_by_explicit_runtime_handle() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let op: Arc<dyn Operation<Repo, (u32,), u32>> =
        Arc::new(|_repo: Arc<Repo>, (n,): (u32,)| async move { Ok::<_, anyhow::Error>(n + 1) });
    let fetch = Singleflight::from_operation(
        op,
        StrategyConfig::default(),
        Arc::new(TokioScheduler::with_handle(rt.handle().clone())),
    )
    .unwrap();
    let repo = Arc::new(Repo { name: "outside" });

    // This thread has no runtime of its own; the handle drives the call.
    let outcome = fetch.call(&repo, (1,));
    assert_eq!(rt.block_on(outcome).unwrap(), 2);
    assert_eq!(fetch.in_flight(&repo), 0);
}
