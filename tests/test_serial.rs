//! FIFO serialization per owner

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tether::{serialize, TetherError};

struct Ledger {
    events: Mutex<Vec<String>>,
}

impl Ledger {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    fn log(&self, event: String) {
        self.events.lock().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

async fn flush() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_calls_run_one_at_a_time_in_order() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let write = serialize(|ledger: Arc<Ledger>, (i,): (usize,)| async move {
        ledger.log(format!("start-{i}"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        ledger.log(format!("end-{i}"));
        Ok(i)
    });
    let ledger = Ledger::new();

    let outcomes: Vec<_> = (0..10).map(|i| write.call(&ledger, (i,))).collect();
    flush().await;
    assert_eq!(ledger.events(), vec!["start-0"]);

    tokio::time::advance(Duration::from_millis(100)).await;
    flush().await;
    assert_eq!(ledger.events(), vec!["start-0", "end-0", "start-1"]);

    for _ in 1..10 {
        tokio::time::advance(Duration::from_millis(100)).await;
        flush().await;
    }

    let expected: Vec<String> = (0..10)
        .flat_map(|i| [format!("start-{i}"), format!("end-{i}")])
        .collect();
    assert_eq!(ledger.events(), expected);

    for (i, outcome) in outcomes.into_iter().enumerate() {
        assert_eq!(outcome.await.unwrap(), i);
    }
    assert_eq!(write.pending(&ledger), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failure_does_not_block_successors() {
    let write = serialize(|ledger: Arc<Ledger>, (i,): (usize,)| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if i == 1 {
            anyhow::bail!("write {i} rejected");
        }
        ledger.log(format!("wrote-{i}"));
        Ok(i)
    });
    let ledger = Ledger::new();

    let a = write.call(&ledger, (0,));
    let b = write.call(&ledger, (1,));
    let c = write.call(&ledger, (2,));

    assert_eq!(a.await.unwrap(), 0);
    match b.await {
        Err(TetherError::Failed { source, .. }) => assert_eq!(source.to_string(), "write 1 rejected"),
        other => panic!("Expected failure, got {other:?}"),
    }
    assert_eq!(c.await.unwrap(), 2);
    assert_eq!(ledger.events(), vec!["wrote-0", "wrote-2"]);
    assert_eq!(write.metrics().failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_owners_have_independent_queues() {
    let write = serialize(|ledger: Arc<Ledger>, (tag,): (&'static str,)| async move {
        ledger.log(format!("start-{tag}"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(tag)
    });
    let first = Ledger::new();
    let second = Ledger::new();

    let a = write.call(&first, ("a",));
    let b = write.call(&second, ("b",));
    flush().await;

    // Neither owner waits for the other.
    assert_eq!(first.events(), vec!["start-a"]);
    assert_eq!(second.events(), vec!["start-b"]);
    assert_eq!(a.await.unwrap(), "a");
    assert_eq!(b.await.unwrap(), "b");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_order_and_exclusion_hold_across_workers() {
    let running = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let (busy, clashes) = (Arc::clone(&running), Arc::clone(&overlaps));
    let write = serialize(move |ledger: Arc<Ledger>, (i,): (usize,)| {
        let busy = Arc::clone(&busy);
        let clashes = Arc::clone(&clashes);
        async move {
            if busy.swap(true, Ordering::SeqCst) {
                clashes.fetch_add(1, Ordering::SeqCst);
            }
            ledger.log(i.to_string());
            tokio::task::yield_now().await;
            busy.store(false, Ordering::SeqCst);
            Ok(i)
        }
    });
    let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();

    for round in 0..50 {
        let ledger = Ledger::new();
        let outcomes: Vec<_> = (0..20).map(|i| write.call(&ledger, (i,))).collect();
        for (i, outcome) in outcomes.into_iter().enumerate() {
            assert_eq!(outcome.await.unwrap(), i);
        }
        assert_eq!(ledger.events(), expected, "round {round}");
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}
