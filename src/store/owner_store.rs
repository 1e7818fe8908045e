use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::debug;

/// One owner's record plus a weak link back to the owner
struct Slot<O: ?Sized, R> {
    owner: Weak<O>,
    record: Arc<R>,
}

/// Maps owner identity to a lazily created coordination record.
///
/// Owners are keyed by allocation address and held only weakly: the `Weak`
/// keeps the allocation (not the owner) alive, so the address cannot be reused
/// while the slot exists. Slots of dropped owners are removed by [`reclaim`],
/// which also runs every `reclaim_interval` record creations.
///
/// [`reclaim`]: OwnerStore::reclaim
pub struct OwnerStore<O: ?Sized, R> {
    records: DashMap<usize, Slot<O, R>>,
    created: AtomicUsize,
    reclaim_interval: usize,
}

fn owner_key<O: ?Sized>(owner: &Arc<O>) -> usize {
    Arc::as_ptr(owner) as *const () as usize
}

impl<O: ?Sized, R> OwnerStore<O, R> {
    pub fn new(reclaim_interval: usize) -> Self {
        Self {
            records: DashMap::new(),
            created: AtomicUsize::new(0),
            reclaim_interval: reclaim_interval.max(1),
        }
    }

    /// Existing record for `owner`, or a new one from `factory`.
    ///
    /// Create-if-absent holds the map shard lock, so concurrent first calls for
    /// the same owner agree on one record.
    pub fn get_or_create<F>(&self, owner: &Arc<O>, factory: F) -> Arc<R>
    where
        F: FnOnce() -> R,
    {
        let mut created = false;
        let record = {
            let slot = self.records.entry(owner_key(owner)).or_insert_with(|| {
                created = true;
                Slot {
                    owner: Arc::downgrade(owner),
                    record: Arc::new(factory()),
                }
            });
            Arc::clone(&slot.record)
        };

        if created {
            let total = self.created.fetch_add(1, Ordering::Relaxed) + 1;
            if total % self.reclaim_interval == 0 {
                self.reclaim();
            }
        }
        record
    }

    pub fn get(&self, owner: &Arc<O>) -> Option<Arc<R>> {
        self.records
            .get(&owner_key(owner))
            .map(|slot| Arc::clone(&slot.record))
    }

    /// Drop records whose owner is gone. Returns how many were removed.
    pub fn reclaim(&self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, slot| slot.owner.strong_count() > 0);
        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            debug!(removed, remaining = self.records.len(), "reclaimed records of dropped owners");
        }
        removed
    }

    /// Snapshot of every live record. Map locks are released before returning.
    pub fn records(&self) -> Vec<Arc<R>> {
        self.records
            .iter()
            .filter(|slot| slot.owner.strong_count() > 0)
            .map(|slot| Arc::clone(&slot.record))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
