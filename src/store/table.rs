use crate::outcome::Outcome;
use crate::store::fingerprint::Fingerprint;

struct Entry<A, T: Clone> {
    id: u64,
    args: A,
    outcome: Outcome<T>,
}

/// Argument-keyed outcomes for one owner.
///
/// Lookup is a linear fingerprint scan; entries are removed by the id handed
/// out at insertion, never by re-fingerprinting.
pub struct CallTable<A, T: Clone> {
    entries: Vec<Entry<A, T>>,
    next_id: u64,
}

impl<A: Fingerprint, T: Clone> CallTable<A, T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// The outcome stored for a fingerprint-equal argument list, if `usable`
    /// accepts it. A matching entry that is not usable is dropped.
    pub fn find<P>(&mut self, args: &A, usable: P) -> Option<Outcome<T>>
    where
        P: Fn(&Outcome<T>) -> bool,
    {
        let index = self.entries.iter().position(|entry| entry.args.same_call(args))?;
        if usable(&self.entries[index].outcome) {
            Some(self.entries[index].outcome.clone())
        } else {
            self.entries.remove(index);
            None
        }
    }

    /// Store `outcome` under `args`, returning the entry id
    pub fn insert(&mut self, args: A, outcome: Outcome<T>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(Entry { id, args, outcome });
        id
    }

    /// Remove the entry with this id. Returns false if it is already gone.
    pub fn remove(&mut self, id: u64) -> bool {
        match self.entries.iter().position(|entry| entry.id == id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Drop the oldest entries until at most `keep` remain
    pub fn truncate_oldest(&mut self, keep: usize) -> usize {
        let excess = self.entries.len().saturating_sub(keep);
        self.entries.drain(..excess);
        excess
    }

    pub fn clear(&mut self) -> usize {
        let cleared = self.entries.len();
        self.entries.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<A: Fingerprint, T: Clone> Default for CallTable<A, T> {
    fn default() -> Self {
        Self::new()
    }
}
