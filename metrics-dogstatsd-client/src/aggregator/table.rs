use dashmap::DashMap;
use parking_lot::RwLock;

use super::Context;

type Entries<E> = DashMap<Context, E, ahash::RandomState>;

/// A double-buffered concurrent map of aggregation entries.
///
/// Merges only ever take the shared side of the lock, so concurrent writers contend solely on the map's internal shards.
/// Draining takes the exclusive side just long enough to swap in an empty map, which means that once the swap is done,
/// no writer can still be touching the detached entries.
pub(crate) struct MergeTable<E> {
    live: RwLock<Entries<E>>,
}

impl<E> MergeTable<E> {
    /// Creates a new, empty `MergeTable`.
    pub fn new() -> Self {
        Self { live: RwLock::new(Self::empty()) }
    }

    fn empty() -> Entries<E> {
        DashMap::with_hasher(ahash::RandomState::new())
    }

    /// Applies `update` to the entry for `context`, creating it with `init` first if it does not exist yet.
    pub fn merge<I, U>(&self, context: Context, init: I, update: U)
    where
        I: FnOnce() -> E,
        U: FnOnce(&E),
    {
        let entries = self.live.read();

        // Most merges hit an existing entry, which only needs a read lock on its shard.
        if let Some(entry) = entries.get(&context) {
            update(entry.value());
            return;
        }

        let entry = entries.entry(context).or_insert_with(init);
        update(entry.value());
    }

    /// Detaches every entry, leaving an empty table behind.
    pub fn drain(&self) -> Entries<E> {
        let mut entries = self.live.write();
        std::mem::replace(&mut *entries, Self::empty())
    }

    /// Returns the number of live contexts.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.live.read().len()
    }
}
