//! Bounded key index over the checkpoint log.
//!
//! Maps keys to record locations through an [`RbTree`]. Once the bound is
//! reached the least recently used key is evicted; an evicted key is still
//! in the log and is found again by scanning it.

use ruleflow_core::{CoreResult, Sequence};
use ruleflow_index::RbTree;
use std::sync::atomic::{AtomicU64, Ordering};

/// Where a record lives in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Byte offset of the frame
    pub offset: u64,
    /// Frame length in bytes
    pub len: u64,
    /// Sequence number of the record
    pub sequence: Sequence,
}

#[derive(Debug)]
struct Slot {
    location: Location,
    stamp: AtomicU64,
}

/// LRU-bounded map from key to [`Location`]
///
/// Recency stamps are atomics so lookups can touch them through a shared
/// reference.
#[derive(Debug)]
pub struct KeyIndex {
    entries: RbTree<Vec<u8>, Slot>,
    capacity: usize,
    clock: AtomicU64,
    evictions: u64,
}

impl KeyIndex {
    /// Create an index holding at most `capacity` keys
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RbTree::new(),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
            evictions: 0,
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Location of `key`, marking it recently used
    pub fn get(&self, key: &[u8]) -> Option<Location> {
        let slot = self.entries.get(key)?;
        slot.stamp.store(self.tick(), Ordering::Relaxed);
        Some(slot.location)
    }

    /// Check for `key` without touching its recency
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    /// Point `key` at `location`
    ///
    /// A location older than the one already indexed is ignored, so replaying
    /// or re-admitting stale records never undoes a newer write. Returns the
    /// key evicted to make room, if any.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the tree cannot grow
    pub fn insert(&mut self, key: Vec<u8>, location: Location) -> CoreResult<Option<Vec<u8>>> {
        let stamp = self.tick();
        if let Some(slot) = self.entries.get_mut(key.as_slice()) {
            if location.sequence >= slot.location.sequence {
                slot.location = location;
            }
            slot.stamp.store(stamp, Ordering::Relaxed);
            return Ok(None);
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.evict_lru()
        } else {
            None
        };

        self.entries.try_insert(
            key,
            Slot {
                location,
                stamp: AtomicU64::new(stamp),
            },
        )?;
        Ok(evicted)
    }

    fn evict_lru(&mut self) -> Option<Vec<u8>> {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, slot)| slot.stamp.load(Ordering::Relaxed))
            .map(|(key, _)| key.clone())?;
        self.entries.remove(victim.as_slice());
        self.evictions += 1;
        Some(victim)
    }

    /// Number of indexed keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no key is indexed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of keys
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys evicted so far
    #[must_use]
    pub const fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Whether some key in the log may be missing from the index
    #[must_use]
    pub const fn has_spilled(&self) -> bool {
        self.evictions > 0
    }

    /// Indexed keys in ascending order
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.keys().map(Vec::as_slice)
    }
}
