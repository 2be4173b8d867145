//! FIFO of ready transforms.

use indexmap::IndexSet;
use ruleflow_core::{CoreError, CoreResult, TransformId};

/// Ready transforms in the order they became ready
///
/// Backed by an `IndexSet`, so an id is queued at most once and keeps its
/// position until popped or removed.
#[derive(Debug, Clone, Default)]
pub struct ReadyQueue {
    queue: IndexSet<TransformId>,
}

impl ReadyQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: IndexSet::new(),
        }
    }

    /// Append `id`; returns false if it was already queued
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the queue cannot grow
    pub fn push(&mut self, id: TransformId) -> CoreResult<bool> {
        if self.queue.contains(&id) {
            return Ok(false);
        }
        self.reserve(1)?;
        Ok(self.queue.insert(id))
    }

    /// Make room for `additional` more ids, so that many pushes cannot fail
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the queue cannot grow; the queue is unchanged
    pub fn reserve(&mut self, additional: usize) -> CoreResult<()> {
        self.queue
            .try_reserve(additional)
            .map_err(|e| CoreError::OutOfMemory {
                resource: format!("ready queue: {}", e),
            })
    }

    /// Remove and return up to `max` ids from the front
    pub fn pop(&mut self, max: usize) -> Vec<TransformId> {
        let n = max.min(self.queue.len());
        self.queue.drain(..n).collect()
    }

    /// Drop `id` from the queue, keeping the order of the rest
    pub fn remove(&mut self, id: TransformId) -> bool {
        self.queue.shift_remove(&id)
    }

    /// Check if `id` is queued
    #[must_use]
    pub fn contains(&self, id: TransformId) -> bool {
        self.queue.contains(&id)
    }

    /// Number of queued ids
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queued ids, front first
    pub fn iter(&self) -> impl Iterator<Item = TransformId> + '_ {
        self.queue.iter().copied()
    }
}
