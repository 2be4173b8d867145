//! Lazy in-order traversal.

use crate::tree::{NIL, RbTree};

/// Ascending iterator over `(key, value)` pairs
///
/// Walks parent links, so it needs no stack and holds only the next position.
pub struct Iter<'a, K, V> {
    tree: &'a RbTree<K, V>,
    next: usize,
}

impl<'a, K, V> Iter<'a, K, V> {
    pub(crate) fn new(tree: &'a RbTree<K, V>, start: usize) -> Self {
        Self { tree, next: start }
    }

    /// Peek at the key the iterator will yield next
    #[must_use]
    pub fn peek_key(&self) -> Option<&'a K> {
        if self.next == NIL {
            None
        } else {
            Some(&self.tree.nodes[self.next].key)
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NIL {
            return None;
        }
        let idx = self.next;
        self.next = self.tree.successor(idx);
        let node = &self.tree.nodes[idx];
        Some((&node.key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.next == NIL {
            (0, Some(0))
        } else {
            (1, Some(self.tree.nodes.len()))
        }
    }
}

impl<K, V> std::iter::FusedIterator for Iter<'_, K, V> {}

/// Ascending iterator over keys
pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Keys<'a, K, V> {
    pub(crate) fn new(inner: Iter<'a, K, V>) -> Self {
        Self { inner }
    }
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }
}

/// Values in ascending key order
pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Values<'a, K, V> {
    pub(crate) fn new(inner: Iter<'a, K, V>) -> Self {
        Self { inner }
    }
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }
}
