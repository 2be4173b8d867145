//! Red-black tree over an index arena.
//!
//! Nodes are stored in a `Vec` and linked by position. `NIL` stands for the
//! absent child/parent and counts as black. Removing a node moves the last
//! arena slot into the hole, so the arena never has gaps.

use ruleflow_core::CoreResult;
use std::borrow::Borrow;
use std::cmp::Ordering;

use crate::iter::{Iter, Keys, Values};

/// Absent link
pub(crate) const NIL: usize = usize::MAX;

/// Node color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    /// The "high" color; never adjacent to another red node
    Red,
    /// The "low" color; counted by black height
    Black,
}

#[derive(Debug, Clone)]
pub(crate) struct Node<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) parent: usize,
    pub(crate) left: usize,
    pub(crate) right: usize,
    pub(crate) color: Color,
}

/// Ordered map backed by a red-black tree
///
/// Height stays within `2 * log2(n + 1)` across any sequence of inserts and
/// removals.
#[derive(Debug, Clone)]
pub struct RbTree<K, V> {
    pub(crate) nodes: Vec<Node<K, V>>,
    pub(crate) root: usize,
}

impl<K: Ord, V> RbTree<K, V> {
    /// Create an empty tree
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: NIL,
        }
    }

    /// Create an empty tree with room for `capacity` entries
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            root: NIL,
        }
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the tree is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = NIL;
    }

    /// Insert a key, returning the previous value if the key was present
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let mut parent = NIL;
        let mut cur = self.root;
        let mut go_left = false;

        while cur != NIL {
            parent = cur;
            match key.cmp(&self.nodes[cur].key) {
                Ordering::Less => {
                    go_left = true;
                    cur = self.nodes[cur].left;
                }
                Ordering::Greater => {
                    go_left = false;
                    cur = self.nodes[cur].right;
                }
                Ordering::Equal => {
                    return Some(std::mem::replace(&mut self.nodes[cur].value, value));
                }
            }
        }

        let idx = self.nodes.len();
        self.nodes.push(Node {
            key,
            value,
            parent,
            left: NIL,
            right: NIL,
            color: Color::Red,
        });

        if parent == NIL {
            self.root = idx;
        } else if go_left {
            self.nodes[parent].left = idx;
        } else {
            self.nodes[parent].right = idx;
        }

        self.insert_fixup(idx);
        None
    }

    /// Insert, reporting allocation failure instead of aborting
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the arena cannot grow
    pub fn try_insert(&mut self, key: K, value: V) -> CoreResult<Option<V>> {
        if self.nodes.len() == self.nodes.capacity() {
            self.nodes.try_reserve(1)?;
        }
        Ok(self.insert(key, value))
    }

    /// Look up a value
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        match self.find(key) {
            NIL => None,
            idx => Some(&self.nodes[idx].value),
        }
    }

    /// Look up a key/value pair
    #[must_use]
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        match self.find(key) {
            NIL => None,
            idx => Some((&self.nodes[idx].key, &self.nodes[idx].value)),
        }
    }

    /// Look up a value for mutation
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        match self.find(key) {
            NIL => None,
            idx => Some(&mut self.nodes[idx].value),
        }
    }

    /// Check if a key is present
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.find(key) != NIL
    }

    /// Remove a key, returning its value
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.remove_entry(key).map(|(_, v)| v)
    }

    /// Remove a key, returning the stored key and value
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let z = self.find(key);
        if z == NIL {
            return None;
        }
        self.unlink(z);
        self.release_slot(z)
    }

    /// Smallest entry
    #[must_use]
    pub fn min(&self) -> Option<(&K, &V)> {
        if self.root == NIL {
            return None;
        }
        let idx = self.minimum(self.root);
        Some((&self.nodes[idx].key, &self.nodes[idx].value))
    }

    /// Largest entry
    #[must_use]
    pub fn max(&self) -> Option<(&K, &V)> {
        if self.root == NIL {
            return None;
        }
        let mut idx = self.root;
        while self.nodes[idx].right != NIL {
            idx = self.nodes[idx].right;
        }
        Some((&self.nodes[idx].key, &self.nodes[idx].value))
    }

    /// In-order iterator over all entries
    #[must_use]
    pub fn iter(&self) -> Iter<'_, K, V> {
        let start = if self.root == NIL {
            NIL
        } else {
            self.minimum(self.root)
        };
        Iter::new(self, start)
    }

    /// In-order iterator starting at the first key not less than `key`
    ///
    /// Lets a caller resume a traversal after dropping the previous iterator.
    #[must_use]
    pub fn iter_from<Q>(&self, key: &Q) -> Iter<'_, K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut cur = self.root;
        let mut candidate = NIL;
        while cur != NIL {
            let node_key: &Q = self.nodes[cur].key.borrow();
            if node_key < key {
                cur = self.nodes[cur].right;
            } else {
                candidate = cur;
                cur = self.nodes[cur].left;
            }
        }
        Iter::new(self, candidate)
    }

    /// Keys in ascending order
    #[must_use]
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys::new(self.iter())
    }

    /// Values in ascending key order
    #[must_use]
    pub fn values(&self) -> Values<'_, K, V> {
        Values::new(self.iter())
    }

    /// Longest root-to-leaf path, in nodes
    #[must_use]
    pub fn height(&self) -> usize {
        fn walk<K, V>(nodes: &[Node<K, V>], idx: usize) -> usize {
            if idx == NIL {
                0
            } else {
                1 + walk(nodes, nodes[idx].left).max(walk(nodes, nodes[idx].right))
            }
        }
        walk(&self.nodes, self.root)
    }

    fn find<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut cur = self.root;
        while cur != NIL {
            match key.cmp(self.nodes[cur].key.borrow()) {
                Ordering::Less => cur = self.nodes[cur].left,
                Ordering::Greater => cur = self.nodes[cur].right,
                Ordering::Equal => return cur,
            }
        }
        NIL
    }
}

impl<K, V> RbTree<K, V> {
    pub(crate) fn color(&self, idx: usize) -> Color {
        if idx == NIL {
            Color::Black
        } else {
            self.nodes[idx].color
        }
    }

    fn set_color(&mut self, idx: usize, color: Color) {
        if idx != NIL {
            self.nodes[idx].color = color;
        }
    }

    fn parent(&self, idx: usize) -> usize {
        if idx == NIL { NIL } else { self.nodes[idx].parent }
    }

    pub(crate) fn minimum(&self, mut idx: usize) -> usize {
        while self.nodes[idx].left != NIL {
            idx = self.nodes[idx].left;
        }
        idx
    }

    pub(crate) fn successor(&self, mut idx: usize) -> usize {
        if self.nodes[idx].right != NIL {
            return self.minimum(self.nodes[idx].right);
        }
        let mut p = self.nodes[idx].parent;
        while p != NIL && idx == self.nodes[p].right {
            idx = p;
            p = self.nodes[p].parent;
        }
        p
    }

    fn rotate_left(&mut self, x: usize) {
        let y = self.nodes[x].right;
        let y_left = self.nodes[y].left;

        self.nodes[x].right = y_left;
        if y_left != NIL {
            self.nodes[y_left].parent = x;
        }

        let xp = self.nodes[x].parent;
        self.nodes[y].parent = xp;
        if xp == NIL {
            self.root = y;
        } else if self.nodes[xp].left == x {
            self.nodes[xp].left = y;
        } else {
            self.nodes[xp].right = y;
        }

        self.nodes[y].left = x;
        self.nodes[x].parent = y;
    }

    fn rotate_right(&mut self, x: usize) {
        let y = self.nodes[x].left;
        let y_right = self.nodes[y].right;

        self.nodes[x].left = y_right;
        if y_right != NIL {
            self.nodes[y_right].parent = x;
        }

        let xp = self.nodes[x].parent;
        self.nodes[y].parent = xp;
        if xp == NIL {
            self.root = y;
        } else if self.nodes[xp].right == x {
            self.nodes[xp].right = y;
        } else {
            self.nodes[xp].left = y;
        }

        self.nodes[y].right = x;
        self.nodes[x].parent = y;
    }

    fn insert_fixup(&mut self, mut z: usize) {
        while self.color(self.parent(z)) == Color::Red {
            // A red parent is never the root, so the grandparent exists.
            let p = self.nodes[z].parent;
            let g = self.nodes[p].parent;

            if p == self.nodes[g].left {
                let uncle = self.nodes[g].right;
                if self.color(uncle) == Color::Red {
                    self.set_color(p, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(g, Color::Red);
                    z = g;
                } else {
                    if z == self.nodes[p].right {
                        z = p;
                        self.rotate_left(z);
                    }
                    let p = self.nodes[z].parent;
                    let g = self.nodes[p].parent;
                    self.set_color(p, Color::Black);
                    self.set_color(g, Color::Red);
                    self.rotate_right(g);
                }
            } else {
                let uncle = self.nodes[g].left;
                if self.color(uncle) == Color::Red {
                    self.set_color(p, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(g, Color::Red);
                    z = g;
                } else {
                    if z == self.nodes[p].left {
                        z = p;
                        self.rotate_right(z);
                    }
                    let p = self.nodes[z].parent;
                    let g = self.nodes[p].parent;
                    self.set_color(p, Color::Black);
                    self.set_color(g, Color::Red);
                    self.rotate_left(g);
                }
            }
        }
        let root = self.root;
        self.set_color(root, Color::Black);
    }

    /// Replace the subtree rooted at `u` with the one rooted at `v`
    fn transplant(&mut self, u: usize, v: usize) {
        let up = self.nodes[u].parent;
        if up == NIL {
            self.root = v;
        } else if self.nodes[up].left == u {
            self.nodes[up].left = v;
        } else {
            self.nodes[up].right = v;
        }
        if v != NIL {
            self.nodes[v].parent = up;
        }
    }

    /// Detach `z` from the tree and rebalance. The slot stays in the arena.
    fn unlink(&mut self, z: usize) {
        let z_left = self.nodes[z].left;
        let z_right = self.nodes[z].right;
        let mut removed_color = self.nodes[z].color;
        let x;
        let x_parent;

        if z_left == NIL {
            x = z_right;
            x_parent = self.nodes[z].parent;
            self.transplant(z, z_right);
        } else if z_right == NIL {
            x = z_left;
            x_parent = self.nodes[z].parent;
            self.transplant(z, z_left);
        } else {
            let y = self.minimum(z_right);
            removed_color = self.nodes[y].color;
            x = self.nodes[y].right;

            if self.nodes[y].parent == z {
                x_parent = y;
            } else {
                x_parent = self.nodes[y].parent;
                self.transplant(y, x);
                self.nodes[y].right = z_right;
                self.nodes[z_right].parent = y;
            }

            self.transplant(z, y);
            self.nodes[y].left = z_left;
            self.nodes[z_left].parent = y;
            self.nodes[y].color = self.nodes[z].color;
        }

        if removed_color == Color::Black {
            self.remove_fixup(x, x_parent);
        }
    }

    fn remove_fixup(&mut self, mut x: usize, mut xp: usize) {
        while x != self.root && self.color(x) == Color::Black {
            if xp == NIL {
                break;
            }

            if x == self.nodes[xp].left {
                let mut w = self.nodes[xp].right;
                if self.color(w) == Color::Red {
                    self.set_color(w, Color::Black);
                    self.set_color(xp, Color::Red);
                    self.rotate_left(xp);
                    w = self.nodes[xp].right;
                }
                let w_left = self.nodes[w].left;
                let w_right = self.nodes[w].right;
                if self.color(w_left) == Color::Black && self.color(w_right) == Color::Black {
                    self.set_color(w, Color::Red);
                    x = xp;
                    xp = self.nodes[x].parent;
                } else {
                    if self.color(w_right) == Color::Black {
                        self.set_color(w_left, Color::Black);
                        self.set_color(w, Color::Red);
                        self.rotate_right(w);
                        w = self.nodes[xp].right;
                    }
                    let parent_color = self.nodes[xp].color;
                    self.set_color(w, parent_color);
                    self.set_color(xp, Color::Black);
                    let w_right = self.nodes[w].right;
                    self.set_color(w_right, Color::Black);
                    self.rotate_left(xp);
                    x = self.root;
                    xp = NIL;
                }
            } else {
                let mut w = self.nodes[xp].left;
                if self.color(w) == Color::Red {
                    self.set_color(w, Color::Black);
                    self.set_color(xp, Color::Red);
                    self.rotate_right(xp);
                    w = self.nodes[xp].left;
                }
                let w_left = self.nodes[w].left;
                let w_right = self.nodes[w].right;
                if self.color(w_left) == Color::Black && self.color(w_right) == Color::Black {
                    self.set_color(w, Color::Red);
                    x = xp;
                    xp = self.nodes[x].parent;
                } else {
                    if self.color(w_left) == Color::Black {
                        self.set_color(w_right, Color::Black);
                        self.set_color(w, Color::Red);
                        self.rotate_left(w);
                        w = self.nodes[xp].left;
                    }
                    let parent_color = self.nodes[xp].color;
                    self.set_color(w, parent_color);
                    self.set_color(xp, Color::Black);
                    let w_left = self.nodes[w].left;
                    self.set_color(w_left, Color::Black);
                    self.rotate_right(xp);
                    x = self.root;
                    xp = NIL;
                }
            }
        }
        self.set_color(x, Color::Black);
    }

    /// Drop an unlinked slot by moving the last node into it
    fn release_slot(&mut self, z: usize) -> Option<(K, V)> {
        let last = self.nodes.len() - 1;
        self.nodes.swap(z, last);
        let removed = self.nodes.pop()?;

        if z != last {
            // Node formerly at `last` now lives at `z`; repoint its neighbours.
            if self.root == last {
                self.root = z;
            }
            let p = self.nodes[z].parent;
            if p != NIL {
                if self.nodes[p].left == last {
                    self.nodes[p].left = z;
                } else if self.nodes[p].right == last {
                    self.nodes[p].right = z;
                }
            }
            let (l, r) = (self.nodes[z].left, self.nodes[z].right);
            if l != NIL {
                self.nodes[l].parent = z;
            }
            if r != NIL {
                self.nodes[r].parent = z;
            }
        }

        Some((removed.key, removed.value))
    }
}

impl<K: Ord, V> Default for RbTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, K: Ord, V> IntoIterator for &'a RbTree<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: Ord, V> FromIterator<(K, V)> for RbTree<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tree = Self::new();
        for (k, v) in iter {
            tree.insert(k, v);
        }
        tree
    }
}
