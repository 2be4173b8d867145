//! Structural invariant checks.
//!
//! Used by tests and debug assertions; walking the whole tree is O(n).

use crate::tree::{Color, NIL, RbTree};

/// A broken red-black or search-tree property
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    /// Root is not black
    #[error("root node is red")]
    RedRoot,

    /// A red node has a red child
    #[error("red node at slot {slot} has a red child")]
    RedRed {
        /// Arena slot of the parent
        slot: usize,
    },

    /// Two paths disagree on black height
    #[error("black height mismatch at slot {slot}: left {left}, right {right}")]
    BlackHeight {
        /// Arena slot where the subtrees disagree
        slot: usize,
        /// Black height of the left subtree
        left: usize,
        /// Black height of the right subtree
        right: usize,
    },

    /// A child does not point back at its parent
    #[error("child of slot {slot} has a stale parent link")]
    ParentLink {
        /// Arena slot of the parent
        slot: usize,
    },

    /// Keys are not strictly ascending in order
    #[error("keys out of order at in-order position {position}")]
    Order {
        /// In-order position of the offending key
        position: usize,
    },

    /// Reachable nodes do not match the arena size
    #[error("{reachable} nodes reachable from root, arena holds {stored}")]
    Count {
        /// Nodes found by walking from the root
        reachable: usize,
        /// Nodes held by the arena
        stored: usize,
    },
}

impl<K: Ord, V> RbTree<K, V> {
    /// Verify every red-black and ordering invariant
    ///
    /// Returns the black height of the tree (NIL leaves count as one).
    ///
    /// # Errors
    ///
    /// Returns the first violation found
    pub fn check_invariants(&self) -> Result<usize, InvariantViolation> {
        if self.color(self.root) == Color::Red {
            return Err(InvariantViolation::RedRoot);
        }
        if self.root != NIL && self.nodes[self.root].parent != NIL {
            return Err(InvariantViolation::ParentLink { slot: self.root });
        }

        let mut reachable = 0;
        let black_height = self.check_subtree(self.root, &mut reachable)?;
        if reachable != self.nodes.len() {
            return Err(InvariantViolation::Count {
                reachable,
                stored: self.nodes.len(),
            });
        }

        let mut prev: Option<&K> = None;
        for (position, key) in self.keys().enumerate() {
            if let Some(p) = prev {
                if p >= key {
                    return Err(InvariantViolation::Order { position });
                }
            }
            prev = Some(key);
        }

        Ok(black_height)
    }

    fn check_subtree(&self, idx: usize, reachable: &mut usize) -> Result<usize, InvariantViolation> {
        if idx == NIL {
            return Ok(1);
        }
        *reachable += 1;

        let node = &self.nodes[idx];
        for child in [node.left, node.right] {
            if child == NIL {
                continue;
            }
            if self.nodes[child].parent != idx {
                return Err(InvariantViolation::ParentLink { slot: idx });
            }
            if node.color == Color::Red && self.nodes[child].color == Color::Red {
                return Err(InvariantViolation::RedRed { slot: idx });
            }
        }

        let left = self.check_subtree(node.left, reachable)?;
        let right = self.check_subtree(node.right, reachable)?;
        if left != right {
            return Err(InvariantViolation::BlackHeight {
                slot: idx,
                left,
                right,
            });
        }

        Ok(left + usize::from(node.color == Color::Black))
    }
}
