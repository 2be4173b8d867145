//! RULEFLOW Ordered Index
//!
//! A generic red-black tree whose nodes live in a dense arena and refer to
//! each other by index. Used as the key index of the checkpoint log and as
//! the id tables of the rule engine.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod check;
pub mod iter;
pub mod tree;

pub use check::InvariantViolation;
pub use iter::{Iter, Keys, Values};
pub use tree::{Color, RbTree};
