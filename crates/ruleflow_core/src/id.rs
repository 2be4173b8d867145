//! Identifiers for RULEFLOW entities.
//!
//! Datum and transform ids are plain integers handed out in registration
//! order, so ordering by id is ordering by creation.

use serde::{Deserialize, Serialize};

/// Datum identifier - identifies a single-assignment value slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatumId(u64);

impl DatumId {
    /// Create from raw value
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DatumId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "datum_{}", self.0)
    }
}

impl From<u64> for DatumId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Transform identifier - identifies a registered rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransformId(u64);

impl TransformId {
    /// Create from raw value
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransformId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transform_{}", self.0)
    }
}

impl From<u64> for TransformId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Checkpoint sequence number - monotonically increasing per log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sequence(u64);

impl Sequence {
    /// Sequence zero (nothing written yet)
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Create from raw value
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The following sequence number
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out ids in strictly increasing order, starting at 1
#[derive(Debug, Clone, Default)]
pub struct IdCounter {
    last: u64,
}

impl IdCounter {
    /// Create a counter that has handed out nothing yet
    #[must_use]
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    /// Next raw id
    pub fn next_raw(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    /// Number of ids handed out so far
    #[must_use]
    pub const fn issued(&self) -> u64 {
        self.last
    }
}
