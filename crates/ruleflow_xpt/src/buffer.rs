//! Owned lookup results.

use std::ops::Deref;

/// Caller-owned copy of a checkpoint value
///
/// Returned by [`Checkpoint::lookup`](crate::Checkpoint::lookup). The buffer
/// is independent of the log: later writes, evictions or closing the log do
/// not affect it. Dropping it frees the memory; [`release`](Self::release)
/// does the same thing explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BinaryData {
    data: Vec<u8>,
}

impl BinaryData {
    /// Wrap an owned buffer
    #[must_use]
    pub const fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Borrow the bytes
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Take the bytes out
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Free the buffer
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for BinaryData {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl AsRef<[u8]> for BinaryData {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for BinaryData {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<BinaryData> for Vec<u8> {
    fn from(buf: BinaryData) -> Self {
        buf.data
    }
}
