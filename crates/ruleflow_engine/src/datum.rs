//! Datums: write-once values that transforms wait on.

use bytes::Bytes;
use ruleflow_core::{CoreError, CoreResult, DatumId, TransformId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Datum state. `Unset -> Set` is the only transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatumState {
    /// No value yet
    Unset,
    /// Value written
    Set,
}

/// Where a datum's value lives
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatumBinding {
    /// Value held by the engine
    #[default]
    Memory,
    /// Value is a file produced by whoever sets the datum
    File(PathBuf),
}

/// A single-assignment datum
#[derive(Debug, Clone)]
pub struct Datum {
    id: DatumId,
    binding: DatumBinding,
    value: Option<Bytes>,
    /// Transforms still waiting on this datum, one entry per use as input
    subscribers: Vec<TransformId>,
    /// Live transforms naming this datum as input or output
    references: usize,
}

impl Datum {
    pub(crate) const fn new(id: DatumId, binding: DatumBinding) -> Self {
        Self {
            id,
            binding,
            value: None,
            subscribers: Vec::new(),
            references: 0,
        }
    }

    /// Datum ID
    #[must_use]
    pub const fn id(&self) -> DatumId {
        self.id
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> DatumState {
        if self.value.is_some() {
            DatumState::Set
        } else {
            DatumState::Unset
        }
    }

    /// Check if the datum has been set
    #[must_use]
    pub const fn is_set(&self) -> bool {
        self.value.is_some()
    }

    /// Stored value, if set
    #[must_use]
    pub const fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    /// Binding of the datum
    #[must_use]
    pub const fn binding(&self) -> &DatumBinding {
        &self.binding
    }

    /// File path for file-bound datums
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.binding {
            DatumBinding::File(path) => Some(path),
            DatumBinding::Memory => None,
        }
    }

    /// Number of live transforms using this datum
    #[must_use]
    pub const fn references(&self) -> usize {
        self.references
    }

    /// Store the value and hand back the waiting transforms
    pub(crate) fn assign(&mut self, value: Bytes) -> CoreResult<Vec<TransformId>> {
        if self.value.is_some() {
            return Err(CoreError::double_write("Datum", self.id));
        }
        self.value = Some(value);
        Ok(std::mem::take(&mut self.subscribers))
    }

    /// Number of transform inputs still waiting on this datum
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub(crate) fn reserve_subscribers(&mut self, additional: usize) -> CoreResult<()> {
        self.subscribers.try_reserve(additional)?;
        Ok(())
    }

    pub(crate) fn subscribe(&mut self, transform: TransformId) -> CoreResult<()> {
        self.subscribers.try_reserve(1)?;
        self.subscribers.push(transform);
        Ok(())
    }

    pub(crate) fn retain(&mut self) {
        self.references += 1;
    }

    pub(crate) fn release(&mut self) {
        self.references = self.references.saturating_sub(1);
    }
}
