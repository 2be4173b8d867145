//! Dataflow rule engine.
//!
//! Transforms subscribe to their unset inputs. Setting a datum counts down
//! every subscriber; a transform whose count reaches zero joins the ready
//! queue, exactly once. Engines are plain values: several may coexist and
//! none of them touch global state.

use bytes::Bytes;
use ruleflow_core::{CoreError, CoreResult, DatumId, IdCounter, TransformId};
use ruleflow_index::RbTree;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use crate::datum::{Datum, DatumBinding, DatumState};
use crate::queue::ReadyQueue;
use crate::transform::{Transform, TransformSpec, TransformState};

/// Engine counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Live datums
    pub datums: usize,
    /// Live datums that are set
    pub datums_set: usize,
    /// Live transforms
    pub transforms: usize,
    /// Live transforms still waiting on inputs
    pub waiting: usize,
    /// Transforms in the ready queue
    pub queued: usize,
    /// Transforms completed since creation
    pub completed: u64,
}

/// Rule engine context
#[derive(Debug, Default)]
pub struct Engine {
    datums: RbTree<DatumId, Datum>,
    transforms: RbTree<TransformId, Transform>,
    ready: ReadyQueue,
    datum_ids: IdCounter,
    transform_ids: IdCounter,
    completed: u64,
}

impl Engine {
    /// Create an empty engine
    #[must_use]
    pub fn new() -> Self {
        Self {
            datums: RbTree::new(),
            transforms: RbTree::new(),
            ready: ReadyQueue::new(),
            datum_ids: IdCounter::new(),
            transform_ids: IdCounter::new(),
            completed: 0,
        }
    }

    fn insert_datum(&mut self, binding: DatumBinding, value: Option<Bytes>) -> CoreResult<DatumId> {
        let id = DatumId::from_raw(self.datum_ids.next_raw());
        let mut datum = Datum::new(id, binding);
        if let Some(value) = value {
            datum.assign(value)?;
        }
        self.datums.try_insert(id, datum)?;
        debug!(datum = %id, "datum created");
        Ok(id)
    }

    /// Create an unset in-memory datum
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the datum table cannot grow
    pub fn datum_create(&mut self) -> CoreResult<DatumId> {
        self.insert_datum(DatumBinding::Memory, None)
    }

    /// Create an unset datum bound to a file
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the datum table cannot grow
    pub fn datum_create_file(&mut self, path: impl Into<PathBuf>) -> CoreResult<DatumId> {
        self.insert_datum(DatumBinding::File(path.into()), None)
    }

    /// Create a datum that is already set
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the datum table cannot grow
    pub fn datum_create_set(&mut self, value: impl Into<Bytes>) -> CoreResult<DatumId> {
        self.insert_datum(DatumBinding::Memory, Some(value.into()))
    }

    /// Set a datum and release the transforms waiting on it
    ///
    /// Transforms made ready by this call are queued in registration order.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown datum, `DoubleWrite` if it is already set
    /// (the stored value is kept)
    pub fn datum_set(&mut self, id: DatumId, value: impl Into<Bytes>) -> CoreResult<()> {
        let datum = self.datum(id)?;
        if datum.is_set() {
            return Err(CoreError::double_write("Datum", id));
        }
        let subscribers = datum.subscriber_count();
        // Every subscriber may become ready; queue space is taken before the
        // value is stored so a failed allocation leaves the datum unset.
        self.ready.reserve(subscribers)?;

        let datum = self
            .datums
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("Datum", id))?;
        let waiting = datum.assign(value.into())?;
        debug!(datum = %id, subscribers = waiting.len(), "datum set");

        for transform_id in waiting {
            let Some(transform) = self.transforms.get_mut(&transform_id) else {
                continue;
            };
            if transform.input_set() {
                self.ready.push(transform_id)?;
                debug!(transform = %transform_id, name = transform.name(), "transform ready");
            }
        }
        Ok(())
    }

    /// Look up a datum
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown datum
    pub fn datum(&self, id: DatumId) -> CoreResult<&Datum> {
        self.datums
            .get(&id)
            .ok_or_else(|| CoreError::not_found("Datum", id))
    }

    /// Value of a datum, `None` while unset
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown datum
    pub fn datum_get(&self, id: DatumId) -> CoreResult<Option<Bytes>> {
        Ok(self.datum(id)?.value().cloned())
    }

    /// State of a datum
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown datum
    pub fn datum_state(&self, id: DatumId) -> CoreResult<DatumState> {
        Ok(self.datum(id)?.state())
    }

    /// Drop a datum the engine no longer needs
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown datum, `Command` while a live transform
    /// uses it as input or output
    pub fn datum_release(&mut self, id: DatumId) -> CoreResult<()> {
        let references = self.datum(id)?.references();
        if references > 0 {
            return Err(CoreError::command(format!(
                "{} is still used by {} live transform(s)",
                id, references
            )));
        }
        self.datums.remove(&id);
        debug!(datum = %id, "datum released");
        Ok(())
    }

    /// Register a transform
    ///
    /// The pending count is the number of unset inputs, counting repeats. A
    /// transform with nothing pending is queued immediately.
    ///
    /// # Errors
    ///
    /// `Command` for an empty name or a repeated output, `NotFound` if an
    /// input or output datum is unknown, `OutOfMemory` if tables cannot grow
    pub fn rule_add(&mut self, spec: TransformSpec) -> CoreResult<TransformId> {
        spec.validate()?;

        let mut pending = 0usize;
        for input in &spec.inputs {
            if !self.datum(*input)?.is_set() {
                pending += 1;
            }
        }
        for output in &spec.outputs {
            self.datum(*output)?;
        }

        // Nothing after the insert below may fail, so subscriber and queue
        // space is reserved first.
        for (position, input) in spec.inputs.iter().enumerate() {
            if spec.inputs[..position].contains(input) {
                continue;
            }
            let uses = spec.inputs[position..].iter().filter(|d| *d == input).count();
            if let Some(datum) = self.datums.get_mut(input) {
                if !datum.is_set() {
                    datum.reserve_subscribers(uses)?;
                }
            }
        }
        if pending == 0 {
            self.ready.reserve(1)?;
        }

        let id = TransformId::from_raw(self.transform_ids.next_raw());
        let inputs = spec.inputs.clone();
        let outputs = spec.outputs.clone();
        let name = spec.name.clone();
        self.transforms.try_insert(id, Transform::new(id, spec, pending))?;

        for input in &inputs {
            if let Some(datum) = self.datums.get_mut(input) {
                if !datum.is_set() {
                    datum.subscribe(id)?;
                }
                datum.retain();
            }
        }
        for output in &outputs {
            if let Some(datum) = self.datums.get_mut(output) {
                datum.retain();
            }
        }

        debug!(transform = %id, %name, pending, "transform added");
        if pending == 0 {
            self.ready.push(id)?;
            debug!(transform = %id, %name, "transform ready");
        }
        Ok(id)
    }

    /// Take up to `max` ready transforms, oldest first
    ///
    /// Never blocks; an empty queue yields an empty vector.
    pub fn ready(&mut self, max: usize) -> Vec<TransformId> {
        let ids = self.ready.pop(max);
        if !ids.is_empty() {
            debug!(count = ids.len(), remaining = self.ready.len(), "ready transforms handed out");
        }
        ids
    }

    /// Number of transforms waiting in the ready queue
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Report a transform as done and drop its bookkeeping
    ///
    /// Outputs are not touched; set them with [`datum_set`](Self::datum_set).
    /// A ready transform that was never handed out leaves the queue.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown or already completed transform, `Command`
    /// if it is still waiting on inputs
    pub fn complete(&mut self, id: TransformId) -> CoreResult<Transform> {
        let transform = self.transform(id)?;
        if transform.state() == TransformState::Waiting {
            return Err(CoreError::command(format!(
                "{} cannot complete: {} input(s) unset",
                id,
                transform.pending()
            )));
        }

        self.ready.remove(id);
        let mut transform = self
            .transforms
            .remove(&id)
            .ok_or_else(|| CoreError::not_found("Transform", id))?;
        for datum_id in transform.inputs().iter().chain(transform.outputs()) {
            if let Some(datum) = self.datums.get_mut(datum_id) {
                datum.release();
            }
        }
        transform.mark_complete();
        self.completed += 1;

        debug!(transform = %id, name = transform.name(), "transform complete");
        Ok(transform)
    }

    /// Look up a live transform
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown or completed transform
    pub fn transform(&self, id: TransformId) -> CoreResult<&Transform> {
        self.transforms
            .get(&id)
            .ok_or_else(|| CoreError::not_found("Transform", id))
    }

    /// State of a live transform
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown or completed transform
    pub fn transform_state(&self, id: TransformId) -> CoreResult<TransformState> {
        Ok(self.transform(id)?.state())
    }

    /// Live transforms in registration order
    pub fn transforms(&self) -> impl Iterator<Item = &Transform> {
        self.transforms.values()
    }

    /// Snapshot of engine counters
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            datums: self.datums.len(),
            datums_set: self.datums.values().filter(|d| d.is_set()).count(),
            transforms: self.transforms.len(),
            waiting: self
                .transforms
                .values()
                .filter(|t| t.state() == TransformState::Waiting)
                .count(),
            queued: self.ready.len(),
            completed: self.completed,
        }
    }
}
