//! Checkpointed transforms.
//!
//! A transform's outputs are stored in the checkpoint log under a key
//! derived from its name and input values. After a restart the same
//! transform with the same inputs finds that record and is completed from it
//! instead of being run again.

use bytes::Bytes;
use ruleflow_core::{CoreError, CoreResult, DatumId, TransformId};
use ruleflow_xpt::{Checkpoint, LogStorage, Persistence};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::datum::DatumState;
use crate::engine::Engine;
use crate::transform::{Transform, TransformState};

const KEY_DOMAIN: &[u8] = b"ruleflow.memo.v1";

/// Checkpoint key for a transform name and its input values
///
/// Every part is length-prefixed, so no two distinct argument lists share an
/// encoding.
#[must_use]
pub fn memo_key<I, B>(name: &str, inputs: I) -> Vec<u8>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut hasher = blake3::Hasher::new();
    hasher.update(KEY_DOMAIN);
    hasher.update(&(name.len() as u64).to_le_bytes());
    hasher.update(name.as_bytes());
    for input in inputs {
        let input = input.as_ref();
        hasher.update(&(input.len() as u64).to_le_bytes());
        hasher.update(input);
    }
    hasher.finalize().as_bytes().to_vec()
}

/// Stored outputs of one transform run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoRecord {
    /// Output values in output order
    pub outputs: Vec<Vec<u8>>,
}

impl MemoRecord {
    /// Encode with postcard
    ///
    /// # Errors
    ///
    /// Returns `Internal` if encoding fails
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|e| CoreError::Internal {
            message: format!("encode checkpoint record: {}", e),
        })
    }

    /// Decode a record produced by [`encode`](Self::encode)
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the bytes are not a record
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        postcard::from_bytes(bytes).map_err(|e| CoreError::Internal {
            message: format!("decode checkpoint record: {}", e),
        })
    }
}

impl Engine {
    /// Checkpoint key of a transform whose inputs are all set
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown transform, `Command` if it is still waiting
    pub fn checkpoint_key(&self, id: TransformId) -> CoreResult<Vec<u8>> {
        let transform = self.transform(id)?;
        if transform.state() == TransformState::Waiting {
            return Err(CoreError::command(format!(
                "{} has no checkpoint key until its inputs are set",
                id
            )));
        }

        let mut values = Vec::with_capacity(transform.inputs().len());
        for input in transform.inputs() {
            let value = self
                .datum_get(*input)?
                .ok_or_else(|| CoreError::command(format!("input {} of {} is unset", input, id)))?;
            values.push(value);
        }
        Ok(memo_key(transform.name(), &values))
    }

    fn check_outputs_unset(&self, id: TransformId, count: usize) -> CoreResult<Vec<DatumId>> {
        let outputs = self.transform(id)?.outputs().to_vec();
        if outputs.len() != count {
            return Err(CoreError::command(format!(
                "{} has {} output(s), got {} value(s)",
                id,
                outputs.len(),
                count
            )));
        }
        for output in &outputs {
            if self.datum_state(*output)? == DatumState::Set {
                return Err(CoreError::double_write("Datum", output));
            }
        }
        Ok(outputs)
    }

    fn finish_with(&mut self, id: TransformId, values: Vec<Bytes>) -> CoreResult<Transform> {
        let outputs = self.check_outputs_unset(id, values.len())?;
        for (output, value) in outputs.into_iter().zip(values) {
            self.datum_set(output, value)?;
        }
        self.complete(id)
    }

    /// Store a transform's outputs in the log, set them and complete it
    ///
    /// Nothing is changed unless the record is in the log first.
    ///
    /// # Errors
    ///
    /// `Command` if the transform is waiting or `outputs` does not match its
    /// output count, `DoubleWrite` if an output is already set, or the
    /// checkpoint write error
    pub fn record_outputs<S: LogStorage>(
        &mut self,
        id: TransformId,
        outputs: Vec<Bytes>,
        xpt: &Checkpoint<S>,
        persistence: Persistence,
    ) -> CoreResult<Transform> {
        let key = self.checkpoint_key(id)?;
        self.check_outputs_unset(id, outputs.len())?;

        let record = MemoRecord {
            outputs: outputs.iter().map(|v| v.to_vec()).collect(),
        };
        let sequence = xpt.write(&key, &record.encode()?, persistence, true)?;
        debug!(transform = %id, %sequence, "transform outputs checkpointed");

        self.finish_with(id, outputs)
    }

    /// Complete a transform from a stored checkpoint, if there is one
    ///
    /// Returns `false`, changing nothing, when the log has no record for the
    /// transform's current inputs.
    ///
    /// # Errors
    ///
    /// `Command` if the transform is waiting or the stored record does not
    /// fit it, `DoubleWrite` if an output is already set, `Internal` for an
    /// undecodable record, or the checkpoint read error
    pub fn restore<S: LogStorage>(
        &mut self,
        id: TransformId,
        xpt: &Checkpoint<S>,
    ) -> CoreResult<bool> {
        let key = self.checkpoint_key(id)?;
        let data = match xpt.lookup(&key) {
            Ok(data) => data,
            Err(CoreError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };

        let record = MemoRecord::decode(&data)?;
        data.release();
        let values: Vec<Bytes> = record.outputs.into_iter().map(Bytes::from).collect();
        let transform = self.finish_with(id, values)?;
        info!(transform = %id, name = transform.name(), "transform restored from checkpoint");
        Ok(true)
    }
}
