//! Transforms: rules that fire once all of their inputs are set.

use ruleflow_core::{CoreError, CoreResult, DatumId, TransformId};
use serde::{Deserialize, Serialize};

/// Transform lifecycle: `Waiting -> Ready -> Complete`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformState {
    /// Some inputs are still unset
    Waiting,
    /// All inputs are set; queued or handed out
    Ready,
    /// Reported complete
    Complete,
}

/// Registration request for a transform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformSpec {
    /// Human-readable name, also part of the checkpoint key
    pub name: String,
    /// Opaque tag naming what runs the transform
    #[serde(default)]
    pub executor: String,
    /// Datums the transform consumes, in order
    #[serde(default)]
    pub inputs: Vec<DatumId>,
    /// Datums the transform produces, in order
    #[serde(default)]
    pub outputs: Vec<DatumId>,
}

impl TransformSpec {
    /// Create a spec with no inputs or outputs
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executor: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Set the executor tag
    #[must_use]
    pub fn with_executor(mut self, executor: impl Into<String>) -> Self {
        self.executor = executor.into();
        self
    }

    /// Add an input
    #[must_use]
    pub fn input(mut self, datum: DatumId) -> Self {
        self.inputs.push(datum);
        self
    }

    /// Add an output
    #[must_use]
    pub fn output(mut self, datum: DatumId) -> Self {
        self.outputs.push(datum);
        self
    }

    /// Check the parts that do not depend on engine state
    ///
    /// # Errors
    ///
    /// Returns `Command` for an empty name or an output listed twice
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::command("transform name must not be empty"));
        }
        for (i, output) in self.outputs.iter().enumerate() {
            if self.outputs[..i].contains(output) {
                return Err(CoreError::command(format!(
                    "transform {} lists output {} twice",
                    self.name, output
                )));
            }
        }
        Ok(())
    }
}

/// A registered transform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transform {
    id: TransformId,
    spec: TransformSpec,
    pending: usize,
    state: TransformState,
}

impl Transform {
    pub(crate) const fn new(id: TransformId, spec: TransformSpec, pending: usize) -> Self {
        let state = if pending == 0 {
            TransformState::Ready
        } else {
            TransformState::Waiting
        };
        Self {
            id,
            spec,
            pending,
            state,
        }
    }

    /// Transform ID
    #[must_use]
    pub const fn id(&self) -> TransformId {
        self.id
    }

    /// Name given at registration
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Executor tag
    #[must_use]
    pub fn executor(&self) -> &str {
        &self.spec.executor
    }

    /// Input datums in registration order
    #[must_use]
    pub fn inputs(&self) -> &[DatumId] {
        &self.spec.inputs
    }

    /// Output datums in registration order
    #[must_use]
    pub fn outputs(&self) -> &[DatumId] {
        &self.spec.outputs
    }

    /// Registration request this transform was built from
    #[must_use]
    pub const fn spec(&self) -> &TransformSpec {
        &self.spec
    }

    /// Inputs still unset, counting repeats
    #[must_use]
    pub const fn pending(&self) -> usize {
        self.pending
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> TransformState {
        self.state
    }

    /// One input became set; returns true when this made the transform ready
    pub(crate) fn input_set(&mut self) -> bool {
        if self.pending == 0 {
            return false;
        }
        self.pending -= 1;
        if self.pending == 0 {
            self.state = TransformState::Ready;
            true
        } else {
            false
        }
    }

    pub(crate) fn mark_complete(&mut self) {
        self.state = TransformState::Complete;
    }
}
