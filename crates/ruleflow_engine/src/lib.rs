//! RULEFLOW Rule Engine
//!
//! Dataflow scheduling core: datums are written once, transforms become
//! ready exactly when all of their inputs are set, and completed transforms
//! can be memoized in a checkpoint log and restored after a restart.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod datum;
pub mod engine;
pub mod memo;
pub mod queue;
pub mod shared;
pub mod transform;

pub use datum::{Datum, DatumBinding, DatumState};
pub use engine::{Engine, EngineStats};
pub use memo::{memo_key, MemoRecord};
pub use queue::ReadyQueue;
pub use shared::SharedEngine;
pub use transform::{Transform, TransformSpec, TransformState};
