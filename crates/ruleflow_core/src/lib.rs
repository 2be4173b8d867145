//! RULEFLOW Core Types
//!
//! This crate contains pure types shared by the index, the checkpoint log
//! and the rule engine. No I/O happens here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;

// Re-exports
pub use error::{CoreError, CoreResult, ErrorKind};
pub use id::{DatumId, IdCounter, Sequence, TransformId};
