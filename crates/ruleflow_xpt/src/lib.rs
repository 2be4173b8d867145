//! RULEFLOW Checkpoint Log
//!
//! Append-only key/value records on a byte-stream storage, with an in-memory
//! index rebuilt by replaying the log on open. The log is the source of
//! truth; the index is a bounded cache over it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod config;
pub mod index;
pub mod log;
pub mod record;
pub mod storage;

pub use buffer::BinaryData;
pub use config::{FlushPolicy, XptConfig};
pub use index::{KeyIndex, Location};
pub use log::{Checkpoint, XptStats};
pub use record::{FrameError, Persistence, Record, RecordHeader};
pub use storage::{FileStorage, LogStorage, MemStorage};
