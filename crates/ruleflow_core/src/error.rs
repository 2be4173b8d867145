//! Shared error taxonomy for RULEFLOW.
//!
//! Both the rule engine and the checkpoint log report failures with the same
//! small set of kinds. [`ErrorKind`] is that taxonomy; [`CoreError`] carries
//! the detail and always maps onto exactly one kind.

use serde::{Deserialize, Serialize};
use std::collections::TryReserveError;
use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Result codes shared by every RULEFLOW subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorKind {
    /// Operation succeeded
    Success = 0,
    /// Out of memory
    Oom = 1,
    /// Attempt to set the same datum or key twice
    DoubleWrite = 2,
    /// Datum, transform or key not found
    NotFound = 3,
    /// Malformed request
    Command = 4,
    /// Unknown error
    Unknown = 5,
}

impl ErrorKind {
    /// Stable name of the code
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Oom => "ERROR_OOM",
            Self::DoubleWrite => "ERROR_DOUBLE_WRITE",
            Self::NotFound => "ERROR_NOT_FOUND",
            Self::Command => "ERROR_COMMAND",
            Self::Unknown => "ERROR_UNKNOWN",
        }
    }

    /// Numeric code
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Convert from a numeric code, returns None for invalid values
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::Oom),
            2 => Some(Self::DoubleWrite),
            3 => Some(Self::NotFound),
            4 => Some(Self::Command),
            5 => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Whether the caller can safely retry, ignore or escalate
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        matches!(self, Self::Success | Self::DoubleWrite | Self::NotFound)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Storage could not be allocated
    #[error("Out of memory: {resource}")]
    OutOfMemory {
        /// What was being allocated
        resource: String,
    },

    /// Single-assignment target written twice
    #[error("{kind} already written: {id}")]
    DoubleWrite {
        /// Entity kind (datum, key, ...)
        kind: String,
        /// Entity identifier
        id: String,
    },

    /// Not found
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind
        kind: String,
        /// Entity identifier
        id: String,
    },

    /// Malformed request or bad option combination
    #[error("Bad command: {reason}")]
    Command {
        /// Why the request was rejected
        reason: String,
    },

    /// Durable storage failure
    #[error("IO error during {operation}: {source}")]
    Io {
        /// Operation that failed
        operation: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Stored data failed validation
    #[error("Corrupt record at offset {offset}: {reason}")]
    Corrupt {
        /// Byte offset of the record
        offset: u64,
        /// What was wrong with it
        reason: String,
    },

    /// Internal error (for unexpected errors)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl CoreError {
    /// Build a `NotFound` error
    pub fn not_found(kind: &str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    /// Build a `DoubleWrite` error
    pub fn double_write(kind: &str, id: impl fmt::Display) -> Self {
        Self::DoubleWrite {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    /// Build a `Command` error
    pub fn command(reason: impl Into<String>) -> Self {
        Self::Command {
            reason: reason.into(),
        }
    }

    /// Wrap an I/O error with the operation that produced it
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// The taxonomy kind this error reports as
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::OutOfMemory { .. } => ErrorKind::Oom,
            Self::DoubleWrite { .. } => ErrorKind::DoubleWrite,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Command { .. } => ErrorKind::Command,
            Self::Io { .. } | Self::Corrupt { .. } | Self::Internal { .. } => ErrorKind::Unknown,
        }
    }
}

impl From<TryReserveError> for CoreError {
    fn from(err: TryReserveError) -> Self {
        Self::OutOfMemory {
            resource: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::not_found("Datum", 7);
        assert_eq!(format!("{}", err), "Datum not found: 7");

        let err = CoreError::double_write("Key", "abc");
        assert_eq!(format!("{}", err), "Key already written: abc");
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(CoreError::not_found("Datum", 1).kind(), ErrorKind::NotFound);
        assert_eq!(CoreError::double_write("Datum", 1).kind(), ErrorKind::DoubleWrite);
        assert_eq!(CoreError::command("bad flag").kind(), ErrorKind::Command);

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        assert_eq!(CoreError::io("sync", io).kind(), ErrorKind::Unknown);

        let err = CoreError::Corrupt {
            offset: 12,
            reason: "checksum".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_try_reserve_maps_to_oom() {
        let mut v: Vec<u8> = Vec::new();
        let err = v.try_reserve(usize::MAX).unwrap_err();
        assert_eq!(CoreError::from(err).kind(), ErrorKind::Oom);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::Success.as_str(), "SUCCESS");
        assert_eq!(ErrorKind::DoubleWrite.to_string(), "ERROR_DOUBLE_WRITE");
        assert_eq!(ErrorKind::Unknown.as_str(), "ERROR_UNKNOWN");
    }

    #[test]
    fn test_kind_code_roundtrip() {
        for code in 0..6u8 {
            let kind = ErrorKind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert!(ErrorKind::from_code(6).is_none());
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(ErrorKind::DoubleWrite.is_recoverable());
        assert!(ErrorKind::NotFound.is_recoverable());
        assert!(!ErrorKind::Oom.is_recoverable());
        assert!(!ErrorKind::Unknown.is_recoverable());
    }

    #[test]
    fn test_io_error_source() {
        use std::error::Error as _;
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = CoreError::io("append", io);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("append"));
    }
}
