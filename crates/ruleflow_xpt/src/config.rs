//! Checkpoint log configuration.

use ruleflow_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How often buffered records are pushed to storage
///
/// Independent of the per-record [`Persistence`](crate::Persistence) flag:
/// a `Persist` record is always synced before its write returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Buffer until close or a `Persist` write
    #[default]
    NoFlush,
    /// Flush after every record
    AlwaysFlush,
    /// Flush once this many records are buffered
    Periodic(u32),
}

/// Checkpoint log configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XptConfig {
    /// Location of the log file
    pub path: PathBuf,
    /// Flush policy for transient records
    pub flush_policy: FlushPolicy,
    /// Maximum number of keys held by the in-memory index
    pub max_index_entries: usize,
}

impl Default for XptConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".ruleflow/checkpoint.xpt"),
            flush_policy: FlushPolicy::NoFlush,
            max_index_entries: 512,
        }
    }
}

impl XptConfig {
    /// Create a config for the given log path with default settings
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Set the flush policy
    #[must_use]
    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    /// Set the index bound
    #[must_use]
    pub fn with_max_index_entries(mut self, max: usize) -> Self {
        self.max_index_entries = max;
        self
    }

    /// Parse a config from JSON; missing fields take their defaults
    ///
    /// # Errors
    ///
    /// Returns `Command` if the JSON is malformed or the values are invalid
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CoreError::command(format!("invalid checkpoint config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check option combinations
    ///
    /// # Errors
    ///
    /// Returns `Command` for a zero index bound or a zero flush period
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_index_entries == 0 {
            return Err(CoreError::command("max_index_entries must be positive"));
        }
        if self.flush_policy == FlushPolicy::Periodic(0) {
            return Err(CoreError::command("periodic flush interval must be positive"));
        }
        Ok(())
    }
}
