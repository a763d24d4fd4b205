// SPDX-License-Identifier: PMPL-1.0-or-later
//
// telespool - Storage performance policy and batch wrap format
//
// `StoragePolicy` is a configuration value object consulted by the
// orchestrator on every write and read decision. It is validated once
// at construction: a self-contradictory policy is a startup error,
// never a per-event one.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SpoolError, SpoolResult};

/// Limits governing segment-file rotation, readability and the
/// directory budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoragePolicy {
    /// Maximum size of a single segment file in bytes. The current file
    /// is not reused for writing once its size reaches this bound.
    pub max_file_size: u64,

    /// Maximum size of a single event payload in bytes. Larger events
    /// are rejected at write time.
    pub max_object_size: u64,

    /// Maximum age of the current file before rotation. A file older
    /// than this is never appended to again.
    pub max_file_age: Duration,

    /// Minimum age a file must reach before it becomes readable. This
    /// must be at least `max_file_age`, which is what guarantees a file
    /// is never concurrently written and read.
    pub min_file_age_for_read: Duration,

    /// Maximum total bytes the directory may hold. Oldest files are
    /// dropped first when the budget is exceeded.
    pub max_total_size: u64,

    /// Maximum number of segment files the directory may hold.
    pub max_file_count: usize,
}

impl Default for StoragePolicy {
    fn default() -> Self {
        Self {
            max_file_size: 4 * 1024 * 1024,
            max_object_size: 512 * 1024,
            max_file_age: Duration::from_millis(4_750),
            min_file_age_for_read: Duration::from_millis(5_250),
            max_total_size: 512 * 1024 * 1024,
            max_file_count: 1_000,
        }
    }
}

impl StoragePolicy {
    /// Check the policy for internal contradictions.
    ///
    /// Returns `SpoolError::InvalidPolicy` describing the first
    /// violation found.
    pub fn validate(&self) -> SpoolResult<()> {
        if self.max_file_size == 0 {
            return Err(SpoolError::InvalidPolicy(
                "max_file_size must be greater than zero".to_string(),
            ));
        }
        if self.max_object_size > self.max_file_size {
            return Err(SpoolError::InvalidPolicy(format!(
                "max_object_size ({}) exceeds max_file_size ({})",
                self.max_object_size, self.max_file_size
            )));
        }
        if self.max_file_size > self.max_total_size {
            return Err(SpoolError::InvalidPolicy(format!(
                "max_file_size ({}) exceeds max_total_size ({})",
                self.max_file_size, self.max_total_size
            )));
        }
        if self.max_file_count == 0 {
            return Err(SpoolError::InvalidPolicy(
                "max_file_count must be at least 1".to_string(),
            ));
        }
        if self.max_file_age > self.min_file_age_for_read {
            // A file still young enough to be written must not yet be
            // old enough to be read.
            return Err(SpoolError::InvalidPolicy(format!(
                "max_file_age ({:?}) must not exceed min_file_age_for_read ({:?})",
                self.max_file_age, self.min_file_age_for_read
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BatchFormat
// ---------------------------------------------------------------------------

/// How decoded event payloads are joined into one transportable buffer.
///
/// The default turns N JSON objects into one JSON array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFormat {
    /// Bytes emitted before the first payload.
    pub prefix: String,

    /// Bytes emitted after the last payload.
    pub suffix: String,

    /// Bytes emitted between consecutive payloads.
    pub separator: String,
}

impl Default for BatchFormat {
    fn default() -> Self {
        Self {
            prefix: "[".to_string(),
            suffix: "]".to_string(),
            separator: ",".to_string(),
        }
    }
}

impl BatchFormat {
    /// Join payloads into a single buffer: prefix, payloads separated by
    /// the separator, suffix.
    pub fn join<'a, I>(&self, payloads: I) -> Vec<u8>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(self.prefix.as_bytes());
        for (index, payload) in payloads.into_iter().enumerate() {
            if index > 0 {
                buffer.extend_from_slice(self.separator.as_bytes());
            }
            buffer.extend_from_slice(payload);
        }
        buffer.extend_from_slice(self.suffix.as_bytes());
        buffer
    }
}
