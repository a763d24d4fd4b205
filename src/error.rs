// SPDX-License-Identifier: PMPL-1.0-or-later
//
// telespool - Error types
//
// Defines all error conditions that can arise in the spool pipeline:
// I/O failures, framing corruption, encryption failures, and invalid
// configuration detected at startup.

use thiserror::Error;

/// Errors that can occur during spool operations.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// An I/O error occurred while reading or writing a segment file.
    #[error("spool I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A single event exceeds the configured maximum object size.
    /// The event is rejected at write time; nothing is appended.
    #[error("event of {size} bytes exceeds maximum object size {max_size}")]
    EventTooLarge {
        /// Size of the rejected event payload in bytes.
        size: u64,
        /// The configured `max_object_size`.
        max_size: u64,
    },

    /// An unknown block kind byte was encountered while decoding.
    #[error("unknown block kind byte: {0}")]
    UnknownBlockKind(u8),

    /// The storage policy is self-contradictory. Surfaced once at
    /// construction, never per event.
    #[error("invalid storage policy: {0}")]
    InvalidPolicy(String),

    /// The configured encryption provider failed to transform a payload.
    #[error("encryption provider error: {0}")]
    Encryption(String),
}

/// Convenience type alias for spool results.
pub type SpoolResult<T> = Result<T, SpoolError>;
