// SPDX-License-Identifier: PMPL-1.0-or-later
//
// telespool - Event writer
//
// Appends framed events to the current writable segment file. Each
// write frames the payload via the block codec, optionally encrypting
// the payload first (block granularity, so partial decoding of a file
// stays possible), and finishes by reclaiming any budget overrun.
//
// Failures surface to the producer and the event is dropped; the
// writer never queues events in memory as a consequence of a storage
// failure.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::block::{Block, BlockKind};
use crate::encryption::Encryption;
use crate::error::{SpoolError, SpoolResult};
use crate::orchestrator::FilesOrchestrator;

/// Appends events to the spool directory managed by an orchestrator.
///
/// Safe to call from arbitrary concurrent call sites; rotation and
/// budget decisions are serialized inside the orchestrator. Files are
/// opened for append per write and closed immediately, so a rotated
/// file is never left with an open handle.
pub struct FileWriter {
    orchestrator: Arc<FilesOrchestrator>,
    encryption: Option<Arc<dyn Encryption>>,
}

impl FileWriter {
    /// Create a writer over the given orchestrator, without encryption
    /// at rest.
    pub fn new(orchestrator: Arc<FilesOrchestrator>) -> Self {
        Self {
            orchestrator,
            encryption: None,
        }
    }

    /// Create a writer that encrypts each block payload before framing.
    pub fn with_encryption(
        orchestrator: Arc<FilesOrchestrator>,
        encryption: Arc<dyn Encryption>,
    ) -> Self {
        Self {
            orchestrator,
            encryption: Some(encryption),
        }
    }

    /// Persist one event payload.
    ///
    /// Ownership of the event transfers to the storage layer once this
    /// returns `Ok`. On error the event is dropped and the producer is
    /// told why; nothing is buffered for retry.
    pub fn write(&self, event: &[u8]) -> SpoolResult<()> {
        self.write_with_kind(BlockKind::Event, event)
    }

    /// Persist one payload under an explicit block kind.
    pub fn write_with_kind(&self, kind: BlockKind, event: &[u8]) -> SpoolResult<()> {
        let max_object_size = self.orchestrator.policy().max_object_size;
        if event.len() as u64 > max_object_size {
            warn!(
                size = event.len(),
                max_size = max_object_size,
                "Dropping oversized event"
            );
            return Err(SpoolError::EventTooLarge {
                size: event.len() as u64,
                max_size: max_object_size,
            });
        }

        let payload = match &self.encryption {
            Some(provider) => provider.encrypt(event)?,
            None => event.to_vec(),
        };

        let block = Block {
            kind,
            data: payload,
        };
        let bytes = block.serialize();

        let now = Utc::now();
        let path = self.orchestrator.current_writable_file(now)?;

        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(&bytes)?;
        drop(file);

        debug!(
            path = %path.display(),
            bytes = bytes.len(),
            "Appended event block"
        );

        // Every successful write pays for its own budget check.
        self.orchestrator.reclaim_if_over_budget(now)?;

        Ok(())
    }
}
