// SPDX-License-Identifier: PMPL-1.0-or-later
//
// telespool - Batch reader
//
// Selects the oldest eligible segment file, decodes its blocks,
// decrypts each payload if a provider is configured, and joins the
// payloads into one transportable buffer. Consumption is read-then-
// delete: a batch's source file is removed only after the caller marks
// the batch as read, so an upload failure leaves the file on disk for
// a later attempt.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::block::{decode_all, BlockKind};
use crate::encryption::Encryption;
use crate::error::SpoolResult;
use crate::orchestrator::FilesOrchestrator;
use crate::policy::BatchFormat;

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// The joined, decoded and decrypted contents of one segment file.
///
/// A batch holds its source file in-use: the orchestrator will not
/// offer the file to another read while the batch is outstanding.
/// Dropping the batch releases the hold; `BatchReader::mark_batch_as_read`
/// additionally deletes the file.
pub struct Batch {
    data: Vec<u8>,
    file: PathBuf,
    orchestrator: Arc<FilesOrchestrator>,
}

impl Batch {
    /// The transportable byte buffer for this batch.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Path of the segment file this batch was assembled from.
    pub fn file(&self) -> &PathBuf {
        &self.file
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        // Idempotent: a no-op if mark_batch_as_read already released it.
        self.orchestrator.release(&self.file);
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("file", &self.file)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// BatchReader
// ---------------------------------------------------------------------------

/// Assembles upload batches from eligible segment files, oldest first.
pub struct BatchReader {
    orchestrator: Arc<FilesOrchestrator>,
    format: BatchFormat,
    encryption: Option<Arc<dyn Encryption>>,
}

impl BatchReader {
    /// Create a reader over the given orchestrator, without encryption
    /// at rest.
    pub fn new(orchestrator: Arc<FilesOrchestrator>, format: BatchFormat) -> Self {
        Self {
            orchestrator,
            format,
            encryption: None,
        }
    }

    /// Create a reader that decrypts each block payload after decoding.
    pub fn with_encryption(
        orchestrator: Arc<FilesOrchestrator>,
        format: BatchFormat,
        encryption: Arc<dyn Encryption>,
    ) -> Self {
        Self {
            orchestrator,
            format,
            encryption: Some(encryption),
        }
    }

    /// Assemble the next batch from the oldest eligible file.
    ///
    /// Returns `Ok(None)` when no file is eligible yet; callers must
    /// treat that as a normal, frequent outcome rather than an error.
    ///
    /// Corruption is isolated to the smallest unit possible: a
    /// truncated tail drops only the final partial block, an unknown
    /// block kind or an undecryptable payload skips only that block.
    /// A file whose every block was skipped still yields a batch (of
    /// just the wrap format), so a wholly corrupt file is consumed and
    /// deleted instead of wedging the queue.
    pub fn read_next_batch(&self, now: DateTime<Utc>) -> SpoolResult<Option<Batch>> {
        let eligible = self.orchestrator.eligible_readable_files(now)?;
        let Some(file) = eligible.into_iter().next() else {
            return Ok(None);
        };

        let buffer = std::fs::read(&file)?;

        let mut payloads: Vec<Vec<u8>> = Vec::new();
        for block in decode_all(&buffer) {
            if !matches!(BlockKind::from_byte(block.kind), Ok(BlockKind::Event)) {
                debug!(
                    kind = block.kind,
                    file = %file.display(),
                    "Skipping block of unknown kind"
                );
                continue;
            }
            match &self.encryption {
                Some(provider) => match provider.decrypt(block.data) {
                    Ok(plaintext) => payloads.push(plaintext),
                    Err(error) => {
                        warn!(
                            %error,
                            file = %file.display(),
                            "Skipping undecryptable block"
                        );
                    }
                },
                None => payloads.push(block.data.to_vec()),
            }
        }

        let data = self
            .format
            .join(payloads.iter().map(|payload| payload.as_slice()));

        debug!(
            file = %file.display(),
            events = payloads.len(),
            bytes = data.len(),
            "Assembled batch"
        );

        self.orchestrator.acquire(&file);

        Ok(Some(Batch {
            data,
            file,
            orchestrator: Arc::clone(&self.orchestrator),
        }))
    }

    /// Consume a batch: delete its source file and release the hold.
    ///
    /// Idempotent: marking twice, or marking a batch whose file was
    /// independently deleted, is a no-op.
    pub fn mark_batch_as_read(&self, batch: &Batch) -> SpoolResult<()> {
        self.orchestrator.delete(&batch.file)?;
        self.orchestrator.release(&batch.file);
        debug!(file = %batch.file.display(), "Batch marked as read");
        Ok(())
    }
}
