// SPDX-License-Identifier: PMPL-1.0-or-later
//
// telespool - Upload worker and retry policy
//
// A recurring tick drives the pipeline's consumption side: read the
// next batch, hand it to the transport, and either consume or retain
// the source file depending on how the transport classifies the
// outcome. Infrastructure failures are retried with a growing,
// capped inter-tick delay; content failures are dropped so that
// unrecoverable data never stalls the queue behind it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SpoolResult;
use crate::reader::{Batch, BatchReader};

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// How the transport classified one delivery attempt.
///
/// The classification, not the raw error, decides whether the source
/// file is retained (`Retryable`) or discarded (`Success`/`Permanent`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The collector accepted the batch.
    Success,

    /// Infrastructure failure: network unreachable, server error,
    /// rate limiting. The batch will be retried on a later tick.
    Retryable,

    /// The collector rejected the batch as unprocessable. Retrying
    /// would stall the queue behind unrecoverable data, so the batch
    /// is dropped.
    Permanent,
}

/// External delivery collaborator.
///
/// Connection handling, TLS and timeouts are the transport's concern;
/// the worker only sees the classified outcome.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one batch payload to the remote collector.
    async fn send(&self, payload: &[u8]) -> UploadOutcome;
}

// ---------------------------------------------------------------------------
// UploadDelay
// ---------------------------------------------------------------------------

/// Bounds for the inter-tick delay applied between upload attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadDelayConfig {
    /// Delay used after a successful tick (and at startup).
    pub min: Duration,

    /// Cap for the grown delay while the endpoint stays unavailable.
    pub max: Duration,

    /// Growth factor applied on each retryable failure.
    pub multiplier: f64,
}

impl Default for UploadDelayConfig {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(5),
            max: Duration::from_secs(300),
            multiplier: 2.0,
        }
    }
}

/// Monotonically growing, capped inter-tick delay.
///
/// Grows on retryable failures so an unavailable endpoint is not
/// hammered; resets to the minimum on success.
#[derive(Debug, Clone)]
pub struct UploadDelay {
    config: UploadDelayConfig,
    current: Duration,
}

impl UploadDelay {
    /// Start at the configured minimum.
    pub fn new(config: UploadDelayConfig) -> Self {
        let current = config.min;
        Self { config, current }
    }

    /// The delay to wait before the next tick.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Grow the delay after a retryable failure, capped at the maximum.
    pub fn increase(&mut self) {
        let grown = self.current.mul_f64(self.config.multiplier);
        self.current = grown.min(self.config.max);
    }

    /// Reset to the minimum after a successful upload.
    pub fn reset(&mut self) {
        self.current = self.config.min;
    }
}

impl Default for UploadDelay {
    fn default() -> Self {
        Self::new(UploadDelayConfig::default())
    }
}

// ---------------------------------------------------------------------------
// UploadWorker
// ---------------------------------------------------------------------------

/// State of one scheduling tick.
enum TickState {
    /// Ask the reader for the next batch.
    Reading,
    /// A batch is in flight to the transport.
    Uploading(Batch),
}

/// What a single tick accomplished, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Batches accepted by the collector.
    pub uploaded: usize,
    /// Batches dropped after a permanent rejection.
    pub dropped: usize,
    /// Whether the tick ended early on a retryable failure.
    pub deferred: bool,
}

/// Pulls batches from the reader on a recurring schedule and applies
/// the retry/backoff policy keyed on the transport's outcome.
pub struct UploadWorker {
    reader: Arc<BatchReader>,
    transport: Arc<dyn Transport>,
    delay: UploadDelay,
}

impl UploadWorker {
    /// Create a worker with the default delay bounds.
    pub fn new(reader: Arc<BatchReader>, transport: Arc<dyn Transport>) -> Self {
        Self::with_delay(reader, transport, UploadDelay::default())
    }

    /// Create a worker with explicit delay bounds.
    pub fn with_delay(
        reader: Arc<BatchReader>,
        transport: Arc<dyn Transport>,
        delay: UploadDelay,
    ) -> Self {
        Self {
            reader,
            transport,
            delay,
        }
    }

    /// The delay to apply before the next tick.
    pub fn next_delay(&self) -> Duration {
        self.delay.current()
    }

    /// Run one scheduling tick to completion.
    ///
    /// Drains the backlog while uploads succeed or are permanently
    /// rejected; stops early (with a grown delay) on the first
    /// retryable failure, leaving the source file on disk. No batch
    /// means an immediate, quiet return to idle.
    pub async fn tick(&mut self) -> SpoolResult<TickReport> {
        let mut report = TickReport::default();
        let mut state = TickState::Reading;

        loop {
            state = match state {
                TickState::Reading => match self.reader.read_next_batch(Utc::now())? {
                    Some(batch) => TickState::Uploading(batch),
                    None => break,
                },
                TickState::Uploading(batch) => {
                    match self.transport.send(batch.data()).await {
                        UploadOutcome::Success => {
                            self.reader.mark_batch_as_read(&batch)?;
                            self.delay.reset();
                            report.uploaded += 1;
                            TickState::Reading
                        }
                        UploadOutcome::Permanent => {
                            warn!(
                                file = %batch.file().display(),
                                "Batch permanently rejected, dropping"
                            );
                            self.reader.mark_batch_as_read(&batch)?;
                            report.dropped += 1;
                            TickState::Reading
                        }
                        UploadOutcome::Retryable => {
                            self.delay.increase();
                            report.deferred = true;
                            debug!(
                                file = %batch.file().display(),
                                next_delay_ms = self.delay.current().as_millis() as u64,
                                "Upload deferred, file retained"
                            );
                            // Dropping the batch releases its file for
                            // the next tick (oldest-first retry).
                            break;
                        }
                    }
                }
            };
        }

        Ok(report)
    }

    /// Drive the worker on its own tokio task.
    ///
    /// The task sleeps for the current delay between ticks. Stopping
    /// via the returned handle cancels the pending sleep but lets an
    /// in-flight tick finish its state transitions before the task
    /// halts.
    pub fn spawn(mut self) -> UploadWorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            info!("Upload worker started");
            loop {
                let wait = self.delay.current();
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        if let Err(error) = self.tick().await {
                            warn!(%error, "Upload tick failed");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("Upload worker stopped");
        });

        UploadWorkerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

/// Handle controlling a spawned upload worker.
pub struct UploadWorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl UploadWorkerHandle {
    /// Signal the worker to stop and wait for it to halt.
    pub async fn stop(self) {
        // Receiver may already be gone if the task panicked.
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}
