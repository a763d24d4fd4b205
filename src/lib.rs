// SPDX-License-Identifier: PMPL-1.0-or-later
//
// telespool - on-device event persistence & batched-upload pipeline
//
// Accepts small serialized telemetry events at arbitrary frequency,
// persists them to local segment files so they survive process death,
// and hands them, batched, to an uploader that may be slow, offline,
// or failing. Disk usage stays bounded under sustained overload by
// dropping the oldest unsent files first.
//
// # Architecture
//
// Events flow producer -> `FileWriter` -> segment file (chosen by the
// `FilesOrchestrator`) -> [file ages past the readable threshold] ->
// `BatchReader` -> decode + optional decrypt -> `Batch` ->
// `UploadWorker` -> transport. On success the source file is deleted;
// on a retryable failure it stays on disk for a later tick; on a
// permanent rejection it is deleted and the batch is dropped.
//
// Segment files are append-only and named after their creation time
// (zero-padded Unix milliseconds), so lexicographic order is age
// order. A file becomes readable only once it has aged past the
// policy's `min_file_age_for_read`, which is at least `max_file_age`;
// that inequality is what guarantees no file is ever read while still
// being written.
//
// ## On-disk block format (all integers little-endian)
//
// ```text
// [1 byte:  kind]            -- 0 = Event; other values reserved
// [4 bytes: length (u32)]    -- payload length
// [N bytes: payload]         -- opaque event bytes, per-block encrypted
//                               when a provider is configured
// ```
//
// ## Usage
//
// ```no_run
// use std::sync::Arc;
// use async_trait::async_trait;
// use telespool::{
//     BatchFormat, BatchReader, FileWriter, FilesOrchestrator, StoragePolicy,
//     Transport, UploadOutcome, UploadWorker,
// };
//
// struct HttpTransport;
//
// #[async_trait]
// impl Transport for HttpTransport {
//     async fn send(&self, _payload: &[u8]) -> UploadOutcome {
//         UploadOutcome::Success
//     }
// }
//
// # #[tokio::main] async fn main() {
// let orchestrator = Arc::new(
//     FilesOrchestrator::new("/var/spool/traces", StoragePolicy::default()).unwrap(),
// );
//
// // Producers append events from arbitrary call sites.
// let writer = FileWriter::new(Arc::clone(&orchestrator));
// writer.write(b"{\"span\":1}").unwrap();
//
// // The upload worker drains aged files on a recurring schedule.
// let reader = Arc::new(BatchReader::new(orchestrator, BatchFormat::default()));
// let worker = UploadWorker::new(reader, Arc::new(HttpTransport));
// let handle = worker.spawn();
//
// // ...
// handle.stop().await;
// # }
// ```

pub mod block;
pub mod encryption;
pub mod error;
pub mod orchestrator;
pub mod policy;
pub mod reader;
pub mod uploader;
pub mod writer;

// Re-export the primary public API for ergonomic imports.
pub use block::{Block, BlockKind};
pub use encryption::Encryption;
pub use error::{SpoolError, SpoolResult};
pub use orchestrator::{FilesOrchestrator, SegmentInfo};
pub use policy::{BatchFormat, StoragePolicy};
pub use reader::{Batch, BatchReader};
pub use uploader::{
    TickReport, Transport, UploadDelay, UploadDelayConfig, UploadOutcome, UploadWorker,
    UploadWorkerHandle,
};
pub use writer::FileWriter;
