// SPDX-License-Identifier: PMPL-1.0-or-later
//
// telespool - Files orchestrator
//
// Decides which segment file is currently writable and which files are
// eligible for reading, based on the storage policy. Each segment file
// is named after its creation time as zero-padded Unix-epoch
// milliseconds, so lexicographic order equals chronological order.
//
// All directory decisions (rotation, eligibility, reclaim) are
// serialized behind one mutex scoped to this orchestrator instance, so
// the current writable file can never simultaneously qualify as a
// readable file. The orchestrator never retries file-system operations;
// errors surface to the calling writer or reader.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::SpoolResult;
use crate::policy::StoragePolicy;

/// Width of the zero-padded millisecond timestamp in file names.
const FILE_NAME_WIDTH: usize = 16;

/// Metadata about a single segment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Full path to the segment file on disk.
    pub path: PathBuf,

    /// Creation time encoded in the file name, Unix milliseconds UTC.
    pub created_at_millis: i64,

    /// Current file size in bytes.
    pub file_size: u64,
}

impl PartialOrd for SegmentInfo {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SegmentInfo {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.created_at_millis.cmp(&other.created_at_millis)
    }
}

/// Build the canonical file name for a segment created at the given
/// Unix-millisecond timestamp.
///
/// Format: `0000001614874792` (16 digits, lexicographically ordered).
pub fn segment_filename(created_at_millis: i64) -> String {
    format!("{created_at_millis:016}")
}

/// Parse the creation timestamp from a segment file name.
///
/// Returns `None` if the name is not a plain zero-padded integer.
pub fn parse_segment_filename(name: &str) -> Option<i64> {
    if name.len() != FILE_NAME_WIDTH || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse::<i64>().ok()
}

/// Scan a spool directory and return metadata for all segment files,
/// sorted oldest first. A missing directory yields an empty list (the
/// directory is created lazily on first write). Non-segment files are
/// silently ignored.
pub fn list_segments(dir: &Path) -> SpoolResult<Vec<SegmentInfo>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut segments = Vec::new();

    for dir_entry in fs::read_dir(dir)? {
        let dir_entry = dir_entry?;
        let file_name = dir_entry.file_name();
        let name = file_name.to_string_lossy();

        if let Some(created_at_millis) = parse_segment_filename(&name) {
            let metadata = dir_entry.metadata()?;
            segments.push(SegmentInfo {
                path: dir_entry.path(),
                created_at_millis,
                file_size: metadata.len(),
            });
        }
    }

    segments.sort();

    debug!(
        count = segments.len(),
        dir = %dir.display(),
        "Discovered spool segments"
    );

    Ok(segments)
}

// ---------------------------------------------------------------------------
// FilesOrchestrator
// ---------------------------------------------------------------------------

/// Serialized decision state shared by write and read paths.
#[derive(Debug, Default)]
struct OrchestratorState {
    /// The segment currently designated writable, if any.
    current: Option<SegmentInfo>,

    /// Files handed out inside an outstanding batch; excluded from
    /// eligibility until the batch is marked read or released.
    in_use: HashSet<PathBuf>,
}

/// Decides which segment file is writable and which are readable for
/// one spool directory.
///
/// One instance per telemetry signal, owned by the pipeline object
/// graph; construct with a temporary directory for isolated tests.
pub struct FilesOrchestrator {
    dir: PathBuf,
    policy: StoragePolicy,
    state: Mutex<OrchestratorState>,
}

impl FilesOrchestrator {
    /// Create an orchestrator for `dir` under the given policy.
    ///
    /// The policy is validated here; a contradictory policy is a
    /// construction error. The directory itself is created lazily on
    /// the first write.
    pub fn new(dir: impl Into<PathBuf>, policy: StoragePolicy) -> SpoolResult<Self> {
        policy.validate()?;
        Ok(Self {
            dir: dir.into(),
            policy,
            state: Mutex::new(OrchestratorState::default()),
        })
    }

    /// The spool directory this orchestrator manages.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The policy consulted on every decision.
    pub fn policy(&self) -> &StoragePolicy {
        &self.policy
    }

    /// Return the path of the current writable file, creating a new one
    /// if none exists or the existing one has outgrown the policy's
    /// size or age bounds.
    ///
    /// The size check reads the file's metadata, so a file may overshoot
    /// `max_file_size` by at most the one event that was appended after
    /// the last decision.
    pub fn current_writable_file(&self, now: DateTime<Utc>) -> SpoolResult<PathBuf> {
        let mut state = lock(&self.state);

        if let Some(current) = &state.current {
            if self.reusable(current, now)? {
                return Ok(current.path.clone());
            }
        }

        // Rotate: the previous current file (if any) is closed for good
        // and becomes a read candidate once it ages past the threshold.
        if !self.dir.is_dir() {
            fs::create_dir_all(&self.dir)?;
            info!(dir = %self.dir.display(), "Created spool directory");
        }

        // Resolve millisecond collisions by bumping the timestamp, so
        // creation order is preserved in the names.
        let mut created_at_millis = now.timestamp_millis();
        if let Some(current) = &state.current {
            if created_at_millis <= current.created_at_millis {
                created_at_millis = current.created_at_millis + 1;
            }
        }
        let mut path = self.dir.join(segment_filename(created_at_millis));
        while path.exists() {
            created_at_millis += 1;
            path = self.dir.join(segment_filename(created_at_millis));
        }

        fs::File::create(&path)?;

        debug!(
            path = %path.display(),
            "Rotated to new segment file"
        );

        state.current = Some(SegmentInfo {
            path: path.clone(),
            created_at_millis,
            file_size: 0,
        });

        Ok(path)
    }

    /// All segment files that have aged past `min_file_age_for_read`
    /// and are not currently held by an outstanding batch, oldest
    /// first. A file this old can no longer be the writable file, so
    /// reading it can never observe an in-progress append.
    pub fn eligible_readable_files(&self, now: DateTime<Utc>) -> SpoolResult<Vec<PathBuf>> {
        let segments = list_segments(&self.dir)?;
        let state = lock(&self.state);

        let eligible = segments
            .into_iter()
            .filter(|segment| {
                self.age_of(segment, now) >= self.policy.min_file_age_for_read
                    && !state.in_use.contains(&segment.path)
            })
            .map(|segment| segment.path)
            .collect();

        Ok(eligible)
    }

    /// Delete the oldest non-current files until the directory is back
    /// within the policy's total-size and file-count budget.
    ///
    /// This is the backpressure mechanism: under sustained producer
    /// overload the oldest unsent telemetry is dropped first.
    pub fn reclaim_if_over_budget(&self, _now: DateTime<Utc>) -> SpoolResult<()> {
        let segments = list_segments(&self.dir)?;
        let state = lock(&self.state);
        let current_path = state.current.as_ref().map(|segment| segment.path.clone());
        drop(state);

        let mut total_size: u64 = segments.iter().map(|segment| segment.file_size).sum();
        let mut total_count = segments.len();

        for segment in &segments {
            if total_size <= self.policy.max_total_size
                && total_count <= self.policy.max_file_count
            {
                break;
            }
            if Some(&segment.path) == current_path.as_ref() {
                continue;
            }
            debug!(
                path = %segment.path.display(),
                size = segment.file_size,
                "Dropping oldest segment to stay within budget"
            );
            fs::remove_file(&segment.path)?;
            total_size = total_size.saturating_sub(segment.file_size);
            total_count -= 1;
        }

        Ok(())
    }

    /// Mark a file as held by an outstanding batch.
    pub(crate) fn acquire(&self, path: &Path) {
        lock(&self.state).in_use.insert(path.to_path_buf());
    }

    /// Release a file held by a batch. Idempotent.
    pub(crate) fn release(&self, path: &Path) {
        lock(&self.state).in_use.remove(path);
    }

    /// Delete a consumed segment file. A file that is already gone is
    /// not an error: upload retries may race with cleanup.
    pub(crate) fn delete(&self, path: &Path) -> SpoolResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    /// Whether the current file may still be appended to under the
    /// policy's age and size bounds.
    fn reusable(&self, segment: &SegmentInfo, now: DateTime<Utc>) -> SpoolResult<bool> {
        if self.age_of(segment, now) >= self.policy.max_file_age {
            return Ok(false);
        }
        let metadata = match fs::metadata(&segment.path) {
            Ok(metadata) => metadata,
            // Reclaimed or externally removed: rotate to a fresh file.
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(error) => return Err(error.into()),
        };
        Ok(metadata.len() < self.policy.max_file_size)
    }

    fn age_of(&self, segment: &SegmentInfo, now: DateTime<Utc>) -> Duration {
        let millis = now.timestamp_millis() - segment.created_at_millis;
        Duration::from_millis(millis.max(0) as u64)
    }
}

/// Lock a mutex, recovering the guard if a previous holder panicked.
/// Orchestrator state stays consistent across panics because every
/// mutation is a single-field update.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn policy_for_tests() -> StoragePolicy {
        StoragePolicy {
            max_file_size: 100,
            max_object_size: 100,
            max_file_age: Duration::from_secs(1),
            min_file_age_for_read: Duration::from_secs(2),
            max_total_size: 1_000,
            max_file_count: 10,
        }
    }

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    fn write_bytes(path: &Path, count: usize) {
        let mut file = File::options().append(true).open(path).unwrap();
        file.write_all(&vec![0u8; count]).unwrap();
    }

    #[test]
    fn test_filename_roundtrip() {
        assert_eq!(segment_filename(0), "0000000000000000");
        assert_eq!(
            parse_segment_filename(&segment_filename(1_614_874_792_452)),
            Some(1_614_874_792_452)
        );
    }

    #[test]
    fn test_parse_rejects_non_segment_names() {
        assert_eq!(parse_segment_filename("readme.txt"), None);
        assert_eq!(parse_segment_filename(""), None);
        assert_eq!(parse_segment_filename("12345"), None);
        assert_eq!(parse_segment_filename("000000000000000a"), None);
    }

    #[test]
    fn test_invalid_policy_rejected_at_construction() {
        let dir = TempDir::new().unwrap();
        let policy = StoragePolicy {
            max_file_age: Duration::from_secs(10),
            min_file_age_for_read: Duration::from_secs(1),
            ..policy_for_tests()
        };
        assert!(FilesOrchestrator::new(dir.path(), policy).is_err());
    }

    #[test]
    fn test_directory_created_lazily() {
        let dir = TempDir::new().unwrap();
        let spool = dir.path().join("spool");
        let orchestrator = FilesOrchestrator::new(&spool, policy_for_tests()).unwrap();
        assert!(!spool.exists());

        orchestrator.current_writable_file(at(1_000)).unwrap();
        assert!(spool.is_dir());
    }

    #[test]
    fn test_current_file_reused_within_bounds() {
        let dir = TempDir::new().unwrap();
        let orchestrator = FilesOrchestrator::new(dir.path(), policy_for_tests()).unwrap();

        let first = orchestrator.current_writable_file(at(1_000)).unwrap();
        let second = orchestrator.current_writable_file(at(1_500)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rotation_on_age() {
        let dir = TempDir::new().unwrap();
        let orchestrator = FilesOrchestrator::new(dir.path(), policy_for_tests()).unwrap();

        let first = orchestrator.current_writable_file(at(1_000)).unwrap();
        // 1.5s later: past max_file_age of 1s.
        let second = orchestrator.current_writable_file(at(2_500)).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_rotation_on_size() {
        let dir = TempDir::new().unwrap();
        let orchestrator = FilesOrchestrator::new(dir.path(), policy_for_tests()).unwrap();

        let first = orchestrator.current_writable_file(at(1_000)).unwrap();
        write_bytes(&first, 100); // reaches max_file_size
        let second = orchestrator.current_writable_file(at(1_100)).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_same_millisecond_rotations_keep_creation_order() {
        let dir = TempDir::new().unwrap();
        let policy = StoragePolicy {
            max_file_age: Duration::ZERO,
            min_file_age_for_read: Duration::ZERO,
            ..policy_for_tests()
        };
        let orchestrator = FilesOrchestrator::new(dir.path(), policy).unwrap();

        // max_file_age of zero forces a new file on every call, all at
        // the same timestamp.
        let paths: Vec<PathBuf> = (0..3)
            .map(|_| orchestrator.current_writable_file(at(5_000)).unwrap())
            .collect();

        assert_eq!(paths.len(), 3);
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
        assert_eq!(paths.iter().collect::<HashSet<_>>().len(), 3);
    }

    #[test]
    fn test_eligibility_requires_min_age() {
        let dir = TempDir::new().unwrap();
        let orchestrator = FilesOrchestrator::new(dir.path(), policy_for_tests()).unwrap();

        orchestrator.current_writable_file(at(1_000)).unwrap();

        // 1s old: too young to read (min is 2s).
        assert!(orchestrator.eligible_readable_files(at(2_000)).unwrap().is_empty());

        // 3s old: eligible.
        let eligible = orchestrator.eligible_readable_files(at(4_000)).unwrap();
        assert_eq!(eligible.len(), 1);
    }

    #[test]
    fn test_no_read_during_write_for_any_interleaving() {
        let dir = TempDir::new().unwrap();
        let orchestrator = FilesOrchestrator::new(dir.path(), policy_for_tests()).unwrap();

        // At every instant, a file the writer would still append to must
        // not be eligible for reading.
        let mut now = 1_000;
        for _ in 0..50 {
            let writable = orchestrator.current_writable_file(at(now)).unwrap();
            let eligible = orchestrator.eligible_readable_files(at(now)).unwrap();
            assert!(
                !eligible.contains(&writable),
                "writable file offered for reading at t={now}"
            );
            now += 300;
        }
    }

    #[test]
    fn test_eligible_files_oldest_first() {
        let dir = TempDir::new().unwrap();
        let policy = StoragePolicy {
            max_file_age: Duration::ZERO,
            min_file_age_for_read: Duration::ZERO,
            ..policy_for_tests()
        };
        let orchestrator = FilesOrchestrator::new(dir.path(), policy).unwrap();

        let first = orchestrator.current_writable_file(at(1_000)).unwrap();
        let second = orchestrator.current_writable_file(at(2_000)).unwrap();
        let third = orchestrator.current_writable_file(at(3_000)).unwrap();

        let eligible = orchestrator.eligible_readable_files(at(10_000)).unwrap();
        assert_eq!(eligible, vec![first, second, third]);
    }

    #[test]
    fn test_in_use_files_excluded_until_released() {
        let dir = TempDir::new().unwrap();
        let orchestrator = FilesOrchestrator::new(dir.path(), policy_for_tests()).unwrap();

        let file = orchestrator.current_writable_file(at(1_000)).unwrap();

        orchestrator.acquire(&file);
        assert!(orchestrator.eligible_readable_files(at(10_000)).unwrap().is_empty());

        orchestrator.release(&file);
        assert_eq!(
            orchestrator.eligible_readable_files(at(10_000)).unwrap(),
            vec![file]
        );
    }

    #[test]
    fn test_reclaim_drops_oldest_over_size_budget() {
        let dir = TempDir::new().unwrap();
        let policy = StoragePolicy {
            max_file_age: Duration::ZERO,
            min_file_age_for_read: Duration::ZERO,
            max_total_size: 250,
            ..policy_for_tests()
        };
        let orchestrator = FilesOrchestrator::new(dir.path(), policy).unwrap();

        let first = orchestrator.current_writable_file(at(1_000)).unwrap();
        write_bytes(&first, 100);
        let second = orchestrator.current_writable_file(at(2_000)).unwrap();
        write_bytes(&second, 100);
        let third = orchestrator.current_writable_file(at(3_000)).unwrap();
        write_bytes(&third, 100);

        orchestrator.reclaim_if_over_budget(at(3_000)).unwrap();

        assert!(!first.exists(), "oldest file should be dropped first");
        assert!(second.exists());
        assert!(third.exists());
    }

    #[test]
    fn test_reclaim_enforces_file_count_but_keeps_current() {
        let dir = TempDir::new().unwrap();
        let policy = StoragePolicy {
            max_file_age: Duration::ZERO,
            min_file_age_for_read: Duration::ZERO,
            max_file_count: 2,
            ..policy_for_tests()
        };
        let orchestrator = FilesOrchestrator::new(dir.path(), policy).unwrap();

        let mut paths = Vec::new();
        for i in 0..4 {
            paths.push(orchestrator.current_writable_file(at(1_000 + i)).unwrap());
        }

        orchestrator.reclaim_if_over_budget(at(2_000)).unwrap();

        let remaining = list_segments(dir.path()).unwrap();
        assert_eq!(remaining.len(), 2);
        // The current (newest) file always survives reclaim.
        assert!(paths[3].exists());
    }

    #[test]
    fn test_delete_missing_file_is_noop() {
        let dir = TempDir::new().unwrap();
        let orchestrator = FilesOrchestrator::new(dir.path(), policy_for_tests()).unwrap();
        orchestrator
            .delete(&dir.path().join("0000000000099999"))
            .unwrap();
    }

    #[test]
    fn test_list_segments_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join(segment_filename(1_000))).unwrap();
        File::create(dir.path().join("notes.txt")).unwrap();

        let segments = list_segments(dir.path()).unwrap();
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn test_list_segments_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let segments = list_segments(&dir.path().join("nope")).unwrap();
        assert!(segments.is_empty());
    }
}
