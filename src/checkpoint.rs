//! Resumable progress records
//!
//! One JSON record per (source, destination) pair lives in the checkpoint
//! directory. Records are replaced atomically (temp file, fsync, rename) so a
//! crash mid-save leaves either the previous record or the new one, never a torn
//! file.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Progress record of an interrupted extraction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Opaque identifier (the record key)
    pub id: String,
    /// Archive being extracted
    pub source_path: PathBuf,
    /// Destination directory
    pub destination_path: PathBuf,
    /// Total input bytes expected (0 = unknown, never resumed)
    pub total_bytes: u64,
    /// Input bytes already written to the partial file
    pub processed_bytes: u64,
    /// Staging file holding the processed bytes
    pub partial_file_path: PathBuf,
    /// When the record was last written
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Build a record for the given pair, stamped now
    pub fn new(
        source: &Path,
        destination: &Path,
        total_bytes: u64,
        processed_bytes: u64,
        partial_file_path: PathBuf,
    ) -> Self {
        Self {
            id: CheckpointStore::key(source, destination),
            source_path: source.to_path_buf(),
            destination_path: destination.to_path_buf(),
            total_bytes,
            processed_bytes,
            partial_file_path,
            updated_at: Utc::now(),
        }
    }

    /// Whether the record can be trusted for resume against an input of `total_bytes`
    pub fn is_resumable_for(&self, total_bytes: u64) -> bool {
        self.total_bytes > 0
            && self.total_bytes == total_bytes
            && self.processed_bytes <= self.total_bytes
    }
}

/// Directory-backed checkpoint persistence
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
}

// Distinguishes temp files of concurrent saves within one process
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl CheckpointStore {
    /// Create a store rooted at `dir` (created lazily on first save)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the records
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record key: lowercase hex SHA-256 of `source \0 destination`
    pub fn key(source: &Path, destination: &Path) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_os_str().as_encoded_bytes());
        hasher.update([0u8]);
        hasher.update(destination.as_os_str().as_encoded_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    fn record_path(&self, source: &Path, destination: &Path) -> PathBuf {
        self.dir
            .join(format!("{}.json", Self::key(source, destination)))
    }

    /// Persist a record, replacing any prior record for the same pair
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let target = self.record_path(&checkpoint.source_path, &checkpoint.destination_path);
        let temp = self.dir.join(format!(
            ".{}.{}-{}.tmp",
            checkpoint.id,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let json = serde_json::to_vec_pretty(checkpoint)?;
        let write_result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            fs::rename(&temp, &target)
        })();

        if let Err(e) = write_result {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        debug!(
            source = ?checkpoint.source_path,
            processed_bytes = checkpoint.processed_bytes,
            total_bytes = checkpoint.total_bytes,
            "checkpoint saved"
        );
        Ok(())
    }

    /// Load the record for a pair
    ///
    /// Returns `None` when no record exists, when it cannot be parsed, or when the
    /// stored pair does not match the requested one.
    pub fn load(&self, source: &Path, destination: &Path) -> Result<Option<Checkpoint>> {
        let path = self.record_path(source, destination);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<Checkpoint>(&bytes) {
            Ok(cp) if cp.source_path == source && cp.destination_path == destination => {
                Ok(Some(cp))
            }
            Ok(cp) => {
                warn!(
                    ?path,
                    stored_source = ?cp.source_path,
                    "checkpoint key collision, ignoring record"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(?path, error = %e, "unreadable checkpoint, ignoring record");
                Ok(None)
            }
        }
    }

    /// Delete the record for a pair (no-op when absent)
    pub fn remove(&self, source: &Path, destination: &Path) -> Result<()> {
        match fs::remove_file(self.record_path(source, destination)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every readable record in the store, for startup resume scans
    pub fn list_all(&self) -> Result<Vec<Checkpoint>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut checkpoints = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<Checkpoint>(&bytes).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(cp) => checkpoints.push(cp),
                Err(e) => warn!(?path, error = %e, "skipping unreadable checkpoint"),
            }
        }

        checkpoints.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(checkpoints)
    }
}

/// Write throttle for checkpoints
///
/// A save is due once at least `interval` has elapsed since the previous save
/// and at least `min_bytes` of progress were made since then.
#[derive(Debug)]
pub struct CheckpointThrottle {
    interval: Duration,
    min_bytes: u64,
    last_save: Option<Instant>,
    last_bytes: u64,
}

impl CheckpointThrottle {
    /// Create a throttle whose byte delta is measured from `start_bytes`
    pub fn new(interval: Duration, min_bytes: u64, start_bytes: u64) -> Self {
        Self {
            interval,
            min_bytes,
            last_save: None,
            last_bytes: start_bytes,
        }
    }

    /// Whether a save is due at `processed` bytes
    pub fn is_due(&self, processed: u64) -> bool {
        let interval_elapsed = self
            .last_save
            .map(|at| at.elapsed() >= self.interval)
            .unwrap_or(true);
        interval_elapsed && processed.saturating_sub(self.last_bytes) >= self.min_bytes
    }

    /// Record that a save happened at `processed` bytes
    pub fn mark_saved(&mut self, processed: u64) {
        self.last_save = Some(Instant::now());
        self.last_bytes = processed;
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(store_dir: &Path, processed: u64) -> Checkpoint {
        Checkpoint::new(
            Path::new("/archives/movie.zip"),
            Path::new("/out"),
            10_000,
            processed,
            store_dir.join(".movie.zip.partial"),
        )
    }

    #[test]
    fn save_then_load_returns_the_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path().join("cp"));
        let cp = sample(temp_dir.path(), 4096);

        store.save(&cp).unwrap();
        let loaded = store
            .load(Path::new("/archives/movie.zip"), Path::new("/out"))
            .unwrap()
            .expect("record should exist");

        assert_eq!(loaded, cp);
    }

    #[test]
    fn save_replaces_prior_record_and_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path());

        store.save(&sample(temp_dir.path(), 100)).unwrap();
        store.save(&sample(temp_dir.path(), 200)).unwrap();

        let files: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files.len(), 1, "expected a single record, got {files:?}");
        assert!(files[0].ends_with(".json"));

        let loaded = store
            .load(Path::new("/archives/movie.zip"), Path::new("/out"))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.processed_bytes, 200);
    }

    #[test]
    fn record_name_is_sha256_of_the_pair() {
        let key = CheckpointStore::key(Path::new("a"), Path::new("b"));
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(
            key,
            CheckpointStore::key(Path::new("b"), Path::new("a")),
            "pair order must matter"
        );
        assert_ne!(
            CheckpointStore::key(Path::new("ab"), Path::new("c")),
            CheckpointStore::key(Path::new("a"), Path::new("bc")),
            "separator must keep the components apart"
        );
    }

    #[test]
    fn load_of_missing_record_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path().join("never-created"));
        assert!(store.load(Path::new("x"), Path::new("y")).unwrap().is_none());
    }

    #[test]
    fn load_ignores_corrupted_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path());
        let key = CheckpointStore::key(Path::new("x"), Path::new("y"));
        fs::write(temp_dir.path().join(format!("{key}.json")), b"{not json").unwrap();

        assert!(store.load(Path::new("x"), Path::new("y")).unwrap().is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path());
        store.save(&sample(temp_dir.path(), 1)).unwrap();

        let source = Path::new("/archives/movie.zip");
        let dest = Path::new("/out");
        store.remove(source, dest).unwrap();
        store.remove(source, dest).unwrap();
        assert!(store.load(source, dest).unwrap().is_none());
    }

    #[test]
    fn list_all_skips_unreadable_records() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path());
        store.save(&sample(temp_dir.path(), 10)).unwrap();
        store
            .save(&Checkpoint::new(
                Path::new("/archives/other.rar"),
                Path::new("/out"),
                50,
                5,
                temp_dir.path().join(".other.rar.partial"),
            ))
            .unwrap();
        fs::write(temp_dir.path().join("garbage.json"), b"[]").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"ignored").unwrap();

        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn resumable_only_when_total_matches_and_is_known() {
        let cp = Checkpoint::new(Path::new("a"), Path::new("b"), 100, 40, PathBuf::from("p"));
        assert!(cp.is_resumable_for(100));
        assert!(!cp.is_resumable_for(101));

        let unknown = Checkpoint::new(Path::new("a"), Path::new("b"), 0, 0, PathBuf::from("p"));
        assert!(!unknown.is_resumable_for(0));

        let overrun = Checkpoint::new(Path::new("a"), Path::new("b"), 100, 140, PathBuf::from("p"));
        assert!(!overrun.is_resumable_for(100));
    }

    #[test]
    fn throttle_requires_both_interval_and_byte_delta() {
        let mut throttle = CheckpointThrottle::new(Duration::from_secs(3600), 1024, 0);

        assert!(!throttle.is_due(512), "byte delta not reached");
        assert!(throttle.is_due(1024), "first save only needs the byte delta");

        throttle.mark_saved(1024);
        assert!(
            !throttle.is_due(1024 * 1024),
            "interval has not elapsed since the last save"
        );
    }

    #[test]
    fn throttle_measures_delta_from_resume_offset() {
        let throttle = CheckpointThrottle::new(Duration::ZERO, 100, 5000);
        assert!(!throttle.is_due(5050));
        assert!(throttle.is_due(5100));
    }
}
