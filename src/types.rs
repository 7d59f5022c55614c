//! Core types for unpack-queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for u64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Task state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting for scheduler capacity
    Pending,
    /// An extraction attempt is in flight
    Running,
    /// Stopped by the user; resumable from its checkpoint
    Paused,
    /// Extracted successfully
    Completed,
    /// Last attempt failed; eligible for resume or retry
    Failed,
    /// Cancelled by the user
    Cancelled,
}

impl TaskState {
    /// Whether `resume` may move a task in this state back to pending
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            TaskState::Pending | TaskState::Paused | TaskState::Failed
        )
    }

    /// Whether the task stays in this state until explicitly removed
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Cancelled)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Paused => "paused",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Task priority
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Low priority
    Low = 0,
    /// Normal priority
    #[default]
    Normal = 1,
    /// High priority
    High = 2,
}

/// Archive format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// ZIP archive (.zip, .z01 split sets)
    Zip,
    /// RAR archive (.rar, .r00, .partNN.rar)
    Rar,
    /// 7-Zip archive (.7z, .7z.001)
    SevenZip,
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArchiveFormat::Zip => "ZIP",
            ArchiveFormat::Rar => "RAR",
            ArchiveFormat::SevenZip => "7z",
        };
        f.write_str(s)
    }
}

/// Format requested for a task: a concrete format, or sniff on every attempt
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatHint {
    /// Detect from extension and signature bytes
    #[default]
    Auto,
    /// Treat the source as this format
    Exact(ArchiveFormat),
}

impl From<ArchiveFormat> for FormatHint {
    fn from(format: ArchiveFormat) -> Self {
        FormatHint::Exact(format)
    }
}

/// Ordered volume paths of a (possibly) multi-volume archive
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSet {
    /// Every segment the naming convention says should exist, in order
    pub expected: Vec<PathBuf>,
    /// The segments that exist on disk, in order
    pub found: Vec<PathBuf>,
}

impl VolumeSet {
    /// A set consisting of one file
    pub fn single(path: PathBuf, exists: bool) -> Self {
        Self {
            found: if exists { vec![path.clone()] } else { vec![] },
            expected: vec![path],
        }
    }

    /// Whether the set spans more than one expected segment
    pub fn is_multi_volume(&self) -> bool {
        self.expected.len() > 1
    }

    /// Whether every expected segment exists, position by position
    pub fn is_complete(&self) -> bool {
        self.expected == self.found
    }
}

/// Metadata reported by a format inspector
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionResult {
    /// Whether the file structurally matches its format
    pub valid_format: bool,
    /// Whether the archive spans multiple volumes
    pub multi_volume: bool,
    /// Whether any entry (or the header block) is encrypted
    pub encrypted: bool,
    /// Number of entries, when the format exposes it without decoding
    pub entry_count: Option<usize>,
    /// Declared aggregate uncompressed size, when the format exposes it
    pub total_uncompressed: Option<u64>,
    /// Index of the first encrypted entry in archive order (ZIP)
    pub first_encrypted_entry: Option<usize>,
}

/// Progress snapshot of a running extraction
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Fraction complete (0.0 to 1.0); 0 when the total is unknown
    pub fraction: f64,
    /// Bytes processed so far (including bytes resumed from a checkpoint)
    pub processed_bytes: u64,
    /// Total bytes expected (0 = unknown)
    pub total_bytes: u64,
    /// Throughput over the trailing window in bytes per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_per_second: Option<f64>,
    /// Estimated seconds remaining
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
}

/// An extraction task owned by the scheduler
///
/// Callers only ever see snapshots; the scheduler is the single writer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,
    /// Archive path (any member of a volume set)
    pub source: PathBuf,
    /// Directory the archive is extracted into
    pub destination: PathBuf,
    /// Requested format
    pub format: FormatHint,
    /// Format resolved by the latest attempt
    pub resolved_format: Option<ArchiveFormat>,
    /// Scheduling priority
    pub priority: Priority,
    /// Current state
    pub state: TaskState,
    /// Progress (0.0 to 1.0)
    pub progress: f64,
    /// Throughput in bytes per second
    pub bytes_per_second: Option<f64>,
    /// Estimated seconds remaining
    pub eta_seconds: Option<f64>,
    /// Whether cancel/pause are currently accepted
    pub can_cancel: bool,
    /// Authentication failures recorded for this task
    pub failed_attempts: u32,
    /// Every error message seen across attempts, oldest first
    pub errors: Vec<String>,
    /// Latest error message (cleared when a new attempt starts)
    pub error_message: Option<String>,
    /// When the task was enqueued
    pub created_at: DateTime<Utc>,
    /// When the latest attempt started
    pub started_at: Option<DateTime<Utc>>,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        source: PathBuf,
        destination: PathBuf,
        format: FormatHint,
        priority: Priority,
    ) -> Self {
        Self {
            id,
            source,
            destination,
            format,
            resolved_format: None,
            priority,
            state: TaskState::Pending,
            progress: 0.0,
            bytes_per_second: None,
            eta_seconds: None,
            can_cancel: true,
            failed_attempts: 0,
            errors: Vec::new(),
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
        }
    }
}

/// Options for adding a task to the queue
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Requested format
    #[serde(default)]
    pub format: FormatHint,
    /// Scheduling priority
    #[serde(default)]
    pub priority: Priority,
}

/// Event emitted by the scheduler
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task added to the queue
    Queued {
        /// Task ID
        id: TaskId,
        /// Archive path
        source: PathBuf,
    },

    /// Task moved between states
    StateChanged {
        /// Task ID
        id: TaskId,
        /// Previous state
        from: TaskState,
        /// New state
        to: TaskState,
    },

    /// Extraction progress update
    Progress {
        /// Task ID
        id: TaskId,
        /// Progress snapshot
        progress: Progress,
    },

    /// Task priority changed
    PriorityChanged {
        /// Task ID
        id: TaskId,
        /// New priority
        priority: Priority,
    },

    /// Extraction finished successfully
    Completed {
        /// Task ID
        id: TaskId,
        /// Files materialized into the destination
        files: Vec<PathBuf>,
    },

    /// Extraction attempt failed
    Failed {
        /// Task ID
        id: TaskId,
        /// Machine-readable error code
        code: String,
        /// Error message
        error: String,
    },

    /// Password attempts for the task are exhausted
    TooManyAttempts {
        /// Task ID
        id: TaskId,
        /// Authentication failures recorded
        attempts: u32,
    },

    /// Task removed from the queue
    Removed {
        /// Task ID
        id: TaskId,
    },
}
