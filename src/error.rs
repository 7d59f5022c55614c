//! Error types for unpack-queue
//!
//! This module provides the error taxonomy for the library:
//! - [`ArchiveError`] - failures of a single extraction attempt (preflight or streaming)
//! - [`PathError`] - rejections from the destination-path sanitizer
//! - [`TaskError`] - invalid scheduler operations on a task
//! - [`Error`] - the top-level error returned by the public API
//!
//! Every error exposes a machine-readable code through [`Error::error_code`] so that
//! a presentation layer can branch on it (e.g. prompt for a password).

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for unpack-queue operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for unpack-queue
#[derive(Debug, Error)]
pub enum Error {
    /// Extraction attempt failed
    #[error("extraction error: {0}")]
    Archive(#[from] ArchiveError),

    /// Archive entry path rejected by the sanitizer
    #[error("unsafe path: {0}")]
    Path(#[from] PathError),

    /// Scheduler operation rejected
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "chunk_size")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single extraction attempt.
///
/// Preflight variants (`PasswordRequired`, `BadPassword`, `MissingVolumes`,
/// `Corrupted`, `Unsupported`) are produced before any byte is written.
/// `Cancelled` and `Io` can also occur mid-stream.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ArchiveError {
    /// Archive has encrypted entries and no password was supplied
    #[error("a password is required to extract this archive")]
    PasswordRequired,

    /// Supplied password did not decrypt the archive
    #[error("wrong password for encrypted archive")]
    BadPassword,

    /// One or more volumes of a multi-volume archive are missing
    #[error("missing volumes: expected [{}], found [{}]", file_names(expected), file_names(found))]
    MissingVolumes {
        /// Every segment the naming convention says should exist
        expected: Vec<PathBuf>,
        /// Segments that exist on disk
        found: Vec<PathBuf>,
    },

    /// Archive headers could not be parsed
    #[error("archive is corrupted: {0}")]
    Corrupted(String),

    /// Extraction was cancelled cooperatively
    #[error("extraction cancelled")]
    Cancelled,

    /// Read or write failure
    #[error("I/O failure: {0}")]
    Io(String),

    /// Format is unknown or does not match its declared type
    #[error("unsupported archive: {0}")]
    Unsupported(String),
}

impl ArchiveError {
    /// Whether this failure is authentication-related (counts against password attempts)
    pub fn is_password_error(&self) -> bool {
        matches!(self, ArchiveError::PasswordRequired | ArchiveError::BadPassword)
    }
}

impl From<std::io::Error> for ArchiveError {
    fn from(e: std::io::Error) -> Self {
        ArchiveError::Io(e.to_string())
    }
}

fn file_names(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string())
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rejections produced by the destination-path sanitizer
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PathError {
    /// Entry path starts with a root indicator or a drive-letter prefix
    #[error("absolute entry path rejected: {entry}")]
    AbsolutePath {
        /// The raw entry path from the archive
        entry: String,
    },

    /// Entry path contains a parent-directory segment
    #[error("path traversal rejected: {entry}")]
    Traversal {
        /// The raw entry path from the archive
        entry: String,
    },

    /// Resolved path is outside the destination root
    #[error("entry {entry} resolves to {resolved}, outside of the destination root")]
    EscapedRoot {
        /// The raw entry path from the archive
        entry: String,
        /// The normalized absolute path the entry resolved to
        resolved: PathBuf,
    },

    /// Entry path has no usable segments
    #[error("empty entry path")]
    Empty,

    /// No free name could be found for the rename collision policy
    #[error("could not find a free name for {path} after {attempts} attempts")]
    CollisionExhausted {
        /// The originally requested path
        path: PathBuf,
        /// Number of candidate names probed
        attempts: u32,
    },
}

/// Scheduler operation errors
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task not found in the queue
    #[error("task {id} not found")]
    NotFound {
        /// The task ID that was not found
        id: u64,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} task {id} in state {current_state}")]
    InvalidState {
        /// The task ID that is in an invalid state for the operation
        id: u64,
        /// The operation that was attempted (e.g., "pause", "resume", "retry")
        operation: String,
        /// The current state that prevents the operation (e.g., "completed")
        current_state: String,
    },

    /// Password attempts exhausted for the task
    #[error("too many password attempts for task {id} ({attempts})")]
    TooManyAttempts {
        /// The task ID
        id: u64,
        /// Number of authentication failures recorded
        attempts: u32,
    },
}

impl Error {
    /// Machine-readable error code
    pub fn error_code(&self) -> &str {
        match self {
            Error::Archive(e) => e.error_code(),
            Error::Path(e) => match e {
                PathError::AbsolutePath { .. } => "absolute_path",
                PathError::Traversal { .. } => "path_traversal",
                PathError::EscapedRoot { .. } => "escaped_root",
                PathError::Empty => "empty_path",
                PathError::CollisionExhausted { .. } => "collision_exhausted",
            },
            Error::Task(e) => match e {
                TaskError::NotFound { .. } => "task_not_found",
                TaskError::InvalidState { .. } => "invalid_state",
                TaskError::TooManyAttempts { .. } => "too_many_attempts",
            },
            Error::Config { .. } => "config_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
        }
    }
}

impl ArchiveError {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            ArchiveError::PasswordRequired => "password_required",
            ArchiveError::BadPassword => "bad_password",
            ArchiveError::MissingVolumes { .. } => "missing_volumes",
            ArchiveError::Corrupted(_) => "corrupted",
            ArchiveError::Cancelled => "cancelled",
            ArchiveError::Io(_) => "io_error",
            ArchiveError::Unsupported(_) => "unsupported",
        }
    }
}
