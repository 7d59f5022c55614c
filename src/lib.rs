//! # unpack-queue
//!
//! Resumable archive extraction for ZIP, RAR and 7z archives, including their
//! multi-volume variants, driven by a bounded-concurrency task queue.
//!
//! ## Design Philosophy
//!
//! unpack-queue is designed to be:
//! - **Resumable** - Pausing, cancelling or crashing never loses more than one checkpoint interval
//! - **Safe by default** - Entry paths are sanitized against traversal before anything is written
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use unpack_queue::{Config, ExtractionQueue};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let queue = ExtractionQueue::from_config(Config::default())?;
//!
//!     // Subscribe to events
//!     let mut events = queue.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     // Pick up work interrupted by a previous run, then add new work
//!     queue.restore_from_checkpoints().await?;
//!     queue.enqueue("/downloads/show.part1.rar", "/media/show", None).await;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Cooperative cancellation
pub mod cancel;
/// Resumable checkpoint persistence
pub mod checkpoint;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Archive detection, inspection and streaming extraction
pub mod extraction;
/// Bounded-concurrency extraction scheduler
pub mod queue;
/// Archive entry path sanitizing
pub mod sanitize;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use cancel::{CancelHandle, CancelReason};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::{CollisionPolicy, Config};
pub use error::{ArchiveError, Error, PathError, Result, TaskError};
pub use extraction::{ExtractOutcome, ExtractRequest, Extractor, HandlerRegistry, PasswordLookup};
pub use queue::ExtractionQueue;
pub use types::{
    ArchiveFormat, Event, FormatHint, InspectionResult, Priority, Progress, Task, TaskId,
    TaskOptions, TaskState, VolumeSet,
};

/// Helper function to run the queue with graceful signal handling.
///
/// Waits for a termination signal and then calls the queue's `shutdown()`
/// method, which pauses running extractions so their checkpoints are flushed.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use unpack_queue::{Config, ExtractionQueue, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let queue = ExtractionQueue::from_config(Config::default())?;
///     queue.restore_from_checkpoints().await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(queue).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(queue: ExtractionQueue) -> Result<()> {
    shutdown_on(&queue, wait_for_signal()).await
}

/// Shut the queue down once `trigger` resolves
///
/// [`run_with_shutdown`] with a caller-chosen trigger, e.g. a oneshot fired by
/// an admin endpoint.
pub async fn shutdown_on<F>(queue: &ExtractionQueue, trigger: F) -> Result<()>
where
    F: std::future::Future<Output = ()>,
{
    trigger.await;
    let running = queue
        .tasks()
        .await
        .iter()
        .filter(|t| t.state == TaskState::Running)
        .count();
    tracing::info!(running, "shutting down extraction queue");
    queue.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let register = |kind: SignalKind, name: &'static str| {
        signal(kind)
            .map_err(|e| tracing::warn!(error = %e, signal = name, "could not register signal handler"))
            .ok()
    };
    let terminate = register(SignalKind::terminate(), "SIGTERM");
    let interrupt = register(SignalKind::interrupt(), "SIGINT");

    let received = match (terminate, interrupt) {
        (Some(mut terminate), Some(mut interrupt)) => {
            tokio::select! {
                _ = terminate.recv() => "SIGTERM",
                _ = interrupt.recv() => "SIGINT",
            }
        }
        (Some(mut terminate), None) => {
            terminate.recv().await;
            "SIGTERM"
        }
        (None, Some(mut interrupt)) => {
            interrupt.recv().await;
            "SIGINT"
        }
        (None, None) => {
            tracing::error!("no signal handler registered, falling back to ctrl_c");
            tokio::signal::ctrl_c().await.ok();
            "ctrl_c"
        }
    };
    tracing::info!(signal = received, "termination signal received");
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!(signal = "ctrl_c", "termination signal received"),
        Err(e) => tracing::error!(error = %e, "failed to listen for ctrl_c"),
    }
}
