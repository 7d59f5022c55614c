//! Bounded-concurrency extraction scheduler split into focused submodules.
//!
//! The `ExtractionQueue` struct and its methods are organized by domain:
//! - [`queue`] - Enqueueing, capacity-aware scheduling, startup restore
//! - [`control`] - Task lifecycle control (pause/resume/cancel/retry/remove/priority)
//! - [`runner`] - Attempt execution on the blocking pool and completion handling
//!
//! All mutations of the task list happen under one `tokio::sync::Mutex`. Each
//! running attempt owns a [`CancelHandle`] and a generation number; completions
//! of attempts that have since been superseded are ignored.

mod control;
mod queue;
mod runner;

pub use queue::default_destination;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::cancel::CancelHandle;
use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::error::{Result, TaskError};
use crate::extraction::{Extractor, HandlerRegistry, InMemoryPasswords, PasswordLookup};
use crate::types::{Event, Task, TaskId, TaskState};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

/// In-flight attempt bookkeeping
#[derive(Debug)]
pub(crate) struct Attempt {
    /// Distinguishes this attempt from earlier attempts of the same task
    pub(crate) generation: u64,
    /// Cancellation signal shared with the engine
    pub(crate) cancel: CancelHandle,
    /// Password the attempt runs with
    pub(crate) password: Option<String>,
    /// Cancelled once the attempt's driver has exited
    pub(crate) done: CancellationToken,
    /// Resume was requested while a pause was still being honored
    pub(crate) resume_after_pause: bool,
    /// Cancel was requested while a pause was still being honored
    pub(crate) cancel_after_pause: bool,
}

/// Task list and scheduler limits, guarded by the queue mutex
#[derive(Debug)]
pub(crate) struct QueueState {
    /// Visible task list (front = most recently enqueued until re-sorted)
    pub(crate) tasks: Vec<Task>,
    /// Attempts currently in flight, by task
    pub(crate) attempts: HashMap<TaskId, Attempt>,
    /// Maximum running tasks (runtime adjustable)
    pub(crate) max_concurrent: usize,
    /// Authentication failures tolerated before retries are refused
    pub(crate) max_password_attempts: u32,
    /// Set by `shutdown`; no new attempts are started afterwards
    pub(crate) shutting_down: bool,
    next_generation: u64,
}

impl QueueState {
    fn new(max_concurrent: usize, max_password_attempts: u32) -> Self {
        Self {
            tasks: Vec::new(),
            attempts: HashMap::new(),
            max_concurrent,
            max_password_attempts,
            shutting_down: false,
            next_generation: 0,
        }
    }

    pub(crate) fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    pub(crate) fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> Result<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| TaskError::NotFound { id: id.0 }.into())
    }

    pub(crate) fn running_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Running)
            .count()
    }
}

/// Extraction scheduler (cloneable - all fields are Arc-wrapped)
///
/// # Examples
///
/// ```no_run
/// use unpack_queue::{Config, ExtractionQueue};
///
/// # async fn example() -> unpack_queue::Result<()> {
/// let queue = ExtractionQueue::from_config(Config::default())?;
/// let mut events = queue.subscribe();
/// let task = queue.enqueue("/downloads/movie.part1.rar", "/media/movie", None).await;
///
/// while let Ok(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # let _ = task;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ExtractionQueue {
    /// Task list, attempts and limits
    pub(crate) state: Arc<Mutex<QueueState>>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Synchronous extraction engine shared by all attempts
    pub(crate) extractor: Arc<Extractor>,
    /// Password lookup consulted when an attempt starts without one
    pub(crate) passwords: Arc<dyn PasswordLookup>,
    next_id: Arc<AtomicU64>,
}

impl ExtractionQueue {
    /// Create a queue over explicit collaborators
    ///
    /// The configuration is validated first; the checkpoint directory in
    /// `config.persistence` is ignored in favor of `store`.
    pub fn new(
        config: Config,
        registry: HandlerRegistry,
        store: CheckpointStore,
        passwords: Arc<dyn PasswordLookup>,
    ) -> Result<Self> {
        config.validate()?;

        // Buffer of 1000 events; slow subscribers lag rather than block the queue
        let (event_tx, _rx) = broadcast::channel(1000);

        Ok(Self {
            state: Arc::new(Mutex::new(QueueState::new(
                config.scheduler.max_concurrent,
                config.scheduler.max_password_attempts,
            ))),
            event_tx,
            extractor: Arc::new(Extractor::new(registry, store, config.extraction)),
            passwords,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Create a queue with the default handlers, a checkpoint store at
    /// `config.persistence.checkpoint_dir` and an in-memory password cache
    pub fn from_config(config: Config) -> Result<Self> {
        let store = CheckpointStore::new(config.persistence.checkpoint_dir.clone());
        Self::new(
            config,
            HandlerRegistry::default(),
            store,
            Arc::new(InMemoryPasswords::new()),
        )
    }

    /// Subscribe to queue events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Snapshot of every task, in list order
    pub async fn tasks(&self) -> Vec<Task> {
        self.state.lock().await.tasks.clone()
    }

    /// Snapshot of one task
    pub async fn task(&self, id: TaskId) -> Option<Task> {
        self.state.lock().await.task(id).cloned()
    }

    /// Current concurrency cap
    pub async fn max_concurrent(&self) -> usize {
        self.state.lock().await.max_concurrent
    }

    /// Engine used for attempts
    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    pub(crate) fn next_task_id(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Emit an event to all subscribers
    ///
    /// Events are dropped silently when nobody is subscribed.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Move a task to `to`, emitting `StateChanged` when the state differs
    pub(crate) fn set_state(&self, task: &mut Task, to: TaskState) {
        let from = task.state;
        if from == to {
            return;
        }
        task.state = to;
        tracing::debug!(task_id = task.id.0, %from, %to, "task state changed");
        self.emit_event(Event::StateChanged {
            id: task.id,
            from,
            to,
        });
    }
}

impl std::fmt::Debug for ExtractionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionQueue")
            .field("extractor", &self.extractor)
            .finish_non_exhaustive()
    }
}
