//! Enqueueing, ordering and capacity-aware scheduling.

use crate::error::{Error, Result};
use crate::types::{ArchiveFormat, Event, FormatHint, Task, TaskId, TaskOptions, TaskState};
use std::cmp::Ordering;
use crate::extraction::archive_base_name;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{ExtractionQueue, QueueState};

/// Start order of pending work: priority descending, then oldest first
fn start_order(a: &Task, b: &Task) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Visible order: running tasks first, then the start order
pub(crate) fn display_order(a: &Task, b: &Task) -> Ordering {
    let running = |t: &Task| t.state == TaskState::Running;
    running(b)
        .cmp(&running(a))
        .then_with(|| start_order(a, b))
}

/// Folder beside `source` named after the archive
pub fn default_destination(source: &Path) -> PathBuf {
    let name = archive_base_name(source).unwrap_or_else(|| "extracted".to_string());
    source.parent().unwrap_or_else(|| Path::new("")).join(name)
}

impl ExtractionQueue {
    /// Add an archive to the queue with normal priority
    ///
    /// `format` of `None` lets the engine sniff the format when the task starts.
    /// The task is inserted at the front of the list and scheduling runs
    /// immediately, so it may already be running when this returns.
    pub async fn enqueue(
        &self,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        format: Option<ArchiveFormat>,
    ) -> Task {
        let options = TaskOptions {
            format: format.map(FormatHint::Exact).unwrap_or_default(),
            ..Default::default()
        };
        self.enqueue_with_options(source, destination, options).await
    }

    /// Add an archive to the queue, unpacking into a folder beside it
    ///
    /// The folder is named after the archive without its extension or volume
    /// markers: `/downloads/movie.part01.rar` unpacks into `/downloads/movie`.
    pub async fn enqueue_beside(
        &self,
        source: impl Into<PathBuf>,
        format: Option<ArchiveFormat>,
    ) -> Task {
        let source = source.into();
        let destination = default_destination(&source);
        self.enqueue(source, destination, format).await
    }

    /// Add an archive to the queue with explicit options
    pub async fn enqueue_with_options(
        &self,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        options: TaskOptions,
    ) -> Task {
        let mut state = self.state.lock().await;
        let queued = self.insert_task(&mut state, source.into(), destination.into(), options);
        self.schedule_locked(&mut state);
        state.task(queued.id).cloned().unwrap_or(queued)
    }

    fn insert_task(
        &self,
        state: &mut QueueState,
        source: PathBuf,
        destination: PathBuf,
        options: TaskOptions,
    ) -> Task {
        let id = self.next_task_id();
        let task = Task::new(id, source, destination, options.format, options.priority);

        info!(
            task_id = id.0,
            source = ?task.source,
            destination = ?task.destination,
            priority = ?task.priority,
            "task queued"
        );
        self.emit_event(Event::Queued {
            id,
            source: task.source.clone(),
        });
        state.tasks.insert(0, task.clone());
        task
    }

    /// Start pending tasks up to the concurrency cap
    ///
    /// Idempotent: with no free capacity or no pending task nothing happens.
    pub async fn schedule(&self) {
        let mut state = self.state.lock().await;
        self.schedule_locked(&mut state);
    }

    pub(crate) fn schedule_locked(&self, state: &mut QueueState) {
        if state.shutting_down {
            return;
        }
        let capacity = state.max_concurrent.saturating_sub(state.running_count());
        if capacity == 0 {
            return;
        }

        let mut pending: Vec<&Task> = state
            .tasks
            .iter()
            .filter(|t| t.state == TaskState::Pending)
            .collect();
        pending.sort_by(|a, b| start_order(a, b));
        let to_start: Vec<TaskId> = pending.iter().take(capacity).map(|t| t.id).collect();

        if !to_start.is_empty() {
            debug!(capacity, starting = to_start.len(), "scheduling pending tasks");
        }
        for id in to_start {
            self.start_attempt(state, id, None);
        }
    }

    /// Re-sort the visible list
    pub(crate) fn sort_tasks(state: &mut QueueState) {
        state.tasks.sort_by(display_order);
    }

    /// Change the concurrency cap at runtime
    ///
    /// Raising the cap starts pending work immediately; lowering it lets running
    /// tasks finish without starting new ones until the count drops below it.
    pub async fn set_max_concurrent(&self, max_concurrent: usize) -> Result<()> {
        if max_concurrent == 0 {
            return Err(Error::Config {
                message: "max_concurrent must be at least 1".to_string(),
                key: Some("scheduler.max_concurrent".to_string()),
            });
        }

        let mut state = self.state.lock().await;
        info!(
            from = state.max_concurrent,
            to = max_concurrent,
            "concurrency cap changed"
        );
        state.max_concurrent = max_concurrent;
        self.schedule_locked(&mut state);
        Ok(())
    }

    /// Queue a task for every persisted checkpoint on startup
    ///
    /// Checkpoints whose source archive no longer exists, or whose
    /// (source, destination) pair already has a task, are skipped. The new tasks
    /// resume from their checkpoints once scheduled.
    pub async fn restore_from_checkpoints(&self) -> Result<Vec<TaskId>> {
        let store = self.extractor.store().clone();
        let checkpoints = tokio::task::spawn_blocking(move || store.list_all())
            .await
            .map_err(|e| Error::Io(std::io::Error::other(format!("restore task panicked: {e}"))))??;

        if checkpoints.is_empty() {
            debug!("no checkpoints to restore");
            return Ok(Vec::new());
        }

        let mut state = self.state.lock().await;
        let mut restored = Vec::new();
        for checkpoint in checkpoints {
            if !checkpoint.source_path.exists() {
                warn!(
                    source = ?checkpoint.source_path,
                    "checkpoint source is gone, not restoring"
                );
                continue;
            }
            let already_queued = state.tasks.iter().any(|t| {
                t.source == checkpoint.source_path && t.destination == checkpoint.destination_path
            });
            if already_queued {
                continue;
            }

            let task = self.insert_task(
                &mut state,
                checkpoint.source_path,
                checkpoint.destination_path,
                TaskOptions::default(),
            );
            restored.push(task.id);
        }

        info!(restored_count = restored.len(), "restored tasks from checkpoints");
        self.schedule_locked(&mut state);
        Ok(restored)
    }
}
