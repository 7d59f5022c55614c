//! Attempt execution on the blocking pool and completion handling.

use crate::cancel::{CancelHandle, CancelReason};
use crate::error::ArchiveError;
use crate::extraction::{ExtractOutcome, ExtractRequest};
use crate::types::{Event, Progress, TaskId, TaskState};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Attempt, ExtractionQueue, QueueState};

impl ExtractionQueue {
    /// Start a fresh attempt for `id`, regardless of capacity
    ///
    /// Any attempt still in flight is superseded; the new attempt waits for it
    /// to exit before touching the staging file. Without an explicit password
    /// the password lookup is consulted.
    pub(crate) fn start_attempt(&self, state: &mut QueueState, id: TaskId, password: Option<String>) {
        let generation = state.next_generation();
        let previous = state.attempts.remove(&id).map(|attempt| {
            attempt.cancel.request(CancelReason::Superseded);
            attempt.done
        });

        let Some(task) = state.tasks.iter_mut().find(|t| t.id == id) else {
            return;
        };
        let password = password.or_else(|| self.passwords.password_for(&task.source));
        let request = ExtractRequest {
            source: task.source.clone(),
            destination: task.destination.clone(),
            format: task.format,
            password: password.clone(),
        };

        task.started_at = Some(Utc::now());
        task.can_cancel = true;
        task.bytes_per_second = None;
        task.eta_seconds = None;
        self.set_state(task, TaskState::Running);

        info!(
            task_id = id.0,
            generation,
            source = ?request.source,
            has_password = request.password.is_some(),
            "starting extraction attempt"
        );

        let cancel = CancelHandle::new();
        let done = CancellationToken::new();
        state.attempts.insert(
            id,
            Attempt {
                generation,
                cancel: cancel.clone(),
                password,
                done: done.clone(),
                resume_after_pause: false,
                cancel_after_pause: false,
            },
        );

        let queue = self.clone();
        tokio::spawn(async move {
            let _done = done.drop_guard();
            if let Some(previous) = previous {
                previous.cancelled().await;
            }
            queue.drive_attempt(id, generation, request, cancel).await;
        });
    }

    /// Run the engine on the blocking pool, forwarding its progress
    async fn drive_attempt(
        &self,
        id: TaskId,
        generation: u64,
        request: ExtractRequest,
        cancel: CancelHandle,
    ) {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<Progress>();
        let extractor = self.extractor.clone();
        let engine_cancel = cancel.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let mut sink = |progress: Progress| {
                progress_tx.send(progress).ok();
            };
            extractor.extract(&request, &mut sink, &engine_cancel)
        });

        // The sender lives in the blocking closure; the channel closes when it returns
        while let Some(progress) = progress_rx.recv().await {
            self.apply_progress(id, generation, progress).await;
        }

        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(task_id = id.0, error = %e, "extraction task panicked");
                Err(ArchiveError::Io(format!("extraction task panicked: {e}")))
            }
        };

        self.finish_attempt(id, generation, result, &cancel).await;
    }

    async fn apply_progress(&self, id: TaskId, generation: u64, progress: Progress) {
        let mut state = self.state.lock().await;
        if !is_current(&state, id, generation) {
            return;
        }
        let Ok(task) = state.task_mut(id) else {
            return;
        };
        task.progress = progress.fraction;
        task.bytes_per_second = progress.bytes_per_second;
        task.eta_seconds = progress.eta_seconds;
        self.emit_event(Event::Progress { id, progress });
    }

    /// Apply an attempt's outcome to its task, then re-schedule
    async fn finish_attempt(
        &self,
        id: TaskId,
        generation: u64,
        result: Result<ExtractOutcome, ArchiveError>,
        cancel: &CancelHandle,
    ) {
        let mut state = self.state.lock().await;
        if !is_current(&state, id, generation) {
            debug!(task_id = id.0, generation, "ignoring superseded attempt");
            return;
        }
        let attempt = state.attempts.remove(&id);
        let max_password_attempts = state.max_password_attempts;

        if let Ok(task) = state.task_mut(id) {
            task.bytes_per_second = None;
            task.eta_seconds = None;
            task.can_cancel = false;

            match result {
                Ok(outcome) => {
                    task.resolved_format = Some(outcome.format);
                    task.progress = 1.0;
                    task.error_message = None;
                    if outcome.inspection.encrypted
                        && let Some(password) = attempt.as_ref().and_then(|a| a.password.as_deref())
                    {
                        self.passwords.remember(&task.source, password);
                    }

                    info!(
                        task_id = id.0,
                        files = outcome.files.len(),
                        bytes = outcome.bytes,
                        resumed_from = outcome.resumed_from,
                        "extraction task completed"
                    );
                    self.set_state(task, TaskState::Completed);
                    self.emit_event(Event::Completed {
                        id,
                        files: outcome.files,
                    });
                }
                Err(ArchiveError::Cancelled) => {
                    let resume = attempt.as_ref().is_some_and(|a| a.resume_after_pause);
                    let cancelled = attempt.as_ref().is_some_and(|a| a.cancel_after_pause);
                    let to = match cancel.reason() {
                        Some(CancelReason::Pause) if cancelled => TaskState::Cancelled,
                        Some(CancelReason::Pause) if resume => TaskState::Pending,
                        Some(CancelReason::Pause) => TaskState::Paused,
                        _ => TaskState::Cancelled,
                    };
                    task.can_cancel = to == TaskState::Pending;
                    info!(task_id = id.0, state = %to, "extraction attempt stopped");
                    self.set_state(task, to);
                }
                Err(e) => {
                    let message = e.to_string();
                    task.error_message = Some(message.clone());
                    task.errors.push(message.clone());
                    if e.is_password_error() {
                        task.failed_attempts += 1;
                    }

                    warn!(
                        task_id = id.0,
                        error = %e,
                        failed_attempts = task.failed_attempts,
                        "extraction task failed"
                    );
                    self.set_state(task, TaskState::Failed);
                    self.emit_event(Event::Failed {
                        id,
                        code: e.error_code().to_string(),
                        error: message,
                    });

                    if e.is_password_error() && task.failed_attempts >= max_password_attempts {
                        warn!(
                            task_id = id.0,
                            attempts = task.failed_attempts,
                            "password attempts exhausted"
                        );
                        self.emit_event(Event::TooManyAttempts {
                            id,
                            attempts: task.failed_attempts,
                        });
                    }
                }
            }
        }

        self.schedule_locked(&mut state);
    }
}

fn is_current(state: &QueueState, id: TaskId, generation: u64) -> bool {
    state
        .attempts
        .get(&id)
        .is_some_and(|attempt| attempt.generation == generation)
}
