//! Task lifecycle control: pause, resume, cancel, retry, remove and priority.

use crate::cancel::CancelReason;
use crate::error::{Error, Result, TaskError};
use crate::types::{Event, Priority, TaskId, TaskState};
use tracing::info;

use super::ExtractionQueue;

fn invalid_state(id: TaskId, operation: &str, state: TaskState) -> Error {
    Error::Task(TaskError::InvalidState {
        id: id.0,
        operation: operation.to_string(),
        current_state: state.to_string(),
    })
}

impl ExtractionQueue {
    /// Pause a task
    ///
    /// A running attempt is signalled to stop; it persists a checkpoint and the
    /// task becomes `paused` once the engine has observed the signal. A pending
    /// task is paused directly. Pausing a paused task is a no-op.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if the task doesn't exist
    /// - [`TaskError::InvalidState`] if the task is completed, failed or cancelled
    pub async fn pause(&self, id: TaskId) -> Result<()> {
        let mut state = self.state.lock().await;
        let current = state.task_mut(id)?.state;

        match current {
            TaskState::Paused => Ok(()),
            TaskState::Running => {
                if let Some(attempt) = state.attempts.get_mut(&id) {
                    attempt.cancel.request(CancelReason::Pause);
                }
                state.task_mut(id)?.can_cancel = false;
                info!(task_id = id.0, "pause requested");
                Ok(())
            }
            TaskState::Pending => {
                let task = state.task_mut(id)?;
                task.can_cancel = false;
                self.set_state(task, TaskState::Paused);
                info!(task_id = id.0, "task paused");
                Ok(())
            }
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled => {
                Err(invalid_state(id, "pause", current))
            }
        }
    }

    /// Resume a paused, failed or pending task
    ///
    /// The task goes back to `pending` and scheduling runs; when capacity
    /// allows it starts from its checkpoint. Resuming a running task is a no-op,
    /// unless a pause is still being honored, in which case the task is
    /// re-queued as soon as the pause completes.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if the task doesn't exist
    /// - [`TaskError::InvalidState`] if the task is completed or cancelled
    pub async fn resume(&self, id: TaskId) -> Result<()> {
        let mut state = self.state.lock().await;
        let current = state.task_mut(id)?.state;

        match current {
            TaskState::Running => {
                if let Some(attempt) = state.attempts.get_mut(&id)
                    && attempt.cancel.reason() == Some(CancelReason::Pause)
                {
                    attempt.resume_after_pause = true;
                }
                Ok(())
            }
            TaskState::Paused | TaskState::Failed | TaskState::Pending => {
                let task = state.task_mut(id)?;
                task.can_cancel = true;
                task.error_message = None;
                self.set_state(task, TaskState::Pending);
                info!(task_id = id.0, from = %current, "task resumed");
                self.schedule_locked(&mut state);
                Ok(())
            }
            TaskState::Completed | TaskState::Cancelled => Err(invalid_state(id, "resume", current)),
        }
    }

    /// Cancel a task
    ///
    /// A running attempt is signalled to stop and persists a checkpoint; the
    /// task becomes `cancelled` once the engine has observed the signal. Tasks
    /// that are not running are cancelled directly. Cancelled tasks stay in the
    /// list until removed.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if the task doesn't exist
    /// - [`TaskError::InvalidState`] if the task is completed
    pub async fn cancel(&self, id: TaskId) -> Result<()> {
        let mut state = self.state.lock().await;
        let current = state.task_mut(id)?.state;

        match current {
            TaskState::Cancelled => Ok(()),
            TaskState::Running => {
                if let Some(attempt) = state.attempts.get_mut(&id) {
                    // A pause already in flight keeps its reason; override the outcome
                    attempt.cancel.request(CancelReason::Cancel);
                    attempt.resume_after_pause = false;
                    attempt.cancel_after_pause = true;
                }
                state.task_mut(id)?.can_cancel = false;
                info!(task_id = id.0, "cancel requested");
                Ok(())
            }
            TaskState::Pending | TaskState::Paused | TaskState::Failed => {
                let task = state.task_mut(id)?;
                task.can_cancel = false;
                self.set_state(task, TaskState::Cancelled);
                info!(task_id = id.0, "task cancelled");
                Ok(())
            }
            TaskState::Completed => Err(invalid_state(id, "cancel", current)),
        }
    }

    /// Start a fresh attempt immediately, optionally with a new password
    ///
    /// Any in-flight attempt is superseded and its completion ignored. The
    /// new attempt bypasses the concurrency cap.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if the task doesn't exist
    /// - [`TaskError::TooManyAttempts`] once the task has used up its password attempts
    /// - [`TaskError::InvalidState`] if the task is completed or cancelled
    pub async fn retry(&self, id: TaskId, password: Option<String>) -> Result<()> {
        let mut state = self.state.lock().await;
        let max_password_attempts = state.max_password_attempts;
        let task = state.task_mut(id)?;

        if task.failed_attempts >= max_password_attempts {
            return Err(TaskError::TooManyAttempts {
                id: id.0,
                attempts: task.failed_attempts,
            }
            .into());
        }
        if task.state.is_terminal() {
            return Err(invalid_state(id, "retry", task.state));
        }

        task.error_message = None;
        info!(
            task_id = id.0,
            from = %task.state,
            with_password = password.is_some(),
            "retrying task"
        );
        self.start_attempt(&mut state, id, password);
        Ok(())
    }

    /// Drop a task from the queue, stopping any in-flight attempt
    ///
    /// The task's checkpoint is kept, so re-enqueueing the same pair resumes.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if the task doesn't exist
    pub async fn remove(&self, id: TaskId) -> Result<()> {
        let mut state = self.state.lock().await;
        let index = state
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(TaskError::NotFound { id: id.0 })?;

        if let Some(attempt) = state.attempts.remove(&id) {
            attempt.cancel.request(CancelReason::Superseded);
        }
        let task = state.tasks.remove(index);

        info!(task_id = id.0, state = %task.state, "task removed");
        self.emit_event(Event::Removed { id });
        self.schedule_locked(&mut state);
        Ok(())
    }

    /// Change a task's priority
    ///
    /// The visible list is re-sorted (running first, then priority, then age)
    /// and scheduling runs. Running tasks are not preempted.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if the task doesn't exist
    pub async fn set_priority(&self, id: TaskId, priority: Priority) -> Result<()> {
        let mut state = self.state.lock().await;
        let task = state.task_mut(id)?;
        if task.priority != priority {
            task.priority = priority;
            self.emit_event(Event::PriorityChanged { id, priority });
        }

        Self::sort_tasks(&mut state);
        self.schedule_locked(&mut state);
        Ok(())
    }
}

impl ExtractionQueue {
    /// Pause every running task and wait for the attempts to exit
    ///
    /// Each attempt persists its checkpoint on the way out, so a later
    /// [`restore_from_checkpoints`](Self::restore_from_checkpoints) picks the
    /// work up where it stopped. Pending tasks are left untouched and nothing
    /// new is started afterwards.
    pub async fn shutdown(&self) -> Result<()> {
        let in_flight: Vec<_> = {
            let mut state = self.state.lock().await;
            state.shutting_down = true;
            let running: Vec<TaskId> = state.attempts.keys().copied().collect();
            for id in &running {
                if let Ok(task) = state.task_mut(*id) {
                    task.can_cancel = false;
                }
            }
            state
                .attempts
                .values()
                .map(|attempt| {
                    attempt.cancel.request(CancelReason::Pause);
                    attempt.done.clone()
                })
                .collect()
        };

        info!(running = in_flight.len(), "shutting down extraction queue");
        for done in in_flight {
            done.cancelled().await;
        }
        Ok(())
    }
}
