//! Custom test assertions for integration tests

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;
use unpack_queue::{Event, TaskId};

/// Result of waiting for a task to finish
#[derive(Debug, PartialEq)]
pub enum WaitResult {
    /// Extraction completed successfully
    Completed,
    /// Extraction failed with an error code
    Failed(String),
    /// Timeout waiting for completion
    Timeout,
    /// Channel closed unexpectedly
    ChannelClosed,
}

/// Wait on an event stream until the task completes or fails
///
/// Subscribe before triggering the work so no event is missed.
pub async fn wait_for_completion(
    events: &mut broadcast::Receiver<Event>,
    id: TaskId,
    timeout: Duration,
) -> WaitResult {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Completed { id: event_id, .. }) if event_id == id => {
                    return WaitResult::Completed;
                }
                Ok(Event::Failed {
                    id: event_id, code, ..
                }) if event_id == id => {
                    return WaitResult::Failed(code);
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return WaitResult::ChannelClosed;
                }
            }
        }
    })
    .await;

    result.unwrap_or(WaitResult::Timeout)
}

/// Wait for the first event matching `predicate`
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    mut predicate: F,
) -> Option<Event>
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Assert that `dir` contains exactly the expected files (relative paths)
pub fn assert_files_exist(dir: &Path, expected_files: &[&str]) {
    let found: BTreeSet<String> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(dir)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    let expected: BTreeSet<String> = expected_files.iter().map(|s| s.to_string()).collect();

    assert_eq!(found, expected, "unexpected files under {}", dir.display());
}
