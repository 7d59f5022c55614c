use super::*;
use crate::config::{Config, ExtractionConfig, PersistenceConfig, SchedulerConfig};
use crate::error::Error;
use crate::types::{Priority, TaskOptions};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;


const WAIT: Duration = Duration::from_secs(20);

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 241) as u8).collect()
}

fn create_zip(archive_path: &Path, name: &str, content: &[u8]) {
    let file = fs::File::create(archive_path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Stored);
    writer.start_file(name, options).unwrap();
    writer.write_all(content).unwrap();
    writer.finish().unwrap();
}

fn create_encrypted_zip(archive_path: &Path, name: &str, content: &[u8], password: &[u8]) {
    use ::zip::unstable::write::FileOptionsExt;
    let file = fs::File::create(archive_path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options = ::zip::write::FileOptions::default()
        .compression_method(::zip::CompressionMethod::Stored)
        .with_deprecated_encryption(password);
    writer.start_file(name, options).unwrap();
    writer.write_all(content).unwrap();
    writer.finish().unwrap();
}

/// Config with small paced chunks so running attempts stay observable
fn test_config(temp_dir: &TempDir, max_concurrent: usize) -> Config {
    Config {
        scheduler: SchedulerConfig {
            max_concurrent,
            max_password_attempts: 3,
        },
        extraction: ExtractionConfig {
            chunk_size: 256,
            chunk_pacing: Some(Duration::from_millis(5)),
            checkpoint_interval: Duration::ZERO,
            checkpoint_min_bytes: 0,
            ..Default::default()
        },
        persistence: PersistenceConfig {
            checkpoint_dir: temp_dir.path().join("checkpoints"),
        },
    }
}

fn create_test_queue(max_concurrent: usize) -> (ExtractionQueue, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let queue = ExtractionQueue::from_config(test_config(&temp_dir, max_concurrent)).unwrap();
    (queue, temp_dir)
}

/// Zip archive `<name>.zip` holding one entry of `len` bytes; returns (archive, destination)
fn archive_fixture(temp_dir: &TempDir, name: &str, len: usize) -> (PathBuf, PathBuf) {
    let archive = temp_dir.path().join(format!("{name}.zip"));
    create_zip(&archive, &format!("{name}.bin"), &payload(len));
    (archive, temp_dir.path().join("out").join(name))
}

async fn wait_for<F>(queue: &ExtractionQueue, id: TaskId, mut done: F) -> Task
where
    F: FnMut(&Task) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(task) = queue.task(id).await
                && done(&task)
            {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting on task {id}"))
}

async fn wait_for_state(queue: &ExtractionQueue, id: TaskId, state: TaskState) -> Task {
    wait_for(queue, id, |t| t.state == state).await
}

/// Drain every event currently buffered
fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn started_order(events: &[Event]) -> Vec<TaskId> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::StateChanged {
                id,
                to: TaskState::Running,
                ..
            } => Some(*id),
            _ => None,
        })
        .collect()
}
