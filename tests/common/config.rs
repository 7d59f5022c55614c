//! Test configuration helpers for creating queues over temporary directories

use std::time::Duration;
use tempfile::TempDir;
use unpack_queue::config::{ExtractionConfig, PersistenceConfig, SchedulerConfig};
use unpack_queue::{Config, ExtractionQueue};

/// Configuration with small, paced chunks and a checkpoint after every chunk
///
/// Pacing keeps attempts running long enough for pause/cancel to land mid-stream.
pub fn test_config(temp_dir: &TempDir, max_concurrent: usize) -> Config {
    Config {
        scheduler: SchedulerConfig {
            max_concurrent,
            ..Default::default()
        },
        extraction: ExtractionConfig {
            chunk_size: 512,
            chunk_pacing: Some(Duration::from_millis(2)),
            checkpoint_interval: Duration::ZERO,
            checkpoint_min_bytes: 0,
            ..Default::default()
        },
        persistence: PersistenceConfig {
            checkpoint_dir: temp_dir.path().join("checkpoints"),
        },
    }
}

/// Create a queue with default handlers whose checkpoints live in `temp_dir`
pub fn create_test_queue(temp_dir: &TempDir, max_concurrent: usize) -> ExtractionQueue {
    ExtractionQueue::from_config(test_config(temp_dir, max_concurrent))
        .expect("test config should be valid")
}
