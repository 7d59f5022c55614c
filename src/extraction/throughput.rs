use std::collections::VecDeque;
use std::time::{Duration, Instant};

const MIN_ELAPSED: Duration = Duration::from_millis(1);

/// Sliding-window throughput estimator
///
/// Keeps `(instant, bytes)` samples and forgets those older than the window
/// before every computation, so the rate follows the recent pace rather than
/// the average since the start of the attempt.
#[derive(Debug)]
pub struct ThroughputWindow {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl ThroughputWindow {
    /// Create an estimator over a trailing `window`
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Record `bytes` processed now and return the current rate
    pub fn record(&mut self, bytes: u64) -> f64 {
        self.record_at(Instant::now(), bytes)
    }

    /// Record `bytes` processed at `now` and return the current rate in bytes/sec
    pub fn record_at(&mut self, now: Instant, bytes: u64) -> f64 {
        self.samples.push_back((now, bytes));
        self.rate_at(now)
    }

    /// Rate in bytes/sec over the samples still inside the window at `now`
    pub fn rate_at(&mut self, now: Instant) -> f64 {
        while let Some(&(at, _)) = self.samples.front() {
            if now.saturating_duration_since(at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        let Some(&(oldest, _)) = self.samples.front() else {
            return 0.0;
        };
        let bytes: u64 = self.samples.iter().map(|(_, b)| b).sum();
        let elapsed = now.saturating_duration_since(oldest).max(MIN_ELAPSED);
        bytes as f64 / elapsed.as_secs_f64()
    }
}

/// Seconds left at `rate`, absent when the rate is zero or the total unknown
pub fn eta_seconds(processed: u64, total: u64, rate: f64) -> Option<f64> {
    if total == 0 || rate <= 0.0 {
        return None;
    }
    Some(total.saturating_sub(processed) as f64 / rate)
}
