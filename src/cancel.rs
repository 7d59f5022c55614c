//! Cooperative cancellation with a reason tag
//!
//! The scheduler and the extraction engine share a [`CancelHandle`]. The engine
//! polls [`CancelHandle::is_cancelled`] once per chunk; the scheduler reads
//! [`CancelHandle::reason`] after the attempt returns to decide whether the task
//! ends up paused or cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio_util::sync::CancellationToken;

/// Why an attempt was asked to stop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    /// User paused the task; it stays resumable
    Pause,
    /// User cancelled the task
    Cancel,
    /// A newer attempt replaced this one (retry or removal)
    Superseded,
}

impl CancelReason {
    fn to_u8(self) -> u8 {
        match self {
            CancelReason::Pause => 1,
            CancelReason::Cancel => 2,
            CancelReason::Superseded => 3,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(CancelReason::Pause),
            2 => Some(CancelReason::Cancel),
            3 => Some(CancelReason::Superseded),
            _ => None,
        }
    }
}

/// Shared cancellation signal for one extraction attempt
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    reason: Arc<AtomicU8>,
}

impl CancelHandle {
    /// Create a fresh, un-cancelled handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The first reason recorded wins.
    pub fn request(&self, reason: CancelReason) {
        let _ = self.reason.compare_exchange(
            0,
            reason.to_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.token.cancel();
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason given with the first request, if any
    pub fn reason(&self) -> Option<CancelReason> {
        CancelReason::from_u8(self.reason.load(Ordering::Acquire))
    }

    /// Underlying token, for `select!`-style waiting
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
