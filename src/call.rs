//! Per-call deadline and cooperative cancellation.
//!
//! A [`CallContext`] travels with every blocking entry point (lock
//! acquisition, synchronous invoke, the resume loop). Waits check it between
//! sleeps; nothing is interrupted mid-operation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Longest single sleep while waiting, so cancellation is noticed promptly.
const WAIT_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl CallContext {
    /// Context without deadline; only explicit cancellation ends waits.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Derive a context sharing this one's cancellation with a deadline no
    /// later than `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            deadline: Some(deadline),
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// Cancelled or past the deadline.
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.is_expired()
    }

    /// Short human-readable reason for [`is_done`](Self::is_done).
    pub fn done_reason(&self) -> &'static str {
        if self.is_cancelled() {
            "cancelled"
        } else {
            "deadline exceeded"
        }
    }

    /// Bound `wait` by the remaining time.
    pub fn clamp(&self, wait: Duration) -> Duration {
        match self.remaining() {
            Some(left) => wait.min(left),
            None => wait,
        }
    }

    /// Sleep for up to `duration`, waking early on cancellation or deadline.
    ///
    /// Returns `false` when the context is done.
    pub fn sleep(&self, duration: Duration) -> bool {
        let until = Instant::now() + self.clamp(duration);
        loop {
            if self.is_done() {
                return false;
            }
            let now = Instant::now();
            if now >= until {
                return true;
            }
            thread::sleep((until - now).min(WAIT_SLICE));
        }
    }
}
