//! Wall-clock abstraction
//!
//! Fix staleness and the anchor capture window are judged against "now". The [SystemClock] reads the
//! real time; the [ManualClock] is advanced explicitly when replaying recorded logs or in tests. The
//! [MonotonicClock] reads wall time once and then advances with the tokio timer, so that capture
//! deadlines and timer sleeps agree (including under paused test time).
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Source of the current time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Real time from the system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to. Clones share the same underlying time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}
impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        ManualClock {
            now: Arc::new(AtomicI64::new(start_ms)),
        }
    }
    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}
impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Wall time fixed at construction, advanced by the tokio monotonic clock.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin_ms: i64,
    origin: tokio::time::Instant,
}
impl MonotonicClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now().timestamp_millis())
    }
    pub fn starting_at(origin_ms: i64) -> Self {
        MonotonicClock {
            origin_ms,
            origin: tokio::time::Instant::now(),
        }
    }
}
impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
impl Clock for MonotonicClock {
    fn now_ms(&self) -> i64 {
        self.origin_ms + self.origin.elapsed().as_millis() as i64
    }
}
