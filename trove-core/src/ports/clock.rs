use chrono::Utc;
use std::fmt;

/// Wall clock in epoch milliseconds, used for buffer timestamps and due
/// scores.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Epoch clock that advances with the tokio clock, so paused-time tests see
/// buffer timestamps move in step with `tokio::time::sleep`.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin_ms: i64,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn starting_at(origin_ms: i64) -> Self {
        Self {
            origin_ms,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::starting_at(Utc::now().timestamp_millis())
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.started.elapsed().as_millis())
            .unwrap_or(i64::MAX);
        self.origin_ms.saturating_add(elapsed)
    }
}
