//! Global time base, per-file timestamp correction and real-time pacing.

use std::time::{Duration, Instant};

use crate::rational::{Rational, rescale_q};

/// Ticks per second of the global time base.
pub const TIME_BASE: i64 = 1_000_000;

pub const TIME_BASE_Q: Rational = Rational(1, TIME_BASE as i32);

pub fn to_global(ts: i64, time_base: Rational) -> i64 {
    rescale_q(ts, time_base, TIME_BASE_Q)
}

pub fn from_global(ts: i64, time_base: Rational) -> i64 {
    rescale_q(ts, TIME_BASE_Q, time_base)
}

/// Corrected presentation time in seconds: `(pts + ts_offset) / TIME_BASE`.
pub fn sync_seconds(pts: i64, ts_offset: i64) -> f64 {
    (pts + ts_offset) as f64 / TIME_BASE as f64
}

/// Returns the jump when a packet's dts (global base) lands further than
/// `threshold_secs` from the predicted next timestamp.
pub fn detect_discontinuity(dts: i64, next_pts: Option<i64>, threshold_secs: i64) -> Option<i64> {
    let next_pts = next_pts?;
    let delta = dts - next_pts;
    if delta.unsigned_abs() > threshold_secs.unsigned_abs().saturating_mul(TIME_BASE as u64) {
        Some(delta)
    } else {
        None
    }
}

/// Holds reads back so a file input is consumed no faster than real time.
#[derive(Debug, Default)]
pub struct RateEmulator {
    anchor: Option<(Instant, i64)>,
}

impl RateEmulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long to wait before `pts` (global base) is due. The first call
    /// anchors the stream clock to the wall clock.
    pub fn delay(&mut self, pts: i64, now: Instant) -> Option<Duration> {
        let (start, first_pts) = *self.anchor.get_or_insert((now, pts));
        let due = Duration::from_micros((pts - first_pts).max(0) as u64);
        let elapsed = now.saturating_duration_since(start);
        due.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    pub fn pace(&mut self, pts: i64) {
        if let Some(delay) = self.delay(pts, Instant::now()) {
            std::thread::sleep(delay);
        }
    }
}
