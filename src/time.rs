//! Millisecond time base.
//!
//! The firmware counts milliseconds in a 32-bit tick that wraps after about
//! 49.7 days. [`Instant`] and [`Duration`] are `fugit` types over that tick;
//! [`elapsed`] is the one place where wrapping subtraction is defined, and
//! every engine measures time through it.

use portable_atomic::{AtomicU32, Ordering};

/// Point in time on the 1 kHz system tick.
pub type Instant = fugit::TimerInstantU32<1_000>;

/// Span of time on the 1 kHz system tick.
pub type Duration = fugit::MillisDurationU32;

/// Time elapsed from `since` to `now`, correct across a tick wraparound.
pub fn elapsed(now: Instant, since: Instant) -> Duration {
    Duration::from_ticks(now.ticks().wrapping_sub(since.ticks()))
}

/// Adds `step` to an accumulated duration, saturating instead of wrapping.
pub fn accumulate(total: Duration, step: Duration) -> Duration {
    Duration::from_ticks(total.ticks().saturating_add(step.ticks()))
}

/// Monotonic millisecond counter fed by a periodic timer.
///
/// The timer side only ever calls [`SystemClock::tick`]; the control loop only
/// ever reads [`SystemClock::now`]. Both are lock-free, so the counter can
/// live in a `static` shared with an interrupt handler or a high priority task.
pub struct SystemClock {
    millis: AtomicU32,
}

impl SystemClock {
    pub const fn new() -> Self {
        Self {
            millis: AtomicU32::new(0),
        }
    }

    /// Advances the counter by one millisecond.
    pub fn tick(&self) {
        self.millis.fetch_add(1, Ordering::Relaxed);
    }

    /// Current time.
    pub fn now(&self) -> Instant {
        Instant::from_ticks(self.millis.load(Ordering::Relaxed))
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}
