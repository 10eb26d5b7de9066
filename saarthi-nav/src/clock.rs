//! Time sources and fixed-rate loop pacing.
//!
//! Every blocking wait in the control path goes through a [`Clock`], so tests
//! can swap in a [`ManualClock`] and run minutes of simulated waiting without
//! touching the wall clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::geometry::Time;

/// Injectable time source.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> Time;

    /// Block (or pretend to block) for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time with real sleeps.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Time {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Time(secs)
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Simulated clock: `sleep` advances time instantly.
///
/// Stored as nanoseconds so it can be shared across threads without a lock.
#[derive(Debug)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    /// Start at `start` seconds. Must be non-zero for lookups to work,
    /// since [`Time::ZERO`] means "latest".
    pub fn new(start: f64) -> Self {
        Self {
            nanos: AtomicU64::new((start * 1e9) as u64),
        }
    }

    pub fn shared(start: f64) -> Arc<Self> {
        Arc::new(Self::new(start))
    }

    pub fn advance(&self, duration: Duration) {
        self.nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Time {
        Time(self.nanos.load(Ordering::Acquire) as f64 / 1e9)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Fixed-rate loop pacing.
///
/// `sleep` waits until one period after the previous deadline. If the loop
/// has fallen behind by more than a full period the schedule is reset to now
/// instead of trying to catch up.
pub struct LoopRate {
    clock: Arc<dyn Clock>,
    period: Duration,
    last_deadline: Time,
}

impl LoopRate {
    pub fn new(hz: f64, clock: Arc<dyn Clock>) -> Self {
        let period = if hz > 0.0 {
            Duration::from_secs_f64(1.0 / hz)
        } else {
            Duration::ZERO
        };
        let last_deadline = clock.now();
        Self {
            clock,
            period,
            last_deadline,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleep for the rest of the current period.
    ///
    /// Returns `false` if the deadline had already passed (the tick overran).
    pub fn sleep(&mut self) -> bool {
        let period = self.period.as_secs_f64();
        let expected_end = self.last_deadline.as_secs() + period;
        let now = self.clock.now().as_secs();

        // Clock jumped backwards: restart the schedule
        if now < self.last_deadline.as_secs() {
            self.last_deadline = Time(now);
            return true;
        }

        if now < expected_end {
            self.clock.sleep(Duration::from_secs_f64(expected_end - now));
            self.last_deadline = Time(expected_end);
            return true;
        }

        if now > expected_end + period {
            self.last_deadline = Time(now);
        } else {
            self.last_deadline = Time(expected_end);
        }
        false
    }
}
