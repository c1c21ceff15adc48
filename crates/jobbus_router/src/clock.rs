//! Heartbeat clock: a monotonic "now" for timeouts, separate from wall time.
//!
//! Timeouts must never be affected by a wall-clock step backward (NTP
//! correction, DST, operator `date -s`); only [`Clock::monotonic`] feeds
//! liveness accounting. [`Clock::wall_timestamp`] exists purely for the
//! `HEARTBEAT` payload and is otherwise unused by the router.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Supplies the two time bases the router needs. Boxed as a trait object so
/// tests can substitute a fake clock without threading a generic parameter
/// through every registry.
pub trait Clock: Send {
    /// Strictly non-decreasing seconds since some arbitrary epoch. Used for
    /// HEARTBEAT_TIMEOUT and the periodic send/sweep cadence.
    fn monotonic(&self) -> Duration;

    /// Seconds since the Unix epoch. Used only for `HEARTBEAT` payload
    /// content; never compared against `monotonic()`.
    fn wall_timestamp(&self) -> u64;
}

/// Real clock backed by `Instant`/`SystemTime`.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic(&self) -> Duration {
        self.start.elapsed()
    }

    fn wall_timestamp(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Clock a test can advance explicitly through a cheap cloneable handle;
    /// monotonic and wall move in lockstep unless a test deliberately
    /// diverges them. `Arc<Mutex<_>>`-backed (not `Cell`) so a clone kept by
    /// the test can still advance the instance handed to the router.
    #[derive(Clone)]
    pub struct FakeClock {
        monotonic: Arc<Mutex<Duration>>,
        wall: Arc<Mutex<u64>>,
    }

    impl FakeClock {
        pub fn new() -> Self {
            Self {
                monotonic: Arc::new(Mutex::new(Duration::ZERO)),
                wall: Arc::new(Mutex::new(0)),
            }
        }

        pub fn advance(&self, by: Duration) {
            *self.monotonic.lock().unwrap() += by;
            *self.wall.lock().unwrap() += by.as_secs();
        }

        pub fn set_wall(&self, secs: u64) {
            *self.wall.lock().unwrap() = secs;
        }
    }

    impl Clock for FakeClock {
        fn monotonic(&self) -> Duration {
            *self.monotonic.lock().unwrap()
        }

        fn wall_timestamp(&self) -> u64 {
            *self.wall.lock().unwrap()
        }
    }
}
