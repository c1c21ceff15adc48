//! The scheduler's own monotonic/wall-clock pair, mirroring the router's
//! clock contract but kept crate-local: the scheduler is an independent
//! process and shares no runtime state with the router.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Supplies the two time bases the scheduler needs.
pub trait Clock: Send {
    /// Strictly non-decreasing seconds since an arbitrary epoch. Drives
    /// interval-job cadence and the scheduler's own outbound heartbeat.
    fn monotonic(&self) -> Duration;

    /// Wall-clock "now", for cron evaluation only.
    fn wall_now(&self) -> DateTime<Utc>;
}

pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
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

    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    pub struct FakeClock {
        monotonic: Arc<Mutex<Duration>>,
        wall: Arc<Mutex<DateTime<Utc>>>,
    }

    impl FakeClock {
        pub fn new() -> Self {
            Self {
                monotonic: Arc::new(Mutex::new(Duration::ZERO)),
                wall: Arc::new(Mutex::new(Utc::now())),
            }
        }

        pub fn advance(&self, by: Duration) {
            *self.monotonic.lock().unwrap() += by;
            *self.wall.lock().unwrap() += chrono::Duration::from_std(by).unwrap();
        }
    }

    impl Clock for FakeClock {
        fn monotonic(&self) -> Duration {
            *self.monotonic.lock().unwrap()
        }

        fn wall_now(&self) -> DateTime<Utc> {
            *self.wall.lock().unwrap()
        }
    }
}
