use std::time::Duration;
use chrono::Utc;

/// Time source for the sampling loop.
pub trait Clock {
    /// Seconds since the Unix epoch.
    fn now(&self) -> f64;

    fn sleep(&self, duration: Duration);

    /// Sleeps until the next whole second so samples land on integer ticks.
    fn sleep_to_next_second(&self) {
        let remainder = 1.0 - self.now().rem_euclid(1.0);
        self.sleep(Duration::from_secs_f64(remainder));
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
