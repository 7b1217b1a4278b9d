use std::thread;
use std::time::{Duration, Instant};

/// Monotonic time source shared by the cycle driver and the sampler.
///
/// Dwell timing is expressed against this trait so tests can drive a
/// multi-hour cooldown schedule without waiting for it.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Seconds elapsed since `epoch` as `f64`, saturating at 0.
    fn secs_since(&self, epoch: Instant) -> f64 {
        self.now().saturating_duration_since(epoch).as_secs_f64()
    }

    /// Time left until `deadline`, zero once it has passed.
    fn remaining(&self, deadline: Instant) -> Duration {
        deadline.saturating_duration_since(self.now())
    }
}

/// Wall-clock implementation backed by `std::time::Instant`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            thread::sleep(d);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_saturates_after_deadline() {
        let clock = MonotonicClock::new();
        let past = clock.now();
        thread::sleep(Duration::from_millis(2));
        assert_eq!(clock.remaining(past), Duration::ZERO);
        assert!(clock.secs_since(past) > 0.0);
    }
}
