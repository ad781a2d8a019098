use crate::scheduling::stop::StopFlag;
use std::time::{Duration, Instant};

/// Fixed-rate deadline clock with drift correction.
///
/// Deadlines advance by exactly one period from the previous deadline, not
/// from "now", so an overrunning tick is absorbed by the following waits and
/// the long-run average matches the configured rate. Once the lag exceeds
/// `max_catch_up` periods the clock re-anchors instead of bursting.
#[derive(Debug)]
pub struct TickClock {
    period: Duration,
    next: Instant,
    last: Option<Instant>,
    max_catch_up: u32,
    reanchors: u64,
}

impl TickClock {
    pub fn new(rate_hz: f64, max_catch_up: u32) -> Self {
        Self {
            period: period_from_hz(rate_hz),
            next: Instant::now(),
            last: None,
            max_catch_up,
            reanchors: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Number of times the clock gave up catching up
    pub fn reanchors(&self) -> u64 {
        self.reanchors
    }

    /// Mark the start of a tick and return the elapsed time since the previous one
    pub fn begin_tick(&mut self) -> Duration {
        let now = Instant::now();
        let dt = match self.last {
            Some(last) => now - last,
            None => self.period,
        };
        self.last = Some(now);
        dt
    }

    /// Advance the deadline and sleep until it. Returns false if `stop` was
    /// observed during the wait.
    pub fn wait_next(&mut self, stop: &StopFlag, poll: Duration) -> bool {
        self.next += self.period;
        let now = Instant::now();
        let limit = self.period * self.max_catch_up.max(1);
        if now > self.next && now - self.next > limit {
            log::debug!(
                "[Engine] loop lagging by {:?}, re-anchoring tick clock",
                now - self.next
            );
            self.next = now;
            self.reanchors += 1;
        }
        stop.sleep_until(self.next, poll)
    }
}

pub(crate) fn period_from_hz(hz: f64) -> Duration {
    if hz.is_finite() && hz > 0.0 {
        Duration::from_secs_f64(1.0 / hz)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_rate_holds_through_overrun() {
        let stop = StopFlag::new();
        let mut clock = TickClock::new(100.0, 5);
        let started = Instant::now();
        for i in 0..20 {
            clock.begin_tick();
            if i == 3 {
                // one 25 ms overrun at a 10 ms period
                std::thread::sleep(Duration::from_millis(25));
            }
            assert!(clock.wait_next(&stop, Duration::from_millis(2)));
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(195), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(300), "{:?}", elapsed);
        assert_eq!(clock.reanchors(), 0);
    }

    #[test]
    fn test_reanchors_after_long_stall() {
        let stop = StopFlag::new();
        let mut clock = TickClock::new(200.0, 2);
        clock.begin_tick();
        std::thread::sleep(Duration::from_millis(40));
        clock.wait_next(&stop, Duration::from_millis(1));
        assert_eq!(clock.reanchors(), 1);
    }

    #[test]
    fn test_wait_returns_false_when_stopped() {
        let stop = StopFlag::new();
        stop.set();
        let mut clock = TickClock::new(1.0, 3);
        assert!(!clock.wait_next(&stop, Duration::from_millis(1)));
    }
}
