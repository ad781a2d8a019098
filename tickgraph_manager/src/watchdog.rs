//! Software watchdog fed once per root tick
//!
//! Stands in for a hardware watchdog on hosts that have none: a monitor
//! thread reports when the root loop stops feeding for longer than the
//! timeout, and again when feeding resumes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tickgraph_core::StopFlag;

#[derive(Debug)]
struct WatchdogState {
    epoch: Instant,
    /// Milliseconds since `epoch` at the last feed
    last_fed_ms: AtomicU64,
    feeds: AtomicU64,
    expirations: AtomicU64,
}

impl WatchdogState {
    fn elapsed_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis().min(u64::MAX as u128) as u64
    }
}

/// Cheap handle handed to the engine's tick hook
#[derive(Debug, Clone)]
pub struct WatchdogFeeder {
    state: Arc<WatchdogState>,
}

impl WatchdogFeeder {
    pub fn feed(&self) {
        self.state
            .last_fed_ms
            .store(self.state.elapsed_ms(), Ordering::Release);
        self.state.feeds.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct Watchdog {
    state: Arc<WatchdogState>,
    halt: StopFlag,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Start monitoring. The monitor thread exits when `stop` (or this
    /// watchdog) is stopped.
    pub fn spawn(timeout: Duration, stop: &StopFlag) -> std::io::Result<Self> {
        let state = Arc::new(WatchdogState {
            epoch: Instant::now(),
            last_fed_ms: AtomicU64::new(0),
            feeds: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        });
        let halt = stop.child();
        let monitor_state = Arc::clone(&state);
        let monitor_halt = halt.clone();
        let thread = std::thread::Builder::new()
            .name("tg-watchdog".to_string())
            .spawn(move || monitor(&monitor_state, timeout, &monitor_halt))?;
        Ok(Self {
            state,
            halt,
            thread: Some(thread),
        })
    }

    pub fn feeder(&self) -> WatchdogFeeder {
        WatchdogFeeder {
            state: Arc::clone(&self.state),
        }
    }

    pub fn feeds(&self) -> u64 {
        self.state.feeds.load(Ordering::Relaxed)
    }

    /// Number of times the timeout elapsed without a feed
    pub fn expirations(&self) -> u64 {
        self.state.expirations.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.halt.set();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

fn monitor(state: &WatchdogState, timeout: Duration, halt: &StopFlag) {
    let timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
    let poll = (timeout / 4).max(Duration::from_millis(1));
    let mut expired = false;
    loop {
        if !halt.sleep_until(Instant::now() + poll, poll) {
            return;
        }
        let silent_ms = state
            .elapsed_ms()
            .saturating_sub(state.last_fed_ms.load(Ordering::Acquire));
        if silent_ms > timeout_ms {
            if !expired {
                expired = true;
                state.expirations.fetch_add(1, Ordering::Relaxed);
                tracing::error!("[Watchdog] root loop silent for {}ms", silent_ms);
            }
        } else if expired {
            expired = false;
            tracing::warn!("[Watchdog] root loop feeding again");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expires_only_while_starved() {
        let stop = StopFlag::new();
        let mut watchdog = Watchdog::spawn(Duration::from_millis(40), &stop).unwrap();
        let feeder = watchdog.feeder();

        for _ in 0..10 {
            feeder.feed();
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(watchdog.expirations(), 0);

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(watchdog.expirations(), 1);
        assert_eq!(watchdog.feeds(), 10);
        watchdog.stop();
    }

    #[test]
    fn test_parent_stop_ends_monitor() {
        let stop = StopFlag::new();
        let mut watchdog = Watchdog::spawn(Duration::from_millis(20), &stop).unwrap();
        stop.set();
        watchdog.stop();
        assert!(watchdog.thread.is_none());
    }
}
