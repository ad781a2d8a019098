use colored::Colorize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{TickError, TickResult};

struct StopState {
    stopped: AtomicBool,
    parent: Option<Arc<StopState>>,
}

impl StopState {
    fn is_set(&self) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return true;
        }
        match &self.parent {
            Some(parent) => parent.is_set(),
            None => false,
        }
    }
}

/// Cooperative cancellation handle for [`Engine::run`](crate::Engine::run).
///
/// Cloning is cheap and every clone observes the same flag. The flag is set
/// at most once; it is never reset. A [`child`](StopFlag::child) also reads
/// as set once its parent is, but setting the child leaves the parent alone.
#[derive(Clone)]
pub struct StopFlag {
    state: Arc<StopState>,
}

impl Default for StopFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StopFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopFlag")
            .field("is_set", &self.is_set())
            .finish()
    }
}

impl StopFlag {
    pub fn new() -> Self {
        Self {
            state: Arc::new(StopState {
                stopped: AtomicBool::new(false),
                parent: None,
            }),
        }
    }

    /// Flag that stops with `self` and can also be stopped on its own
    pub fn child(&self) -> Self {
        Self {
            state: Arc::new(StopState {
                stopped: AtomicBool::new(false),
                parent: Some(Arc::clone(&self.state)),
            }),
        }
    }

    /// Request a stop. Returns true only for the call that actually set it.
    #[inline]
    pub fn set(&self) -> bool {
        !self.state.stopped.swap(true, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.state.is_set()
    }

    /// Sleep until `deadline`, waking every `poll` to check the flag.
    /// Returns false if the flag was observed set.
    pub fn sleep_until(&self, deadline: Instant, poll: Duration) -> bool {
        let poll = poll.max(Duration::from_micros(100));
        loop {
            if self.is_set() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(poll));
        }
    }
}

/// Route SIGINT/SIGTERM to `flag`. Can only be installed once per process.
pub fn install_signal_handler(flag: &StopFlag) -> TickResult<()> {
    let flag = flag.clone();
    ctrlc::set_handler(move || {
        if flag.set() {
            eprintln!("{}", "\nCtrl+C received! Stopping tickgraph engine...".red());
        }
    })
    .map_err(|e| TickError::Other(format!("failed to install signal handler: {}", e)))
}
