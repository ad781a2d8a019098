use crate::scheduling::config::ReconnectConfig;
use std::time::Duration;

/// Reconnect delay schedule: `fast_attempts` retries at `fast_delay_ms`,
/// then `base_delay_ms * factor^n` capped at `max_delay_ms`.
#[derive(Debug, Clone)]
pub struct Backoff {
    cfg: ReconnectConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(cfg: ReconnectConfig) -> Self {
        Self { cfg, attempt: 0 }
    }

    #[inline]
    pub fn on_success(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt, or None once `max_retries` is used up
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.cfg.max_retries {
            if self.attempt >= max {
                return None;
            }
        }

        let delay = if self.attempt < self.cfg.fast_attempts {
            self.cfg.fast_delay_ms
        } else {
            let exponent = (self.attempt - self.cfg.fast_attempts + 1) as i32;
            let exp = self.cfg.base_delay_ms as f64 * self.cfg.factor.powi(exponent);
            exp.min(self.cfg.max_delay_ms as f64) as u64
        };
        self.attempt = self.attempt.saturating_add(1);
        Some(Duration::from_millis(delay))
    }
}
