//! Reconnect backoff shared by the source and sink connectors

use std::time::Duration;

use crate::BackoffConfig;

/// Exponential backoff with a ceiling
///
/// The delay grows by `multiplier` after each failed attempt, is capped at
/// `max_ms`, and falls back to `initial_ms` once a connection stayed up for at
/// least `stable_after_ms`.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = Duration::from_millis(config.initial_ms);
        Self { config, current }
    }

    /// Delay to wait before the next attempt; advances the sequence
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let max_ms = self.config.max_ms.max(self.config.initial_ms);
        // In f64 milliseconds; the float-to-int cast saturates and NaN maps to 0
        let grown = self.current.as_millis() as f64 * self.config.multiplier.max(1.0);
        let next_ms = (grown.min(max_ms as f64) as u64).max(self.config.initial_ms);
        self.current = Duration::from_millis(next_ms);
        delay.min(Duration::from_millis(self.config.max_ms))
    }

    /// Current delay without advancing
    pub fn peek(&self) -> Duration {
        self.current
    }

    /// Reset to the minimum delay
    pub fn reset(&mut self) {
        self.current = Duration::from_millis(self.config.initial_ms);
    }

    /// Account for a finished connection that was up for `uptime`
    ///
    /// Returns true if the connection counted as stable and the delay was reset.
    pub fn session_ended(&mut self, uptime: Duration) -> bool {
        if uptime >= Duration::from_millis(self.config.stable_after_ms) {
            self.reset();
            true
        } else {
            false
        }
    }
}
