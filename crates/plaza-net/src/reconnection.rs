//! Caller-side reconnection with exponential backoff.
//!
//! [`ConnectionManager`](crate::ConnectionManager) never retries on its own.
//! The composition root owns a [`ReconnectScheduler`], arms it when the
//! manager reports a failure, polls it every tick, and calls
//! [`retry`](crate::ConnectionManager::retry) when it comes due.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{info, warn};

/// Configuration for client-side reconnection behaviour.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnection attempt. Default: 1 s.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Maximum delay between reconnection attempts. Default: 30 s.
    pub max_delay: Duration,
    /// Maximum number of reconnection attempts before giving up. Default: 20.
    pub max_attempts: u32,
    /// Jitter factor (0.0 to 1.0), applied as ±jitter to the delay. Default: 0.25.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 20,
            jitter: 0.25,
        }
    }
}

/// Tracks reconnection attempt count and computes the next backoff delay.
#[derive(Debug)]
pub struct ReconnectState {
    config: ReconnectConfig,
    attempts: u32,
    current_delay: Duration,
}

impl ReconnectState {
    /// Create a new state from the given config.
    pub fn new(config: ReconnectConfig) -> Self {
        let initial = config.initial_delay;
        Self {
            config,
            attempts: 0,
            current_delay: initial,
        }
    }

    /// Compute the next delay and advance the attempt counter.
    /// Returns `None` once max attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            return None;
        }

        let base = self.current_delay;
        self.attempts += 1;

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let jittered = if jitter > 0.0 {
            let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
            base.mul_f64(factor)
        } else {
            base
        };

        let next = self.current_delay.mul_f64(self.config.backoff_multiplier);
        self.current_delay = next.min(self.config.max_delay);

        Some(jittered.min(self.config.max_delay))
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = self.config.initial_delay;
    }

    /// Number of attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Errors produced by the reconnection scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    /// All configured attempts were used without success.
    #[error("maximum reconnection attempts ({attempts}) exhausted")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
}

/// Tick-driven retry timer on top of [`ReconnectState`].
#[derive(Debug)]
pub struct ReconnectScheduler {
    state: ReconnectState,
    due_at: Option<Instant>,
}

impl ReconnectScheduler {
    /// Create an idle scheduler.
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            state: ReconnectState::new(config),
            due_at: None,
        }
    }

    /// Arm the next attempt after a failure observed at `now`.
    pub fn on_failure(&mut self, now: Instant) -> Result<Duration, ReconnectError> {
        match self.state.next_delay() {
            Some(delay) => {
                info!(attempt = self.state.attempts(), ?delay, "scheduling reconnection");
                self.due_at = Some(now + delay);
                Ok(delay)
            }
            None => {
                let attempts = self.state.attempts();
                warn!(attempts, "giving up on reconnection");
                self.due_at = None;
                Err(ReconnectError::Exhausted { attempts })
            }
        }
    }

    /// Returns `true` exactly once when the armed attempt comes due.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.due_at {
            Some(due) if now >= due => {
                self.due_at = None;
                true
            }
            _ => false,
        }
    }

    /// Whether an attempt is armed.
    pub fn is_armed(&self) -> bool {
        self.due_at.is_some()
    }

    /// Clear the backoff after the connection came up.
    pub fn on_connected(&mut self) {
        if self.state.attempts() > 0 {
            info!(attempts = self.state.attempts(), "reconnected");
        }
        self.state.reset();
        self.due_at = None;
    }

    /// Disarm without resetting the attempt count.
    pub fn cancel(&mut self) {
        self.due_at = None;
    }

    /// Attempts made since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.state.attempts()
    }
}
