//! Retry logic with exponential backoff
//!
//! Each task's attempts are tracked by a [`RetryStateMachine`]:
//!
//! ```text
//! Pending -> InFlight -> Succeeded
//!               |
//!               +-> Retrying -> InFlight -> ...
//!               |
//!               +-> Failed
//! ```
//!
//! The machine decides whether a failure is retried and how long to wait, so
//! retry counts and backoff intervals can be inspected and tested without
//! running any I/O.
//!
//! # Example
//!
//! ```
//! use drpg::config::RetryConfig;
//! use drpg::retry::{AttemptState, RetryStateMachine};
//! use std::time::Duration;
//!
//! let config = RetryConfig {
//!     max_attempts: 1,
//!     initial_delay: Duration::from_millis(10),
//!     jitter: false,
//!     ..RetryConfig::default()
//! };
//! let mut machine = RetryStateMachine::new(&config);
//! machine.start_attempt();
//! assert!(matches!(machine.record_failure(true), AttemptState::Retrying { .. }));
//! machine.start_attempt();
//! assert!(matches!(machine.record_failure(true), AttemptState::Failed { attempts: 2 }));
//! ```

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::{CatalogError, TaskError};

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, server busy, connection reset) return `true`.
/// Permanent failures (authentication failed, disk full, missing file) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for CatalogError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            CatalogError::Transient(_) | CatalogError::RateLimited(_)
        )
    }
}

impl IsRetryable for TaskError {
    fn is_retryable(&self) -> bool {
        match self {
            TaskError::Catalog(e) => e.is_retryable(),
            // A corrupt or truncated download is fetched again
            TaskError::ChecksumMismatch { .. } | TaskError::SizeMismatch { .. } => true,
            TaskError::Timeout(_) => true,
            TaskError::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            TaskError::Cancelled => false,
        }
    }
}

/// Lifecycle of a task's attempts
#[derive(Clone, Debug, PartialEq)]
pub enum AttemptState {
    /// No attempt started yet
    Pending,
    /// Attempt number `attempt` (1-based) is running
    InFlight {
        /// Current attempt number
        attempt: u32,
    },
    /// Attempt `attempt` failed; the next one starts after `delay`
    Retrying {
        /// Attempt number that failed
        attempt: u32,
        /// Backoff before the next attempt
        delay: Duration,
    },
    /// An attempt succeeded
    Succeeded {
        /// Attempts used
        attempts: u32,
    },
    /// Gave up: permanent error or retries exhausted
    Failed {
        /// Attempts used
        attempts: u32,
    },
}

impl AttemptState {
    /// Whether no further attempts will be made
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Succeeded { .. } | AttemptState::Failed { .. }
        )
    }
}

/// Per-task retry bookkeeping
#[derive(Debug)]
pub struct RetryStateMachine<'a> {
    config: &'a RetryConfig,
    state: AttemptState,
    attempts: u32,
    next_delay: Duration,
}

impl<'a> RetryStateMachine<'a> {
    /// New machine in the `Pending` state
    pub fn new(config: &'a RetryConfig) -> Self {
        Self {
            config,
            state: AttemptState::Pending,
            attempts: 0,
            next_delay: config.initial_delay,
        }
    }

    /// Current state
    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    /// Attempts started so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// `Pending | Retrying -> InFlight`
    pub fn start_attempt(&mut self) -> &AttemptState {
        debug_assert!(!self.state.is_terminal(), "attempt started after completion");
        self.attempts += 1;
        self.state = AttemptState::InFlight {
            attempt: self.attempts,
        };
        &self.state
    }

    /// `InFlight -> Succeeded`
    pub fn record_success(&mut self) -> &AttemptState {
        if self.attempts > 1 {
            tracing::info!(attempts = self.attempts, "Operation succeeded after retry");
        }
        self.state = AttemptState::Succeeded {
            attempts: self.attempts,
        };
        &self.state
    }

    /// `InFlight -> Retrying | Failed`
    ///
    /// A retryable failure moves to `Retrying` while retries remain; the first
    /// attempt does not count against `max_attempts`.
    pub fn record_failure(&mut self, retryable: bool) -> &AttemptState {
        let retries_used = self.attempts.saturating_sub(1);
        if retryable && retries_used < self.config.max_attempts {
            let delay = if self.config.jitter {
                add_jitter(self.next_delay)
            } else {
                self.next_delay
            };
            self.state = AttemptState::Retrying {
                attempt: self.attempts,
                delay,
            };
            self.next_delay = next_backoff(self.config, self.next_delay);
        } else {
            self.state = AttemptState::Failed {
                attempts: self.attempts,
            };
        }
        &self.state
    }
}

/// Delay before retry number `retry` (1-based), without jitter
pub fn backoff_delay(config: &RetryConfig, retry: u32) -> Duration {
    let mut delay = config.initial_delay;
    for _ in 1..retry {
        delay = next_backoff(config, delay);
    }
    delay
}

fn next_backoff(config: &RetryConfig, delay: Duration) -> Duration {
    let next = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
    next.min(config.max_delay)
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay,
/// so the actual delay lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
