//! # Exponential Backoff
//!
//! Provides a doubling backoff for retrying reconciliations that failed with a
//! transient error (throttled provider, unavailable provider, write conflict).
//!
//! The delay starts at a configured minimum, doubles after every failure and is
//! capped at a configured maximum. State is kept per pod so that one pod failing
//! repeatedly never slows down retries of another.
//!
//! ## Usage
//!
//! ```rust
//! use pod_secret_controller::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(5));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(4));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
//! ```

use std::time::Duration;

/// Exponential backoff calculator
///
/// Each call to [`ExponentialBackoff::next_backoff`] returns the current delay and
/// doubles it for the next call, saturating at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Initial delay (for reset)
    min: Duration,
    /// Delay returned by the next call
    current: Duration,
    /// Upper bound on any returned delay
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new backoff starting at `min` and capped at `max`
    ///
    /// A `min` larger than `max` is clamped down to `max`.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.min(max);
        Self {
            min,
            current: min,
            max,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.min;
    }
}
