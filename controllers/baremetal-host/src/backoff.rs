//! # Fibonacci Backoff
//!
//! Requeue delays for hosts whose last operation failed. Delays grow along
//! the Fibonacci sequence in minutes (1m, 1m, 2m, 3m, 5m, 8m) and are capped,
//! which backs off more gently than doubling.

use std::time::Duration;

/// Shortest requeue delay after a failure, in minutes
pub const MIN_BACKOFF_MINUTES: u64 = 1;

/// Longest requeue delay after a failure, in minutes
pub const MAX_BACKOFF_MINUTES: u64 = 10;

/// Fibonacci backoff calculator
#[derive(Debug, Clone, Copy)]
pub struct FibonacciBackoff;

impl FibonacciBackoff {
    /// Delay for the given number of consecutive errors
    ///
    /// Error counts 0 and 1 both map to `min_minutes`; every following count
    /// is the sum of the previous two delays, capped at `max_minutes`.
    #[must_use]
    pub fn calculate_for_error_count(
        error_count: u32,
        min_minutes: u64,
        max_minutes: u64,
    ) -> Duration {
        let mut prev_minutes = min_minutes;
        let mut current_minutes = min_minutes;

        for _ in 2..=error_count {
            let next_minutes = prev_minutes + current_minutes;
            prev_minutes = current_minutes;
            current_minutes = next_minutes.min(max_minutes);
            if current_minutes >= max_minutes {
                break;
            }
        }

        Duration::from_secs(current_minutes.min(max_minutes) * 60)
    }

    /// Delay for a host's error count with the controller defaults
    #[must_use]
    pub fn for_host_errors(error_count: u32) -> Duration {
        Self::calculate_for_error_count(error_count, MIN_BACKOFF_MINUTES, MAX_BACKOFF_MINUTES)
    }
}
