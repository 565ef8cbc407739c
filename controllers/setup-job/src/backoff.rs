//! # Fibonacci Backoff
//!
//! Per-key requeue backoff for failed or conflicted reconciliations.
//! Grows more slowly than exponential backoff, so a job that keeps conflicting
//! is retried often at first without hammering the API server later.
//!
//! Sequence with the defaults: 1s, 1s, 2s, 3s, 5s, 8s ... 60s (max).

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at `max_seconds`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Previous backoff value in seconds
    prev_seconds: u64,
    /// Current backoff value in seconds
    current_seconds: u64,
    /// Maximum backoff value in seconds
    max_seconds: u64,
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(1, 60)
    }
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with minimum and maximum values in seconds
    ///
    /// # Arguments
    ///
    /// * `min_seconds` - Used for the first two values, typically 1
    /// * `max_seconds` - Caps the sequence, typically 60
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_seconds;
        let next = self.prev_seconds.saturating_add(self.current_seconds);
        self.prev_seconds = self.current_seconds;
        self.current_seconds = next.min(self.max_seconds);
        Duration::from_secs(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_sequence() {
        let mut backoff = FibonacciBackoff::new(1, 60);
        let seq: Vec<u64> = (0..10).map(|_| backoff.next_backoff().as_secs()).collect();
        assert_eq!(seq, vec![1, 1, 2, 3, 5, 8, 13, 21, 34, 55]);
        assert_eq!(backoff.next_backoff(), Duration::from_secs(60));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(60));
    }

    #[test]
    fn test_custom_bounds() {
        let mut backoff = FibonacciBackoff::new(2, 5);
        let seq: Vec<u64> = (0..5).map(|_| backoff.next_backoff().as_secs()).collect();
        assert_eq!(seq, vec![2, 2, 4, 5, 5]);
    }
}
