//! Retry policy for chain-pool block fetches.
//!
//! Adapted from the transaction-submission retry config used elsewhere in
//! this codebase, trimmed to the fetch path: no gas bumping, instead a
//! per-attempt "fetch strategy" decision (hash vs number, which endpoint).

use std::time::Duration;
use tracing::warn;

/// Fetch strategy for a given attempt: which endpoint index to use and
/// whether to fetch by hash or by number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    ByHash { endpoint: usize },
    ByNumber { endpoint: usize },
}

/// Block-fetch retry configuration (spec.md §4.1): up to 5 attempts,
/// exponential backoff from 1s capped at 10s; on the 2nd/4th attempt fall
/// back from hash-based to number-based fetch; on the 3rd attempt rotate to
/// a different endpoint.
#[derive(Debug, Clone)]
pub struct FetchRetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for FetchRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl FetchRetryConfig {
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(secs.min(self.max_backoff.as_secs_f64()))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Decide how attempt `attempt` (0-indexed) should be fetched, given
    /// `endpoint_count` available HTTP endpoints and whether the caller
    /// originally asked for a by-hash fetch.
    ///
    /// Attempt 0: endpoint 0, as requested (hash or number).
    /// Attempt 1 (2nd try) and attempt 3 (4th try): fall back to by-number.
    /// Attempt 2 (3rd try): rotate to the next endpoint.
    pub fn strategy_for_attempt(
        &self,
        attempt: u32,
        endpoint_count: usize,
        by_hash: bool,
    ) -> FetchStrategy {
        let endpoint_count = endpoint_count.max(1);
        let endpoint = if attempt >= 2 {
            (attempt as usize / 2) % endpoint_count
        } else {
            0
        };

        let use_hash = by_hash && attempt != 1 && attempt != 3;

        if use_hash {
            FetchStrategy::ByHash { endpoint }
        } else {
            FetchStrategy::ByNumber { endpoint }
        }
    }

    pub fn log_attempt_failed(&self, attempt: u32, endpoint: &str, error: &str) {
        warn!(
            attempt = attempt + 1,
            max = self.max_attempts,
            endpoint,
            error,
            "block fetch attempt failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_caps_at_10s() {
        let config = FetchRetryConfig::default();
        assert_eq!(config.backoff_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.backoff_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.backoff_for_attempt(3), Duration::from_secs(8));
        assert_eq!(config.backoff_for_attempt(4), Duration::from_secs(10)); // capped
    }

    #[test]
    fn test_should_retry_bounds() {
        let config = FetchRetryConfig::default();
        assert!(config.should_retry(0));
        assert!(config.should_retry(4));
        assert!(!config.should_retry(5));
    }

    #[test]
    fn test_second_attempt_falls_back_to_by_number() {
        let config = FetchRetryConfig::default();
        let strategy = config.strategy_for_attempt(1, 3, true);
        assert_eq!(strategy, FetchStrategy::ByNumber { endpoint: 0 });
    }

    #[test]
    fn test_fourth_attempt_falls_back_to_by_number() {
        let config = FetchRetryConfig::default();
        let strategy = config.strategy_for_attempt(3, 3, true);
        assert_eq!(strategy, FetchStrategy::ByNumber { endpoint: 1 });
    }

    #[test]
    fn test_third_attempt_rotates_endpoint() {
        let config = FetchRetryConfig::default();
        let strategy = config.strategy_for_attempt(2, 3, true);
        assert_eq!(strategy, FetchStrategy::ByHash { endpoint: 1 });
    }

    #[test]
    fn test_first_attempt_uses_requested_mode() {
        let config = FetchRetryConfig::default();
        assert_eq!(
            config.strategy_for_attempt(0, 3, true),
            FetchStrategy::ByHash { endpoint: 0 }
        );
        assert_eq!(
            config.strategy_for_attempt(0, 3, false),
            FetchStrategy::ByNumber { endpoint: 0 }
        );
    }
}
