//! Configuration for discovery and harvest runs.

use std::time::Duration;

/// Retry policy for transient per-request failures.
///
/// Attempts are bounded; backoff doubles per attempt up to a cap.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts before giving up (first try included). Default: 3.
    pub attempts: u32,

    /// Backoff before the second attempt. Default: 500ms.
    pub initial_backoff: Duration,

    /// Upper bound on any single backoff. Default: 10s.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a given attempt budget.
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            attempts,
            ..Default::default()
        }
    }

    /// Set the initial backoff.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Backoff to sleep after the given zero-based failed attempt.
    ///
    /// Doubles per attempt, capped at `max_backoff`.
    pub fn backoff_for(&self, failed_attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(failed_attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Configuration for Phase 1 identifier discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Search terms, one traversal each
    pub terms: Vec<String>,

    /// Ceiling on concurrent traversals.
    ///
    /// `None` runs one worker per term (the default, matching a
    /// one-letter search space of 26 workers).
    pub max_parallel: Option<usize>,

    /// Consecutive per-request failures tolerated within one traversal
    /// before it transitions to Failed. Default: 3.
    pub failure_budget: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self::letters()
    }
}

impl DiscoveryConfig {
    /// One traversal per letter of the alphabet.
    pub fn letters() -> Self {
        Self {
            terms: ('a'..='z').map(|c| c.to_string()).collect(),
            max_parallel: None,
            failure_budget: 3,
        }
    }

    /// One traversal per letter prefix of the given length.
    ///
    /// `prefixes(1)` equals `letters()`; `prefixes(2)` yields `aa..zz`.
    pub fn prefixes(len: usize) -> Self {
        let mut terms = vec![String::new()];
        for _ in 0..len.max(1) {
            terms = terms
                .iter()
                .flat_map(|p| ('a'..='z').map(move |c| format!("{p}{c}")))
                .collect();
        }
        Self {
            terms,
            max_parallel: None,
            failure_budget: 3,
        }
    }

    /// Use an explicit term list.
    pub fn with_terms(mut self, terms: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.terms = terms.into_iter().map(|t| t.into()).collect();
        self
    }

    /// Cap concurrent traversals.
    pub fn with_max_parallel(mut self, ceiling: usize) -> Self {
        self.max_parallel = Some(ceiling.max(1));
        self
    }

    /// Set the consecutive-failure budget per traversal.
    pub fn with_failure_budget(mut self, budget: u32) -> Self {
        self.failure_budget = budget;
        self
    }

    /// Effective worker count for this configuration.
    pub fn parallelism(&self) -> usize {
        let ceiling = self.max_parallel.unwrap_or(self.terms.len());
        ceiling.min(self.terms.len()).max(1)
    }
}

/// Configuration for Phase 2 record harvesting.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Bounded worker pool size. Default: 50.
    pub concurrency: usize,

    /// Per-identifier retry policy
    pub retry: RetryPolicy,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            concurrency: 50,
            retry: RetryPolicy::default(),
        }
    }
}

impl HarvestConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker pool size.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(0), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(20), Duration::from_secs(10));
    }

    #[test]
    fn test_letter_space() {
        let config = DiscoveryConfig::letters();
        assert_eq!(config.terms.len(), 26);
        assert_eq!(config.terms[0], "a");
        assert_eq!(config.parallelism(), 26);
    }

    #[test]
    fn test_prefix_space() {
        let config = DiscoveryConfig::prefixes(2);
        assert_eq!(config.terms.len(), 26 * 26);
        assert_eq!(config.terms[0], "aa");
        assert_eq!(config.terms[27], "bb");
    }

    #[test]
    fn test_parallelism_capped_by_ceiling_and_terms() {
        let config = DiscoveryConfig::letters().with_max_parallel(8);
        assert_eq!(config.parallelism(), 8);

        let small = DiscoveryConfig::letters().with_terms(["a", "b"]);
        assert_eq!(small.parallelism(), 2);
    }
}
