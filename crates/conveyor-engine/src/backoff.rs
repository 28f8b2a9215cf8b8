//! Exponential backoff with jitter for retry scheduling.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use conveyor_config::RetryConfig;
use rand::Rng;

/// Computes the delay before a job's next retry attempt.
///
/// `delay_ms = min(base * 2^attempt, max) + uniform(0, base)`. The
/// jitter term spreads out retries that failed in the same instant
/// (e.g. a downstream outage) so they don't all come back at once.
#[must_use]
pub fn delay_for_attempt(config: &RetryConfig, attempt: u32) -> ChronoDuration {
    let exponential = config.backoff_base_ms.saturating_mul(1u64 << attempt.min(32));
    let capped = exponential.min(config.backoff_max_ms);
    let jitter = if config.backoff_base_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..config.backoff_base_ms)
    };

    ChronoDuration::milliseconds((capped + jitter) as i64)
}

/// Convenience wrapper returning the absolute instant a retry should be
/// promoted at.
#[must_use]
pub fn next_run_at(config: &RetryConfig, attempt: u32) -> DateTime<Utc> {
    Utc::now() + delay_for_attempt(config, attempt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RetryConfig {
        RetryConfig {
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            poison_window_ms: 60_000,
            poison_threshold: 3,
        }
    }

    #[test]
    fn delay_grows_exponentially_before_the_cap() {
        let cfg = config();
        let d0 = delay_for_attempt(&cfg, 0).num_milliseconds();
        let d1 = delay_for_attempt(&cfg, 1).num_milliseconds();
        let d2 = delay_for_attempt(&cfg, 2).num_milliseconds();

        assert!((1000..2000).contains(&d0));
        assert!((2000..3000).contains(&d1));
        assert!((4000..5000).contains(&d2));
    }

    #[test]
    fn delay_is_capped_at_backoff_max() {
        let cfg = config();
        let d = delay_for_attempt(&cfg, 20).num_milliseconds();
        assert!(d < cfg.backoff_max_ms as i64 + cfg.backoff_base_ms as i64);
        assert!(d >= cfg.backoff_max_ms as i64);
    }

    #[test]
    fn zero_base_produces_no_jitter() {
        let cfg = RetryConfig {
            backoff_base_ms: 0,
            ..config()
        };
        assert_eq!(delay_for_attempt(&cfg, 3).num_milliseconds(), 0);
    }

    #[test]
    fn next_run_at_is_in_the_future() {
        let cfg = config();
        assert!(next_run_at(&cfg, 0) > Utc::now());
    }
}
