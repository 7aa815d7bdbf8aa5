//! Exponential backoff shared by storage writes and registry lookups.
//!
//! Backoff formula: min(max_delay, base_delay * 2^attempt) ± 25% jitter

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Configuration for exponential backoff retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry (default: 4s)
    pub base_delay: Duration,
    /// Maximum delay cap (default: 10s)
    pub max_delay: Duration,
    /// Total attempts, first one included (default: 5)
    pub max_attempts: u32,
    /// Whether to add jitter (randomness) to delays (default: true)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            jitter: true,
        }
    }

    /// Short, bounded policy for schema registry lookups.
    pub fn for_registry() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            max_attempts: 3,
            jitter: true,
        }
    }

    /// Backoff between failed broker polls.
    pub fn for_kafka() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            jitter: true,
        }
    }

    /// Disable jitter (for testing).
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Calculate the backoff delay before retry number `attempt` (0-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;

        let delay_ms = base_ms.saturating_mul(1u64 << attempt.min(20));
        let capped_delay_ms = delay_ms.min(max_ms);

        let final_delay_ms = if self.jitter {
            let jitter_range = capped_delay_ms / 4;
            let jitter = (std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos() as u64)
                % (jitter_range * 2 + 1);
            capped_delay_ms.saturating_sub(jitter_range) + jitter
        } else {
            capped_delay_ms
        };

        Duration::from_millis(final_delay_ms)
    }

    /// Run `op` until it succeeds, fails with an error `is_retryable`
    /// rejects, or `max_attempts` is reached.
    ///
    /// Returns the final error together with the number of attempts made.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        mut op: F,
        is_retryable: impl Fn(&E) -> bool,
    ) -> std::result::Result<T, (E, u32)>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !is_retryable(&e) || attempt >= max_attempts {
                        return Err((e, attempt));
                    }

                    let delay = self.calculate_delay(attempt - 1);
                    warn!(
                        operation = operation,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying with backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.base_delay, Duration::from_secs(4));
        assert_eq!(config.max_delay, Duration::from_secs(10));
        assert_eq!(config.max_attempts, 5);
        assert!(config.jitter);
    }

    #[test]
    fn test_calculate_delay_exponential() {
        let config = RetryConfig::new(Duration::from_millis(100), Duration::from_secs(30), 10)
            .without_jitter();

        assert_eq!(config.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_default_delays_cap_at_ten_seconds() {
        let config = RetryConfig::default().without_jitter();
        assert_eq!(config.calculate_delay(0), Duration::from_secs(4));
        assert_eq!(config.calculate_delay(1), Duration::from_secs(8));
        assert_eq!(config.calculate_delay(2), Duration::from_secs(10));
        assert_eq!(config.calculate_delay(3), Duration::from_secs(10));
    }

    #[test]
    fn test_calculate_delay_with_jitter() {
        let config = RetryConfig::new(Duration::from_millis(1000), Duration::from_secs(30), 10);

        let delay = config.calculate_delay(0);
        assert!(delay >= Duration::from_millis(750), "delay {:?}", delay);
        assert!(delay <= Duration::from_millis(1250), "delay {:?}", delay);
    }

    #[test]
    fn test_calculate_delay_handles_overflow() {
        let config = RetryConfig::new(Duration::from_secs(1), Duration::from_secs(30), 100)
            .without_jitter();
        assert_eq!(config.calculate_delay(50), Duration::from_secs(30));
        assert_eq!(config.calculate_delay(100), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_succeeds_after_transient_failures() {
        let config = RetryConfig::default().without_jitter();
        let calls = AtomicU32::new(0);

        let result: std::result::Result<u32, (String, u32)> = config
            .run(
                "test",
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 5 {
                            Err(format!("failure {}", attempt))
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(result.unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_gives_up_at_ceiling() {
        let config = RetryConfig::new(Duration::from_millis(10), Duration::from_millis(50), 3);
        let result: std::result::Result<(), (String, u32)> = config
            .run("test", |_| async { Err("down".to_string()) }, |_| true)
            .await;

        let (err, attempts) = result.unwrap_err();
        assert_eq!(err, "down");
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_non_retryable() {
        let config = RetryConfig::default();
        let calls = AtomicU32::new(0);
        let result: std::result::Result<(), (String, u32)> = config
            .run(
                "test",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("denied".to_string()) }
                },
                |_| false,
            )
            .await;

        assert_eq!(result.unwrap_err().1, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
