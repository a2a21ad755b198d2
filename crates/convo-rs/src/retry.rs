//! Automatic retry with exponential backoff and jitter.
//!
//! Nothing in the client retries on its own. Wrap a call in [`retry`] to
//! re-attempt failures that [`ChatError::is_retryable`] accepts (429, 5xx,
//! network errors). Caller mistakes and schema mismatches fail immediately.
//!
//! ```no_run
//! # async fn demo(client: &convo_rs::client::ChatClient) -> Result<(), convo_rs::ChatError> {
//! use convo_rs::retry::{RetryConfig, retry};
//!
//! let config = RetryConfig::with_retries(3);
//! let answer = retry(&config, || client.prompt().user("Tell me a joke").content()).await?;
//! println!("{answer}");
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::ChatError;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = no retries, just fail immediately).
    pub max_retries: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (typically 2.0 for exponential backoff).
    pub multiplier: f64,
    /// Each delay is scaled by a random factor in `1 - jitter ..= 1`.
    /// `0.0` disables jitter.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryConfig {
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let spread = self.jitter.clamp(0.0, 1.0);
        if spread > 0.0 {
            let factor = rand::thread_rng().gen_range(1.0 - spread..=1.0);
            Duration::from_secs_f64(capped * factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the retry
/// budget is spent. The last error is returned unchanged.
pub async fn retry<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, ChatError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChatError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < config.max_retries && e.is_retryable() => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "Transient API error (attempt {}/{}): {e}. Retrying in {delay:?}...",
                    attempt + 1,
                    config.max_retries,
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant(retries: u32) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::ZERO,
            ..RetryConfig::with_retries(retries)
        }
    }

    #[test]
    fn default_config_no_retries() {
        assert_eq!(RetryConfig::default().max_retries, 0);
    }

    #[test]
    fn delay_increases_exponentially() {
        let config = RetryConfig {
            jitter: 0.0,
            ..RetryConfig::with_retries(5)
        };
        let d0 = config.delay_for_attempt(0);
        let d1 = config.delay_for_attempt(1);
        let d2 = config.delay_for_attempt(2);

        assert!(d1 > d0, "d1={d1:?} should be > d0={d0:?}");
        assert!(d2 > d1, "d2={d2:?} should be > d1={d1:?}");
    }

    #[test]
    fn delay_capped_at_max() {
        let config = RetryConfig {
            jitter: 0.0,
            max_delay: Duration::from_secs(2),
            ..RetryConfig::with_retries(10)
        };
        assert!(config.delay_for_attempt(10) <= Duration::from_secs(2));
    }

    #[test]
    fn jitter_stays_within_spread() {
        let config = RetryConfig {
            jitter: 0.5,
            ..RetryConfig::with_retries(3)
        };
        let plain = RetryConfig {
            jitter: 0.0,
            ..RetryConfig::with_retries(3)
        }
        .delay_for_attempt(2);

        let delays: Vec<Duration> = (0..64).map(|_| config.delay_for_attempt(2)).collect();
        for d in &delays {
            assert!(*d <= plain, "{d:?} above {plain:?}");
            assert!(*d >= plain / 2, "{d:?} below half of {plain:?}");
        }
        assert!(
            delays.iter().any(|d| *d != delays[0]),
            "jitter never varied: {delays:?}"
        );
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry(&instant(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ChatError::upstream(Some(503), "unavailable"))
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(&instant(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ChatError::upstream(Some(401), "unauthorized"))
        })
        .await;
        assert!(matches!(
            result,
            Err(ChatError::Upstream {
                status: Some(401),
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(&instant(2), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ChatError::transport("timed out"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
