//! Bounded exponential backoff for transient publish failures

use std::future::Future;
use std::time::Duration;

use billing_common::PublishError;
use rand::Rng;
use tracing::debug;

/// Configuration for retry behavior
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try
    pub max_retries: u32,
    /// Backoff before the first retry
    pub initial_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Fraction of the backoff added as random jitter (0-1)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (0-based), without jitter
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let millis = self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi(retry as i32);
        Duration::from_millis(millis.min(self.max_backoff.as_millis() as f64) as u64)
    }

    fn jittered(&self, backoff: Duration) -> Duration {
        let jitter_range = (backoff.as_millis() as f64 * self.jitter_factor) as u64;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };
        backoff.saturating_add(Duration::from_millis(jitter))
    }
}

/// Run `operation`, retrying transient publish errors with backoff.
///
/// Permanent errors and the error of the final attempt are returned as-is.
pub async fn with_retry<F, Fut, T>(mut operation: F, config: &RetryConfig) -> Result<T, PublishError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PublishError>>,
{
    let mut retry = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if !error.is_transient() || retry >= config.max_retries {
                    return Err(error);
                }

                let sleep_duration = config.jittered(config.backoff_for(retry));
                debug!(
                    retry = retry + 1,
                    max_retries = config.max_retries,
                    backoff_ms = sleep_duration.as_millis() as u64,
                    error = %error,
                    "Retrying publish"
                );
                tokio::time::sleep(sleep_duration).await;
                retry += 1;
            }
        }
    }
}
