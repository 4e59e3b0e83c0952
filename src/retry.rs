use crate::error::Result;
use log::{debug, warn};
use std::time::Duration;
use tokio::time::sleep;

pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Short schedule used for outbound Telegram calls; they are
    /// best-effort, so the total wait stays short relative to the poll
    /// interval.
    pub fn for_gateway(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    config: RetryConfig,
    operation_name: &str,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_error = None;
    let mut delay = config.base_delay;

    for attempt in 1..=config.max_attempts {
        debug!(
            "Attempting operation '{}' (attempt {}/{})",
            operation_name, attempt, config.max_attempts
        );

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("Operation '{operation_name}' succeeded on attempt {attempt}");
                }
                return Ok(result);
            }
            Err(error) => {
                warn!("Operation '{operation_name}' failed on attempt {attempt}: {error}");

                if !error.is_retryable() {
                    warn!("Error is not retryable, stopping attempts");
                    return Err(error);
                }

                last_error = Some(error);

                if attempt < config.max_attempts {
                    debug!("Waiting {delay:?} before next attempt");
                    sleep(delay).await;

                    delay = std::cmp::min(
                        Duration::from_millis(
                            (delay.as_millis() as f64 * config.backoff_multiplier) as u64,
                        ),
                        config.max_delay,
                    );
                }
            }
        }
    }

    let final_error = last_error.unwrap();
    warn!(
        "Operation '{}' failed after {} attempts: {}",
        operation_name, config.max_attempts, final_error
    );
    Err(final_error)
}
