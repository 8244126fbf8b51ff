use std::future::Future;
use std::time::Duration;

use rand::Rng;
use sched_config::SchedulerConfig;
use sched_schemas::SchedulerError;

/// Retries `op` with exponential backoff and jitter while it returns a
/// retryable ([`SchedulerError::is_retryable`]) error, per the retry policy
/// (base/factor/cap/max attempts are all configurable).
pub async fn with_retry<T, F, Fut>(config: &SchedulerConfig, mut op: F) -> Result<T, SchedulerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SchedulerError>>,
{
    let mut attempt = 0u32;
    let mut delay_ms = config.retry_base_ms;

    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt + 1 < config.retry_max_attempts => {
                attempt += 1;
                let jitter = rand::thread_rng().gen_range(0..=delay_ms / 4 + 1);
                let sleep_ms = (delay_ms + jitter).min(config.retry_cap_ms);
                tracing::warn!(attempt, sleep_ms, error = %e, "retrying transient operation");
                tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                delay_ms = ((delay_ms as f64) * config.retry_factor).round() as u64;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_errors_up_to_max_attempts() {
        let config = SchedulerConfig {
            retry_base_ms: 1,
            retry_cap_ms: 2,
            retry_max_attempts: 3,
            ..SchedulerConfig::default()
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), SchedulerError> = with_retry(&config, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SchedulerError::Transient("db hiccup".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let config = SchedulerConfig::default();
        let calls = AtomicU32::new(0);
        let result: Result<(), SchedulerError> = with_retry(&config, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SchedulerError::Permanent("bad input".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_retries() {
        let config = SchedulerConfig {
            retry_base_ms: 1,
            retry_cap_ms: 2,
            retry_max_attempts: 5,
            ..SchedulerConfig::default()
        };
        let calls = AtomicU32::new(0);
        let result = with_retry(&config, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(SchedulerError::Transient("db hiccup".into()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
    }
}
