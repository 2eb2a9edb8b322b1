use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Run an async operation with exponential backoff.
///
/// The operation is attempted `retries + 1` times in total. The delay before
/// retry `n` (1-based) is `base_delay * 2^(n-1)`. The error from the final
/// attempt is returned unchanged so callers can decide whether it is fatal.
pub async fn retry_with_backoff<T, F, Fut>(
    retries: u32,
    base_delay: Duration,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt > retries {
                    return Err(e);
                }

                let delay = base_delay * 2u32.saturating_pow(attempt - 1);
                warn!(
                    "Attempt {}/{} failed: {} (retrying in {:?})",
                    attempt,
                    retries + 1,
                    e,
                    delay
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retrying() {
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42u32) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn permanent_failure_is_attempted_exactly_retries_plus_one_times() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = retry_with_backoff(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("boom") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(result.unwrap_err().to_string(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(3, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    anyhow::bail!("transient");
                }
                Ok("ok")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
