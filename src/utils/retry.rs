use std::time::Duration;
use tracing::{error, warn};

/// Retry an async operation with exponential backoff.
///
/// `should_retry` decides per error whether another attempt makes sense;
/// errors it rejects (e.g. a malformed query) are returned immediately.
pub async fn with_retry<F, Fut, T, E, P>(
    operation: F,
    retry_delay: u64,
    max_retries: u32,
    operation_name: &str,
    should_retry: P,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !should_retry(&err) {
                    return Err(err);
                }

                if attempt > max_retries {
                    error!(
                        "Operation '{}' failed after {} attempts: {}",
                        operation_name, max_retries, err
                    );
                    return Err(err);
                }

                let backoff = exponential_backoff(retry_delay, attempt);
                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {}ms",
                    operation_name, attempt, max_retries, err, backoff
                );

                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }
    }
}

/// Calculate exponential backoff with jitter
fn exponential_backoff(base_delay: u64, attempt: u32) -> u64 {
    let exponential = base_delay * (2_u64.pow(attempt.saturating_sub(1)));
    let max_delay = std::cmp::min(exponential, 60_000); // Cap at 60 seconds

    // Add jitter (±20%)
    let jitter = (rand::random::<f64>() * 0.4 - 0.2) * max_delay as f64;
    (max_delay as f64 + jitter) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_gives_up_when_predicate_rejects() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), String> = with_retry(
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("query failure".to_string())
            },
            1,
            5,
            "test_op",
            |_| false,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, String> = with_retry(
            || async {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(n)
                }
            },
            1,
            5,
            "test_op",
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        for attempt in 1..8 {
            let d = exponential_backoff(1000, attempt);
            // ±20% jitter around min(1000 * 2^(n-1), 60s)
            let base = std::cmp::min(1000 * 2_u64.pow(attempt - 1), 60_000) as f64;
            assert!(d as f64 >= base * 0.79 && d as f64 <= base * 1.21);
        }
    }
}
