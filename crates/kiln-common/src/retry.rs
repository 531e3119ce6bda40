//! Conflict retries for read-modify-write cycles on cluster objects
//!
//! The sync engine and the status controllers write the same objects without
//! a shared lock. A writer that loses the resourceVersion race re-reads the
//! object and re-applies its change; it never overwrites the winner.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::Error;

/// Bounds of a retry loop
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = unbounded)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::conflict()
    }
}

impl RetryConfig {
    /// A handful of quick attempts, enough to outlast a concurrent writer
    pub fn conflict() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }

    fn backoff(&self) -> Backoff<'_> {
        Backoff {
            config: self,
            attempt: 0,
            delay: self.initial_delay,
        }
    }
}

/// Yields the jittered delay before each retry, `None` once attempts run out
struct Backoff<'a> {
    config: &'a RetryConfig,
    attempt: u32,
    delay: Duration,
}

impl Iterator for Backoff<'_> {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.config.max_attempts > 0 && self.attempt >= self.config.max_attempts {
            return None;
        }
        // 0.5x to 1.5x
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let current = Duration::from_secs_f64(self.delay.as_secs_f64() * jitter);
        self.delay = Duration::from_secs_f64(
            (self.delay.as_secs_f64() * self.config.backoff_multiplier)
                .min(self.config.max_delay.as_secs_f64()),
        );
        Some(current)
    }
}

/// Run a read-modify-write operation, repeating it only on `Error::Conflict`
///
/// The closure must re-read the object on every call. Any other error, and
/// the last conflict once attempts run out, is returned as is.
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut backoff = config.backoff();
    loop {
        let err = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_conflict() => e,
            Err(e) => return Err(e),
        };
        let Some(delay) = backoff.next() else {
            warn!(operation = %operation_name, error = %err, "Still conflicting, giving up");
            return Err(err);
        };
        debug!(
            operation = %operation_name,
            delay_ms = delay.as_millis(),
            "Lost optimistic-concurrency race, re-reading"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
        }
    }

    /// Fails with a conflict `conflicts` times, then succeeds
    fn racing_writer(
        calls: Arc<AtomicU32>,
        conflicts: u32,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<u32, Error>> + Send>>
    {
        move || {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= conflicts {
                    Err(Error::conflict("ModelTraining", "t1"))
                } else {
                    Ok(n)
                }
            })
        }
    }

    #[test]
    fn backoff_grows_up_to_the_cap_and_stops() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            backoff_multiplier: 2.0,
        };
        let delays: Vec<_> = config.backoff().collect();
        assert_eq!(delays.len(), 3);
        for d in &delays {
            assert!(*d >= Duration::from_millis(50) && *d <= Duration::from_millis(450));
        }
    }

    #[tokio::test]
    async fn first_write_wins_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = retry_on_conflict(&fast(5), "update", racing_writer(calls.clone(), 0)).await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Story: the sync engine and the status controller race on the same
    /// object; the loser re-reads and succeeds on the next attempt.
    #[tokio::test]
    async fn story_conflict_is_retried_until_the_write_lands() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = retry_on_conflict(&fast(5), "update", racing_writer(calls.clone(), 2)).await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_conflict_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), Error> = retry_on_conflict(&fast(5), "update", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::not_found("ModelTraining", "t1"))
            }
        })
        .await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn conflict_retries_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = retry_on_conflict(&fast(3), "update", racing_writer(calls.clone(), 10)).await;
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
