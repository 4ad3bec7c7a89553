//! The retry strategy abstraction.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// A strategy for retrying failed async operations with backoff.
///
/// The caller supplies a predicate deciding whether a given error is worth
/// retrying; the strategy owns the delay schedule and the attempt budget.
///
/// # Examples
///
/// ```rust
/// use lucidic_core::retry::{BackoffStrategy, ExponentialBackoff};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), std::io::Error> {
/// let backoff = ExponentialBackoff::builder()
///     .max_retries(3)
///     .initial_delay(Duration::from_millis(250))
///     .build();
///
/// let value = backoff
///     .execute(|_err: &std::io::Error| true, || async { Ok::<_, std::io::Error>(42) })
///     .await?;
/// assert_eq!(value, 42);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait BackoffStrategy: Send + Sync {
    /// Run `operation` until it succeeds, the predicate rejects the error,
    /// or the attempt budget is exhausted. Returns the last error on failure.
    async fn execute<P, F, Fut, T, E>(&self, retryable: P, operation: F) -> Result<T, E>
    where
        P: Fn(&E) -> bool + Send + Sync,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: Send + 'static;

    /// Delay to sleep before retry number `attempt` (0-indexed after the
    /// first failure). `None` means retry immediately.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Maximum number of retries after the initial attempt.
    fn max_retries(&self) -> u32;
}
