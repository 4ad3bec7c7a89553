//! Exponential backoff with optional jitter.

use super::strategy::BackoffStrategy;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff: `initial_delay * multiplier^attempt`, capped at
/// `max_delay`, with an optional jitter fraction to spread out retries.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    /// Create a new builder for configuring exponential backoff.
    pub fn builder() -> ExponentialBackoffBuilder {
        ExponentialBackoffBuilder::default()
    }
}

impl Default for ExponentialBackoff {
    /// Defaults: 3 retries, 250 ms initial delay, 60 s cap, doubling, no
    /// jitter.
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

#[async_trait]
impl BackoffStrategy for ExponentialBackoff {
    async fn execute<P, F, Fut, T, E>(&self, retryable: P, operation: F) -> Result<T, E>
    where
        P: Fn(&E) -> bool + Send + Sync,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: Send + 'static,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) if !retryable(&err) => return Err(err),
                Err(err) if attempt >= self.max_retries => return Err(err),
                Err(_) => {
                    if let Some(delay) = self.next_delay(attempt) {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);

        let jittered = if self.jitter > 0.0 {
            // Range is [base * (1 - jitter), base * (1 + jitter)].
            base + base * self.jitter * (rand::random::<f64>() - 0.5) * 2.0
        } else {
            base
        };

        Some(Duration::from_secs_f64(
            jittered.min(self.max_delay.as_secs_f64()).max(0.0),
        ))
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Builder for [`ExponentialBackoff`].
#[derive(Debug, Default)]
pub struct ExponentialBackoffBuilder {
    max_retries: Option<u32>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
}

impl ExponentialBackoffBuilder {
    /// Maximum number of retries after the initial attempt. Default: 3.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Delay before the first retry. Default: 250 ms.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Cap on the delay between retries. Default: 60 s.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Multiplier applied per attempt. Default: 2.0.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Jitter fraction in [0.0, 1.0]. Default: 0.0.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter.clamp(0.0, 1.0));
        self
    }

    /// Build the [`ExponentialBackoff`] instance.
    pub fn build(self) -> ExponentialBackoff {
        let defaults = ExponentialBackoff::default();
        ExponentialBackoff {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            initial_delay: self.initial_delay.unwrap_or(defaults.initial_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
            jitter: self.jitter.unwrap_or(defaults.jitter),
        }
    }
}
