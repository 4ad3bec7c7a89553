//! Configuration for the Lucidic SDK.
//!
//! Settings resolve in three layers: caller-supplied overrides beat
//! environment variables, which beat built-in defaults. Validation reports
//! every problem at once.

use crate::masking::Masker;
use secrecy::SecretString;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default backend root.
pub const DEFAULT_BASE_URL: &str = "https://backend.lucidic.ai/api";

/// Backend root used when `LUCIDIC_DEBUG` is set (local development server).
pub const DEBUG_BASE_URL: &str = "http://localhost:8000/api";

/// What `enqueue` does when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Drop the incoming item. Preserves the causal prefix already accepted
    /// and avoids orphaning children of accepted parents.
    #[default]
    DropNewest,
    /// Drop the oldest queued item to make room.
    DropOldest,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop_newest" | "newest" => Ok(OverflowPolicy::DropNewest),
            "drop_oldest" | "oldest" => Ok(OverflowPolicy::DropOldest),
            other => Err(format!("unknown overflow policy: {other}")),
        }
    }
}

/// SDK configuration container.
#[derive(Debug, Clone)]
pub struct SdkConfig {
    /// API key for authentication; required.
    pub api_key: Option<SecretString>,
    /// Tenant identifier; required for session creation.
    pub agent_id: Option<String>,
    /// Backend root URL.
    pub base_url: String,

    /// Request timeout.
    pub timeout: Duration,
    /// Maximum retries for transient HTTP failures.
    pub max_retries: u32,
    /// Initial retry delay in seconds; doubles per attempt.
    pub backoff_factor: f64,
    /// Idle connections kept per host.
    pub pool_size: usize,
    /// Upper bound on pooled connections.
    pub pool_max: usize,

    /// Payloads strictly larger than this many bytes are offloaded to blob
    /// storage. Minimum 1024.
    pub blob_threshold: usize,

    /// Batch window for the event queue.
    pub flush_interval: Duration,
    /// Batch size that triggers an immediate flush.
    pub flush_at: usize,
    /// Queue capacity; enqueue applies the overflow policy beyond it.
    pub max_queue_size: usize,
    /// Concurrent dispatches per batch group.
    pub worker_count: usize,
    /// Re-enqueue items whose dispatch failed after in-line retries.
    pub retry_failed: bool,
    /// Behavior when the queue is full.
    pub overflow_policy: OverflowPolicy,

    /// End live sessions from the shutdown coordinator.
    pub auto_end: bool,
    /// Swallow SDK-internal errors on the hot path.
    pub suppress_errors: bool,
    /// Install SIGINT/SIGTERM listeners on first session registration.
    pub capture_signals: bool,
    /// Install a panic hook on first session registration.
    pub capture_panics: bool,

    /// Debug mode (switches the default base URL to localhost).
    pub debug: bool,
    /// Verbose logging.
    pub verbose: bool,

    /// Redaction hook applied to user-visible text fields.
    pub masking: Option<Masker>,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            agent_id: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_factor: 0.5,
            pool_size: 20,
            pool_max: 100,
            blob_threshold: 65536,
            flush_interval: Duration::from_millis(100),
            flush_at: 100,
            max_queue_size: 100_000,
            worker_count: 10,
            retry_failed: true,
            overflow_policy: OverflowPolicy::DropNewest,
            auto_end: true,
            suppress_errors: true,
            capture_signals: true,
            capture_panics: true,
            debug: false,
            verbose: false,
            masking: None,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
}

impl SdkConfig {
    /// Load configuration from environment variables over defaults.
    ///
    /// Recognized variables: `LUCIDIC_API_KEY`, `LUCIDIC_AGENT_ID`,
    /// `LUCIDIC_BASE_URL`, `LUCIDIC_TIMEOUT`, `LUCIDIC_MAX_RETRIES`,
    /// `LUCIDIC_BACKOFF_FACTOR`, `LUCIDIC_CONNECTION_POOL_SIZE`,
    /// `LUCIDIC_CONNECTION_POOL_MAXSIZE`, `LUCIDIC_BLOB_THRESHOLD`,
    /// `LUCIDIC_FLUSH_INTERVAL` (ms), `LUCIDIC_FLUSH_AT`,
    /// `LUCIDIC_MAX_QUEUE_SIZE`, `LUCIDIC_MAX_PARALLEL`,
    /// `LUCIDIC_RETRY_FAILED`, `LUCIDIC_OVERFLOW_POLICY`,
    /// `LUCIDIC_AUTO_END`, `LUCIDIC_SUPPRESS_ERRORS`,
    /// `LUCIDIC_CAPTURE_SIGNALS`, `LUCIDIC_CAPTURE_PANICS`,
    /// `LUCIDIC_DEBUG`, `LUCIDIC_VERBOSE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.debug = env_bool("LUCIDIC_DEBUG").unwrap_or(config.debug);
        config.base_url = env::var("LUCIDIC_BASE_URL").unwrap_or_else(|_| {
            if config.debug {
                DEBUG_BASE_URL.to_string()
            } else {
                DEFAULT_BASE_URL.to_string()
            }
        });

        if let Ok(api_key) = env::var("LUCIDIC_API_KEY") {
            config.api_key = Some(SecretString::new(api_key.into_boxed_str()));
        }
        if let Ok(agent_id) = env::var("LUCIDIC_AGENT_ID") {
            config.agent_id = Some(agent_id);
        }

        if let Some(secs) = env_parse::<u64>("LUCIDIC_TIMEOUT") {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse("LUCIDIC_MAX_RETRIES") {
            config.max_retries = n;
        }
        if let Some(f) = env_parse("LUCIDIC_BACKOFF_FACTOR") {
            config.backoff_factor = f;
        }
        if let Some(n) = env_parse("LUCIDIC_CONNECTION_POOL_SIZE") {
            config.pool_size = n;
        }
        if let Some(n) = env_parse("LUCIDIC_CONNECTION_POOL_MAXSIZE") {
            config.pool_max = n;
        }
        if let Some(n) = env_parse("LUCIDIC_BLOB_THRESHOLD") {
            config.blob_threshold = n;
        }
        if let Some(ms) = env_parse::<u64>("LUCIDIC_FLUSH_INTERVAL") {
            config.flush_interval = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse("LUCIDIC_FLUSH_AT") {
            config.flush_at = n;
        }
        if let Some(n) = env_parse("LUCIDIC_MAX_QUEUE_SIZE") {
            config.max_queue_size = n;
        }
        if let Some(n) = env_parse("LUCIDIC_MAX_PARALLEL") {
            config.worker_count = n;
        }
        if let Some(policy) = env_parse("LUCIDIC_OVERFLOW_POLICY") {
            config.overflow_policy = policy;
        }

        config.retry_failed = env_bool("LUCIDIC_RETRY_FAILED").unwrap_or(config.retry_failed);
        config.auto_end = env_bool("LUCIDIC_AUTO_END").unwrap_or(config.auto_end);
        config.suppress_errors =
            env_bool("LUCIDIC_SUPPRESS_ERRORS").unwrap_or(config.suppress_errors);
        config.capture_signals =
            env_bool("LUCIDIC_CAPTURE_SIGNALS").unwrap_or(config.capture_signals);
        config.capture_panics = env_bool("LUCIDIC_CAPTURE_PANICS").unwrap_or(config.capture_panics);
        config.verbose = env_bool("LUCIDIC_VERBOSE").unwrap_or(config.verbose);

        config
    }

    /// Validate the configuration, returning every problem found.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.api_key.is_none() {
            errors.push("API key is required (LUCIDIC_API_KEY)".to_string());
        }
        if self.agent_id.is_none() {
            errors.push("Agent ID is required (LUCIDIC_AGENT_ID)".to_string());
        }
        if self.blob_threshold < 1024 {
            errors.push("Blob threshold must be at least 1024 bytes".to_string());
        }
        if self.worker_count == 0 {
            errors.push("Worker count must be at least 1".to_string());
        }
        if self.max_queue_size == 0 {
            errors.push("Max queue size must be at least 1".to_string());
        }

        errors
    }
}

/// Builder for [`SdkConfig`] with a fluent API. Unset fields fall back to
/// environment variables, then defaults.
#[derive(Debug, Default)]
pub struct SdkConfigBuilder {
    api_key: Option<String>,
    agent_id: Option<String>,
    base_url: Option<String>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    backoff_factor: Option<f64>,
    blob_threshold: Option<usize>,
    flush_interval: Option<Duration>,
    flush_at: Option<usize>,
    max_queue_size: Option<usize>,
    worker_count: Option<usize>,
    retry_failed: Option<bool>,
    overflow_policy: Option<OverflowPolicy>,
    auto_end: Option<bool>,
    suppress_errors: Option<bool>,
    capture_signals: Option<bool>,
    capture_panics: Option<bool>,
    debug: Option<bool>,
    verbose: Option<bool>,
    masking: Option<Masker>,
}

impl SdkConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the API key.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the agent (tenant) identifier.
    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Set the backend root URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the transient-failure retry budget.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the initial retry delay in seconds.
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = Some(factor);
        self
    }

    /// Set the blob offload threshold in bytes.
    pub fn blob_threshold(mut self, bytes: usize) -> Self {
        self.blob_threshold = Some(bytes);
        self
    }

    /// Set the queue batch window.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    /// Set the batch size that triggers a flush.
    pub fn flush_at(mut self, count: usize) -> Self {
        self.flush_at = Some(count);
        self
    }

    /// Set the queue capacity.
    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = Some(size);
        self
    }

    /// Set the dispatch concurrency.
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    /// Re-enqueue items that failed dispatch after in-line retries.
    pub fn retry_failed(mut self, retry: bool) -> Self {
        self.retry_failed = Some(retry);
        self
    }

    /// Set the queue overflow policy.
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = Some(policy);
        self
    }

    /// End live sessions on process shutdown.
    pub fn auto_end(mut self, auto_end: bool) -> Self {
        self.auto_end = Some(auto_end);
        self
    }

    /// Swallow SDK-internal errors on the hot path.
    pub fn suppress_errors(mut self, suppress: bool) -> Self {
        self.suppress_errors = Some(suppress);
        self
    }

    /// Install SIGINT/SIGTERM listeners.
    pub fn capture_signals(mut self, capture: bool) -> Self {
        self.capture_signals = Some(capture);
        self
    }

    /// Install a panic hook.
    pub fn capture_panics(mut self, capture: bool) -> Self {
        self.capture_panics = Some(capture);
        self
    }

    /// Enable debug mode.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Enable verbose logging.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    /// Set the redaction hook for user-visible text fields.
    pub fn masking<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.masking = Some(Masker::new(f));
        self
    }

    /// Resolve the final configuration: overrides over environment over
    /// defaults.
    pub fn build(self) -> SdkConfig {
        let mut config = SdkConfig::from_env();

        if let Some(api_key) = self.api_key {
            config.api_key = Some(SecretString::new(api_key.into_boxed_str()));
        }
        if let Some(agent_id) = self.agent_id {
            config.agent_id = Some(agent_id);
        }
        if let Some(base_url) = self.base_url {
            config.base_url = base_url;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(n) = self.max_retries {
            config.max_retries = n;
        }
        if let Some(f) = self.backoff_factor {
            config.backoff_factor = f;
        }
        if let Some(n) = self.blob_threshold {
            config.blob_threshold = n;
        }
        if let Some(interval) = self.flush_interval {
            config.flush_interval = interval;
        }
        if let Some(n) = self.flush_at {
            config.flush_at = n;
        }
        if let Some(n) = self.max_queue_size {
            config.max_queue_size = n;
        }
        if let Some(n) = self.worker_count {
            config.worker_count = n;
        }
        if let Some(b) = self.retry_failed {
            config.retry_failed = b;
        }
        if let Some(p) = self.overflow_policy {
            config.overflow_policy = p;
        }
        if let Some(b) = self.auto_end {
            config.auto_end = b;
        }
        if let Some(b) = self.suppress_errors {
            config.suppress_errors = b;
        }
        if let Some(b) = self.capture_signals {
            config.capture_signals = b;
        }
        if let Some(b) = self.capture_panics {
            config.capture_panics = b;
        }
        if let Some(b) = self.debug {
            config.debug = b;
        }
        if let Some(b) = self.verbose {
            config.verbose = b;
        }
        if self.masking.is_some() {
            config.masking = self.masking;
        }

        config
    }
}
