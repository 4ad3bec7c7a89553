//! Opt-in log output for the SDK (behind the `trace` feature).
//!
//! The SDK emits structured `tracing` events throughout; host programs that
//! already run a subscriber see them automatically. This helper is for
//! programs without one.

use tracing_subscriber::EnvFilter;

/// Install a global subscriber for SDK logs.
///
/// `RUST_LOG` wins when set; otherwise SDK output defaults to `info`, or
/// `debug` when `verbose` is true. Calling this when a subscriber is already
/// installed is a no-op.
pub fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "lucidic=debug" } else { "lucidic=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
