//! Retry strategies with exponential backoff.

mod exponential;
mod strategy;

pub use exponential::{ExponentialBackoff, ExponentialBackoffBuilder};
pub use strategy::BackoffStrategy;
