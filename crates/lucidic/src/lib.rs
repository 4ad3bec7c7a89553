//! # Lucidic SDK
//!
//! Rust client SDK for the Lucidic agent observability backend:
//! - sessions grouping semantically typed events into causal trees
//! - a non-blocking event queue with batching, parent-before-child
//!   dispatch, blob offload for oversized payloads, retries, and deferral
//! - ambient context binding emissions to the right session and parent
//!   across threads and async tasks
//! - a shutdown coordinator that flushes and ends sessions on exit
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lucidic::{Client, SdkConfigBuilder, SessionParams, EventParams};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> lucidic::Result<()> {
//!     let client = Client::new(
//!         SdkConfigBuilder::new()
//!             .api_key("lk-...")
//!             .agent_id("my-agent")
//!             .build(),
//!     )?;
//!
//!     client.create_session(SessionParams::named("demo run")).await?;
//!
//!     let answer = client.observe("plan_step", json!({"goal": "demo"}), || {
//!         client.create_event(EventParams::generic("thinking"));
//!         42
//!     });
//!     assert_eq!(answer, 42);
//!
//!     client.end_session(lucidic::EndSessionParams::successful()).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// Re-export commonly used types
pub use builder::{EventBuilder, EventParams};
pub use client::Client;
pub use config::{OverflowPolicy, SdkConfig, SdkConfigBuilder};
pub use context::{
    SessionId, bind_parent, bind_session, current_parent_event_id, current_session_id,
    with_parent, with_session,
};
pub use error::{Error, Result};
pub use masking::Masker;
pub use queue::EventQueue;
pub use scope::EventScope;
pub use types::{EndSessionParams, EventKind, EventPayload, EventRequest, SessionParams};

// Module declarations
pub mod builder;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod masking;
#[cfg(feature = "trace")]
pub mod observability;
pub mod queue;
pub mod resources;
pub mod scope;
pub mod shutdown;
pub mod types;

/// Prelude module for common imports
///
/// ```rust
/// use lucidic::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Client, EndSessionParams, Error, EventKind, EventParams, Result, SdkConfig,
        SdkConfigBuilder, SessionParams,
    };
}

/// SDK version, taken from Cargo.toml; also advertised in the User-Agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
