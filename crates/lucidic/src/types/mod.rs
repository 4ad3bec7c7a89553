//! Wire types shared across the SDK.

pub mod event;
pub mod session;

pub use event::{
    ErrorTracebackPayload, EventKind, EventPayload, EventRequest, FunctionCallPayload,
    GenericPayload, LlmGenerationPayload, LlmRequest, LlmResponse, LlmUsage, QueuedEvent,
};
pub use session::{EndSessionParams, SessionParams};
