//! Function-call instrumentation as a bounded scope.
//!
//! The dynamic-language decorator becomes a scope guard here: entering the
//! scope mints the event id and binds it as the current parent, so events
//! emitted by the body attach underneath; leaving the scope emits ONE
//! immutable `function_call` event carrying the argument snapshot, the
//! return value when one was recorded, and the measured duration. A failure
//! additionally emits an `error_traceback` sibling. There is no update
//! protocol.

use crate::builder::EventParams;
use crate::client::Client;
use crate::context::{self, ParentBinding};
use crate::types::EventKind;
use serde_json::{Value, json};
use std::time::Instant;
use uuid::Uuid;

/// RAII scope for a `function_call` event.
///
/// Emission happens on drop, on every exit path. If the thread is panicking
/// and no error was recorded, a generic error sibling is emitted so the
/// failure is not lost.
pub struct EventScope {
    client: Client,
    event_id: Uuid,
    parent: Option<Uuid>,
    function_name: String,
    arguments: Value,
    return_value: Option<Value>,
    error: Option<String>,
    started: Instant,
    // Dropped explicitly before emission so the emitted event resolves the
    // outer parent, not itself.
    binding: Option<ParentBinding>,
}

impl EventScope {
    pub(crate) fn enter(client: Client, function_name: &str, arguments: Value) -> Self {
        let event_id = Uuid::new_v4();
        let parent = context::current_parent_event_id();
        let binding = context::bind_parent(event_id);
        Self {
            client,
            event_id,
            parent,
            function_name: function_name.to_string(),
            arguments,
            return_value: None,
            error: None,
            started: Instant::now(),
            binding: Some(binding),
        }
    }

    /// The client event id minted for this scope.
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// Record the function's return value.
    pub fn record_return<T: serde::Serialize>(&mut self, value: &T) {
        self.return_value = serde_json::to_value(value).ok();
    }

    /// Record a failure; an `error_traceback` sibling is emitted on drop.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }
}

impl Drop for EventScope {
    fn drop(&mut self) {
        // Restore the outer parent before emitting.
        self.binding.take();

        if self.error.is_none() && std::thread::panicking() {
            self.error = Some("panicked".to_string());
        }

        let duration = self.started.elapsed().as_secs_f64();
        emit_function_call(
            &self.client,
            self.event_id,
            self.parent,
            &self.function_name,
            self.arguments.take(),
            self.return_value.take(),
            duration,
        );

        if let Some(error) = self.error.take() {
            emit_error_sibling(&self.client, self.parent, error);
        }
    }
}

pub(crate) fn emit_function_call(
    client: &Client,
    event_id: Uuid,
    parent: Option<Uuid>,
    function_name: &str,
    arguments: Value,
    return_value: Option<Value>,
    duration: f64,
) {
    let mut params = EventParams::new(EventKind::FunctionCall)
        .event_id(event_id)
        .duration(duration)
        .field("function_name", json!(function_name))
        .field("arguments", arguments);
    if let Some(parent) = parent {
        params = params.parent_event_id(parent);
    }
    if let Some(return_value) = return_value {
        params = params.field("return_value", return_value);
    }
    client.create_event(params);
}

pub(crate) fn emit_error_sibling(client: &Client, parent: Option<Uuid>, error: String) {
    let mut params = EventParams::new(EventKind::ErrorTraceback).field("error", json!(error));
    if let Some(parent) = parent {
        params = params.parent_event_id(parent);
    }
    client.create_event(params);
}

/// Best-effort text for a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked".to_string()
    }
}
