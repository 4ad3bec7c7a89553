//! Event envelope and typed payloads.
//!
//! Events are immutable once enqueued. The caller-facing API accepts
//! free-form fields; the builder normalizes them into one of the four typed
//! payloads below, with unrecognized keys collected in the `misc` bucket so
//! nothing a caller sends is silently lost.

use crate::context::SessionId;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The semantic kind of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A model generation: request, response, and usage accounting.
    LlmGeneration,
    /// A function invocation with arguments and return value.
    FunctionCall,
    /// An error with its traceback.
    ErrorTraceback,
    /// Anything else.
    Generic,
}

impl EventKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::LlmGeneration => "llm_generation",
            EventKind::FunctionCall => "function_call",
            EventKind::ErrorTraceback => "error_traceback",
            EventKind::Generic => "generic",
        }
    }
}

/// Request half of an LLM generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LlmRequest {
    /// Provider name (e.g. "openai", "anthropic").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Model identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Conversation messages as supplied by the caller.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub messages: Vec<Value>,
    /// Sampling and other request parameters.
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub params: Map<String, Value>,
}

/// Response half of an LLM generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LlmResponse {
    /// Primary output text or structure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Full response messages, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Value>,
    /// Tool calls requested by the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Value>,
    /// Extended thinking content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Value>,
    /// Raw provider response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

/// Token and cost accounting for an LLM generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LlmUsage {
    /// Input token count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    /// Output token count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    /// Cache accounting, provider-specific shape.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<Value>,
    /// Cost in dollars.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Payload of an `llm_generation` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LlmGenerationPayload {
    /// What was asked of the model.
    pub request: LlmRequest,
    /// What came back.
    pub response: LlmResponse,
    /// Token and cost accounting.
    pub usage: LlmUsage,
    /// Generation status (e.g. "succeeded", "failed").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Error text, when the generation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unrecognized caller-supplied keys.
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub misc: Map<String, Value>,
}

/// Payload of a `function_call` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FunctionCallPayload {
    /// Name of the invoked function.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    /// Argument snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    /// Return value, when the call completed normally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
    /// Unrecognized caller-supplied keys.
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub misc: Map<String, Value>,
}

/// Payload of an `error_traceback` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorTracebackPayload {
    /// Error display text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Formatted traceback or backtrace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    /// Unrecognized caller-supplied keys.
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub misc: Map<String, Value>,
}

/// Payload of a `generic` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenericPayload {
    /// Free-form details (the `description` field is accepted as an alias).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Unrecognized caller-supplied keys.
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub misc: Map<String, Value>,
}

/// Typed event payload, one variant per [`EventKind`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    /// `llm_generation`
    LlmGeneration(LlmGenerationPayload),
    /// `function_call`
    FunctionCall(FunctionCallPayload),
    /// `error_traceback`
    ErrorTraceback(ErrorTracebackPayload),
    /// `generic`
    Generic(GenericPayload),
}

impl EventPayload {
    /// The kind this payload belongs to.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::LlmGeneration(_) => EventKind::LlmGeneration,
            EventPayload::FunctionCall(_) => EventKind::FunctionCall,
            EventPayload::ErrorTraceback(_) => EventKind::ErrorTraceback,
            EventPayload::Generic(_) => EventKind::Generic,
        }
    }
}

/// The wire envelope POSTed to the `events` endpoint.
///
/// `needs_blob` is decided at dispatch time from the serialized payload
/// size, so it is not part of the immutable request; see
/// [`EventRequest::wire_body`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRequest {
    /// Owning session.
    pub session_id: SessionId,
    /// Client-minted event id, unique within the SDK's lifetime.
    pub client_event_id: Uuid,
    /// Client event id of the causal parent, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_parent_event_id: Option<Uuid>,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// When the event occurred (RFC 3339 with offset).
    pub occurred_at: DateTime<FixedOffset>,
    /// Duration in seconds, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Caller tags.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
    /// Free-form metadata map.
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub metadata: Map<String, Value>,
    /// Typed payload.
    pub payload: EventPayload,
}

impl EventRequest {
    /// Build the JSON body sent to the backend, with `needs_blob` set and,
    /// when offloading, the payload replaced by its preview.
    pub fn wire_body(
        &self,
        needs_blob: bool,
        preview: Option<Value>,
    ) -> crate::error::Result<Value> {
        let mut body = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut body {
            map.insert("needs_blob".to_string(), Value::Bool(needs_blob));
            if let Some(preview) = preview {
                map.insert("payload".to_string(), preview);
            }
        }
        Ok(body)
    }
}

/// An [`EventRequest`] plus queue bookkeeping. The counters never reach the
/// wire.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    /// The immutable event request.
    pub request: EventRequest,
    /// How many times dispatch was postponed waiting for the parent.
    pub defer_count: u32,
    /// How many times the whole item was re-enqueued after failed dispatch.
    pub retry_count: u32,
}

impl QueuedEvent {
    /// Wrap a freshly built request.
    pub fn new(request: EventRequest) -> Self {
        Self {
            request,
            defer_count: 0,
            retry_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_request() -> EventRequest {
        EventRequest {
            session_id: "sess-1".into(),
            client_event_id: Uuid::new_v4(),
            client_parent_event_id: None,
            kind: EventKind::Generic,
            occurred_at: DateTime::parse_from_rfc3339("2026-01-05T12:00:00+00:00").unwrap(),
            duration: None,
            tags: vec![],
            metadata: Map::new(),
            payload: EventPayload::Generic(GenericPayload {
                details: Some(json!("hello")),
                misc: Map::new(),
            }),
        }
    }

    #[test]
    fn kind_wire_names() {
        assert_eq!(
            serde_json::to_value(EventKind::LlmGeneration).unwrap(),
            json!("llm_generation")
        );
        assert_eq!(
            serde_json::to_value(EventKind::FunctionCall).unwrap(),
            json!("function_call")
        );
        assert_eq!(
            serde_json::to_value(EventKind::ErrorTraceback).unwrap(),
            json!("error_traceback")
        );
        assert_eq!(serde_json::to_value(EventKind::Generic).unwrap(), json!("generic"));
    }

    #[test]
    fn wire_body_without_offload() {
        let request = sample_request();
        let body = request.wire_body(false, None).unwrap();

        assert_eq!(body["type"], "generic");
        assert_eq!(body["needs_blob"], false);
        assert_eq!(body["payload"]["details"], "hello");
        assert_eq!(body["session_id"], "sess-1");
        assert!(body.get("defer_count").is_none());
        assert!(body.get("retry_count").is_none());
    }

    #[test]
    fn wire_body_with_preview() {
        let request = sample_request();
        let body = request
            .wire_body(true, Some(json!({"details": "hel"})))
            .unwrap();

        assert_eq!(body["needs_blob"], true);
        assert_eq!(body["payload"]["details"], "hel");
    }

    #[test]
    fn parent_field_spelling() {
        let mut request = sample_request();
        let parent = Uuid::new_v4();
        request.client_parent_event_id = Some(parent);

        let body = request.wire_body(false, None).unwrap();
        assert_eq!(body["client_parent_event_id"], json!(parent));
        assert!(body.get("parent_client_event_id").is_none());
    }

    #[test]
    fn occurred_at_keeps_offset() {
        let request = EventRequest {
            occurred_at: DateTime::parse_from_rfc3339("2026-01-05T07:00:00-05:00").unwrap(),
            ..sample_request()
        };
        let body = request.wire_body(false, None).unwrap();
        let stamp = body["occurred_at"].as_str().unwrap();
        assert!(stamp.ends_with("-05:00"), "offset lost: {stamp}");
    }
}
