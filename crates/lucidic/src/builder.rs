//! Normalization of caller-supplied fields into typed event payloads.
//!
//! The public surface accepts a free-form field map per event. The builder
//! pulls the keys each kind understands into the typed payload and collects
//! everything else in `misc`. It performs no I/O and no masking; given the
//! same inputs it produces the same request.

use crate::context::SessionId;
use crate::types::{
    ErrorTracebackPayload, EventKind, EventPayload, EventRequest, FunctionCallPayload,
    GenericPayload, LlmGenerationPayload, LlmRequest, LlmResponse, LlmUsage,
};
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Caller-facing parameters for creating an event.
#[derive(Debug, Clone)]
pub struct EventParams {
    /// Event kind.
    pub kind: EventKind,
    /// Explicit client event id; minted when absent.
    pub event_id: Option<Uuid>,
    /// Explicit session id; resolved from ambient context when absent.
    pub session_id: Option<SessionId>,
    /// Explicit parent event id; resolved from ambient context when absent.
    pub parent_event_id: Option<Uuid>,
    /// When the event occurred; stamped at creation when absent.
    pub occurred_at: Option<DateTime<FixedOffset>>,
    /// Duration in seconds.
    pub duration: Option<f64>,
    /// Tags.
    pub tags: Vec<String>,
    /// Free-form metadata.
    pub metadata: Map<String, Value>,
    /// Kind-specific fields, normalized by the builder.
    pub fields: Map<String, Value>,
}

impl EventParams {
    /// Start params for the given kind.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            event_id: None,
            session_id: None,
            parent_event_id: None,
            occurred_at: None,
            duration: None,
            tags: Vec::new(),
            metadata: Map::new(),
            fields: Map::new(),
        }
    }

    /// A `generic` event with its details text.
    pub fn generic(details: impl Into<String>) -> Self {
        Self::new(EventKind::Generic).field("details", Value::String(details.into()))
    }

    /// Supply an explicit client event id.
    pub fn event_id(mut self, id: Uuid) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Target a specific session instead of the ambient one.
    pub fn session_id(mut self, id: impl Into<SessionId>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Attach to a specific parent event.
    pub fn parent_event_id(mut self, id: Uuid) -> Self {
        self.parent_event_id = Some(id);
        self
    }

    /// Set the occurrence timestamp.
    pub fn occurred_at(mut self, at: DateTime<FixedOffset>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    /// Set a naive occurrence timestamp; it is stamped with the local
    /// offset.
    pub fn occurred_at_naive(mut self, at: NaiveDateTime) -> Self {
        let local = Local
            .from_local_datetime(&at)
            .earliest()
            .unwrap_or_else(|| Local.from_utc_datetime(&at));
        self.occurred_at = Some(local.fixed_offset());
        self
    }

    /// Set the duration in seconds.
    pub fn duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    /// Add a tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Add a kind-specific field.
    pub fn field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

/// Builds normalized [`EventRequest`]s from [`EventParams`].
pub struct EventBuilder;

impl EventBuilder {
    /// Assemble the envelope. Session, parent, id, and timestamp are already
    /// resolved by the caller; this function only shapes data.
    pub fn build(
        params: EventParams,
        session_id: SessionId,
        client_event_id: Uuid,
        client_parent_event_id: Option<Uuid>,
        occurred_at: DateTime<FixedOffset>,
    ) -> EventRequest {
        let payload = Self::normalize(params.kind, params.fields);
        EventRequest {
            session_id,
            client_event_id,
            client_parent_event_id,
            kind: params.kind,
            occurred_at,
            duration: params.duration,
            tags: params.tags,
            metadata: params.metadata,
            payload,
        }
    }

    fn normalize(kind: EventKind, fields: Map<String, Value>) -> EventPayload {
        match kind {
            EventKind::LlmGeneration => EventPayload::LlmGeneration(Self::llm(fields)),
            EventKind::FunctionCall => EventPayload::FunctionCall(Self::function_call(fields)),
            EventKind::ErrorTraceback => EventPayload::ErrorTraceback(Self::error(fields)),
            EventKind::Generic => EventPayload::Generic(Self::generic(fields)),
        }
    }

    fn llm(mut fields: Map<String, Value>) -> LlmGenerationPayload {
        let mut payload = LlmGenerationPayload::default();

        payload.request.provider = take_string(&mut fields, "provider");
        payload.request.model = take_string(&mut fields, "model");
        if let Some(messages) = fields.remove("messages") {
            payload.request.messages = match messages {
                Value::Array(items) => items,
                other => vec![other],
            };
        }
        if let Some(Value::Object(map)) = fields.remove("params") {
            payload.request.params = map;
        }

        payload.response.output = fields.remove("output");
        payload.response.messages = fields.remove("response_messages");
        payload.response.tool_calls = fields.remove("tool_calls");
        payload.response.thinking = fields.remove("thinking");
        payload.response.raw = fields.remove("raw");

        payload.usage = LlmUsage {
            input_tokens: take_u64(&mut fields, "input_tokens"),
            output_tokens: take_u64(&mut fields, "output_tokens"),
            cache: fields.remove("cache"),
            cost: take_f64(&mut fields, "cost"),
        };

        payload.status = take_string(&mut fields, "status");
        payload.error = take_string(&mut fields, "error");
        payload.misc = fields;
        payload
    }

    fn function_call(mut fields: Map<String, Value>) -> FunctionCallPayload {
        FunctionCallPayload {
            function_name: take_string(&mut fields, "function_name"),
            arguments: fields.remove("arguments"),
            return_value: fields.remove("return_value"),
            misc: fields,
        }
    }

    fn error(mut fields: Map<String, Value>) -> ErrorTracebackPayload {
        ErrorTracebackPayload {
            error: take_string(&mut fields, "error"),
            traceback: take_string(&mut fields, "traceback"),
            misc: fields,
        }
    }

    fn generic(mut fields: Map<String, Value>) -> GenericPayload {
        let details = fields
            .remove("details")
            .or_else(|| fields.remove("description"));
        GenericPayload {
            details,
            misc: fields,
        }
    }
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    fields.remove(key).map(|v| match v {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn take_u64(fields: &mut Map<String, Value>, key: &str) -> Option<u64> {
    match fields.get(key) {
        Some(v) if v.as_u64().is_some() => {
            let n = v.as_u64();
            fields.remove(key);
            n
        }
        _ => None,
    }
}

fn take_f64(fields: &mut Map<String, Value>, key: &str) -> Option<f64> {
    match fields.get(key) {
        Some(v) if v.as_f64().is_some() => {
            let n = v.as_f64();
            fields.remove(key);
            n
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::json;

    fn build(params: EventParams) -> EventRequest {
        EventBuilder::build(
            params,
            "sess-1".into(),
            Uuid::nil(),
            None,
            DateTime::parse_from_rfc3339("2026-01-05T12:00:00+00:00").unwrap(),
        )
    }

    #[test]
    fn llm_fields_land_in_typed_slots() {
        let params = EventParams::new(EventKind::LlmGeneration)
            .field("provider", json!("openai"))
            .field("model", json!("gpt-4o"))
            .field("messages", json!([{"role": "user", "content": "hi"}]))
            .field("params", json!({"temperature": 0.2}))
            .field("output", json!("hello"))
            .field("input_tokens", json!(12))
            .field("output_tokens", json!(34))
            .field("cost", json!(0.001))
            .field("custom_key", json!("custom"));

        let request = build(params);
        let EventPayload::LlmGeneration(payload) = request.payload else {
            panic!("expected llm payload");
        };
        assert_eq!(payload.request.provider.as_deref(), Some("openai"));
        assert_eq!(payload.request.model.as_deref(), Some("gpt-4o"));
        assert_eq!(payload.request.messages.len(), 1);
        assert_eq!(payload.request.params["temperature"], json!(0.2));
        assert_eq!(payload.response.output, Some(json!("hello")));
        assert_eq!(payload.usage.input_tokens, Some(12));
        assert_eq!(payload.usage.output_tokens, Some(34));
        assert_eq!(payload.usage.cost, Some(0.001));
        assert_eq!(payload.misc["custom_key"], json!("custom"));
    }

    #[test]
    fn single_message_becomes_list() {
        let params = EventParams::new(EventKind::LlmGeneration)
            .field("messages", json!({"role": "user", "content": "hi"}));
        let request = build(params);
        let EventPayload::LlmGeneration(payload) = request.payload else {
            panic!("expected llm payload");
        };
        assert_eq!(payload.request.messages.len(), 1);
    }

    #[test]
    fn function_call_normalization() {
        let params = EventParams::new(EventKind::FunctionCall)
            .field("function_name", json!("fetch"))
            .field("arguments", json!({"url": "https://example.com"}))
            .field("return_value", json!(200))
            .field("site", json!("internal"));

        let request = build(params);
        let EventPayload::FunctionCall(payload) = request.payload else {
            panic!("expected function_call payload");
        };
        assert_eq!(payload.function_name.as_deref(), Some("fetch"));
        assert_eq!(payload.arguments, Some(json!({"url": "https://example.com"})));
        assert_eq!(payload.return_value, Some(json!(200)));
        assert_eq!(payload.misc["site"], json!("internal"));
    }

    #[test]
    fn description_is_an_alias_for_details() {
        let params = EventParams::new(EventKind::Generic).field("description", json!("aliased"));
        let request = build(params);
        let EventPayload::Generic(payload) = request.payload else {
            panic!("expected generic payload");
        };
        assert_eq!(payload.details, Some(json!("aliased")));
        assert!(payload.misc.is_empty());
    }

    #[test]
    fn details_wins_over_description() {
        let params = EventParams::new(EventKind::Generic)
            .field("details", json!("primary"))
            .field("description", json!("secondary"));
        let request = build(params);
        let EventPayload::Generic(payload) = request.payload else {
            panic!("expected generic payload");
        };
        assert_eq!(payload.details, Some(json!("primary")));
    }

    #[test]
    fn non_string_error_is_stringified() {
        let params = EventParams::new(EventKind::ErrorTraceback).field("error", json!(42));
        let request = build(params);
        let EventPayload::ErrorTraceback(payload) = request.payload else {
            panic!("expected error payload");
        };
        assert_eq!(payload.error.as_deref(), Some("42"));
    }

    #[test]
    fn build_is_deterministic() {
        let make = || {
            build(
                EventParams::new(EventKind::Generic)
                    .field("details", json!("same"))
                    .field("extra", json!({"a": 1}))
                    .tag("t1")
                    .metadata("m", json!(true)),
            )
        };
        let a = serde_json::to_vec(&make()).unwrap();
        let b = serde_json::to_vec(&make()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn naive_timestamp_gets_local_offset() {
        let naive = NaiveDateTime::parse_from_str("2026-01-05 12:00:00", "%Y-%m-%d %H:%M:%S")
            .unwrap();
        let params = EventParams::generic("x").occurred_at_naive(naive);
        let stamped = params.occurred_at.unwrap();
        assert_eq!(stamped.naive_local(), naive);
    }
}
