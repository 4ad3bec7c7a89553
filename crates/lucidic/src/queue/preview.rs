//! Size-adaptive payload previews for blob offload.
//!
//! When a payload is offloaded, the `events` POST carries a compact preview
//! in its place. The preview is a display aid only; the full payload lives
//! in the blob.

use crate::types::EventPayload;
use serde_json::{Map, Value, json};

const TRUNCATE_AT: usize = 200;

fn truncate(text: &str) -> String {
    text.chars().take(TRUNCATE_AT).collect()
}

fn truncate_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(truncate(s)),
        Value::Null => Value::Null,
        other => Value::String(truncate(&other.to_string())),
    }
}

fn truncate_opt(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::String(truncate(s)),
        None => Value::Null,
    }
}

/// Build the inline preview for an offloaded payload.
pub fn build(payload: &EventPayload) -> Value {
    match payload {
        EventPayload::LlmGeneration(p) => {
            let messages: Vec<Value> = p
                .request
                .messages
                .iter()
                .take(5)
                .map(|message| match message {
                    Value::Object(map) => {
                        let compressed: Map<String, Value> = map
                            .iter()
                            .map(|(k, v)| (k.clone(), truncate_value(v)))
                            .collect();
                        Value::Object(compressed)
                    }
                    other => truncate_value(other),
                })
                .collect();

            let mut usage = Map::new();
            if let Some(n) = p.usage.input_tokens {
                usage.insert("input_tokens".into(), json!(n));
            }
            if let Some(n) = p.usage.output_tokens {
                usage.insert("output_tokens".into(), json!(n));
            }
            if let Some(cost) = p.usage.cost {
                usage.insert("cost".into(), json!(cost));
            }

            json!({
                "request": {
                    "model": truncate_opt(&p.request.model),
                    "provider": truncate_opt(&p.request.provider),
                    "messages": messages,
                },
                "usage": usage,
                "response": {
                    "output": p.response.output.as_ref().map(truncate_value).unwrap_or(Value::Null),
                },
            })
        }
        EventPayload::FunctionCall(p) => {
            let arguments = match &p.arguments {
                Some(Value::Object(map)) => Value::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), truncate_value(v)))
                        .collect(),
                ),
                Some(other) => truncate_value(other),
                None => Value::Null,
            };
            json!({
                "function_name": truncate_opt(&p.function_name),
                "arguments": arguments,
            })
        }
        EventPayload::ErrorTraceback(p) => json!({ "error": truncate_opt(&p.error) }),
        EventPayload::Generic(p) => json!({
            "details": p.details.as_ref().map(truncate_value).unwrap_or(Value::Null),
        }),
    }
}

/// Fallback preview when construction fails.
pub fn unavailable() -> Value {
    json!({ "details": "preview_unavailable" })
}
