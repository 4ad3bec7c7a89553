//! Caller-supplied redaction of user-visible text fields.

use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::error;

/// Placeholder substituted when the redaction function itself fails.
pub const MASKING_FAILURE_PLACEHOLDER: &str = "<masked:error>";

/// Wrapper around a caller-supplied redaction function.
///
/// The function is applied to user-visible text before event construction.
/// A panicking redactor never propagates: the field is replaced with
/// [`MASKING_FAILURE_PLACEHOLDER`] and the failure is logged.
#[derive(Clone)]
pub struct Masker {
    redact: Arc<dyn Fn(&str) -> String + Send + Sync>,
}

impl std::fmt::Debug for Masker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Masker(..)")
    }
}

impl Masker {
    /// Wrap a redaction function.
    pub fn new<F>(redact: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            redact: Arc::new(redact),
        }
    }

    /// Redact a single text field.
    pub fn apply(&self, text: &str) -> String {
        let outcome = crate::shutdown::with_panic_shield(|| {
            catch_unwind(AssertUnwindSafe(|| (self.redact)(text)))
        });
        match outcome {
            Ok(masked) => masked,
            Err(_) => {
                error!("masking function panicked; substituting placeholder");
                MASKING_FAILURE_PLACEHOLDER.to_string()
            }
        }
    }

    /// Redact every string leaf of a JSON value in place.
    pub fn mask_json(&self, value: &mut Value) {
        match value {
            Value::String(s) => *s = self.apply(s),
            Value::Array(items) => {
                for item in items {
                    self.mask_json(item);
                }
            }
            Value::Object(map) => {
                for (_, v) in map.iter_mut() {
                    self.mask_json(v);
                }
            }
            _ => {}
        }
    }
}
