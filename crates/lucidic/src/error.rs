//! Error types for the Lucidic SDK.
//!
//! One taxonomy for the whole crate, following the status contract of the
//! backend: 401/403 are authentication failures, 402 is a quota failure,
//! transient 5xx statuses are retryable, everything else surfaces as an
//! operational error carrying the response body.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for operations that can fail with an SDK error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Lucidic SDK.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or incomplete configuration. Carries every problem found so
    /// a caller can fix them all at once. Raised at initialization and never
    /// suppressed.
    #[error("invalid configuration: {}", .0.join(", "))]
    Config(Vec<String>),

    /// Authentication failed (401 or 403).
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Quota exhausted (402).
    #[error("insufficient credits: {0}")]
    Quota(String),

    /// Backend returned a non-2xx status not covered above.
    #[error("backend request failed (status {status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body text
        message: String,
    },

    /// Network-level failure: the backend could not be reached.
    #[error("cannot reach backend: {0}")]
    Connection(String),

    /// Request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Blob upload to a presigned URL failed.
    #[error("blob upload failed: {0}")]
    BlobUpload(String),

    /// Prompt fetching or template substitution failed.
    #[error("prompt error: {0}")]
    Prompt(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors not covered by specific variants.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Map an HTTP response status and body to an error.
    pub fn from_response(status: u16, body: &str) -> Self {
        match status {
            401 => Error::Authentication(format!("401 Unauthorized: {body}")),
            402 => Error::Quota(format!("402 Payment Required: {body}")),
            403 => Error::Authentication(format!("403 Forbidden: {body}")),
            _ => Error::Api {
                status,
                message: body.to_string(),
            },
        }
    }

    /// Whether a fresh attempt could plausibly succeed. Only network
    /// failures, timeouts, and the transient gateway statuses qualify; 4xx
    /// never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connection(_) | Error::Timeout(_) => true,
            Error::Api { status, .. } => matches!(status, 502 | 503 | 504),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            Error::from_response(401, "no key"),
            Error::Authentication(_)
        ));
        assert!(matches!(
            Error::from_response(403, "bad key"),
            Error::Authentication(_)
        ));
        assert!(matches!(Error::from_response(402, "broke"), Error::Quota(_)));

        match Error::from_response(500, "boom") {
            Error::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("expected Api variant, got {other:?}"),
        }
    }

    #[rstest::rstest]
    #[case(502, true)]
    #[case(503, true)]
    #[case(504, true)]
    #[case(500, false)]
    #[case(400, false)]
    #[case(401, false)]
    #[case(429, false)]
    fn status_retryability(#[case] status: u16, #[case] retryable: bool) {
        assert_eq!(Error::from_response(status, "").is_retryable(), retryable);
    }

    #[test]
    fn non_status_retryability() {
        assert!(Error::Connection("refused".into()).is_retryable());
        assert!(Error::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(!Error::Config(vec!["missing".into()]).is_retryable());
        assert!(!Error::BlobUpload("failed".into()).is_retryable());
    }

    #[test]
    fn config_error_lists_all_problems() {
        let err = Error::Config(vec![
            "API key is required (LUCIDIC_API_KEY)".into(),
            "Agent ID is required (LUCIDIC_AGENT_ID)".into(),
        ]);
        let text = err.to_string();
        assert!(text.contains("LUCIDIC_API_KEY"));
        assert!(text.contains("LUCIDIC_AGENT_ID"));
    }
}
