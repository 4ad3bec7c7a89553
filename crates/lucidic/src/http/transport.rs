//! Authenticated request/response transport over a pooled reqwest client.

use crate::config::SdkConfig;
use crate::error::{Error, Result};
use bytes::Bytes;
use chrono::Utc;
use http::Method;
use lucidic_core::retry::{BackoffStrategy, ExponentialBackoff};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// HTTP transport for the backend API.
///
/// Cheap to clone; all clones share one connection pool. Obligations:
///
/// - attaches `Authorization: Api-Key <key>` and a `lucidic-sdk/<version>`
///   user agent to every request
/// - injects a server-observable `current_time` (RFC 3339 UTC) into POST and
///   PUT bodies
/// - retries transient failures (502/503/504 or network errors) with
///   exponential backoff; never retries 4xx
/// - maps statuses to the SDK error taxonomy
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    http: reqwest::Client,
    base_url: Url,
    api_key: SecretString,
    timeout: Duration,
    backoff: ExponentialBackoff,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("base_url", &self.inner.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Build a transport from a validated configuration.
    pub fn new(config: &SdkConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| Error::Config(vec!["API key is required (LUCIDIC_API_KEY)".into()]))?;

        let base_url: Url = config
            .base_url
            .trim_end_matches('/')
            .parse()
            .map_err(|e| Error::Config(vec![format!("invalid base URL: {e}")]))?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_size)
            .user_agent(format!("lucidic-sdk/{}", crate::VERSION))
            .build()
            .map_err(|e| Error::Connection(e.to_string()))?;

        let backoff = ExponentialBackoff::builder()
            .max_retries(config.max_retries)
            .initial_delay(Duration::from_secs_f64(config.backoff_factor.max(0.0)))
            .multiplier(2.0)
            .build();

        Ok(Self {
            inner: Arc::new(TransportInner {
                http,
                base_url,
                api_key,
                timeout: config.timeout,
                backoff,
            }),
        })
    }

    /// The backend root this transport talks to.
    pub fn base_url(&self) -> &str {
        self.inner.base_url.as_str()
    }

    /// Issue a JSON request to `endpoint` (a path relative to the base URL)
    /// and return the parsed response body.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let url = self.endpoint_url(endpoint)?;

        // current_time rides on every mutating request so the backend can
        // observe client clock skew.
        let body = if method == Method::POST || method == Method::PUT {
            let mut body = body.unwrap_or_else(|| Value::Object(Default::default()));
            if let Some(map) = body.as_object_mut() {
                map.insert(
                    "current_time".to_string(),
                    Value::String(Utc::now().to_rfc3339()),
                );
            }
            Some(body)
        } else {
            body
        };

        self.inner
            .backoff
            .execute(Error::is_retryable, || {
                self.attempt(method.clone(), url.clone(), body.clone())
            })
            .await
    }

    /// GET with query parameters.
    pub async fn get_with_params(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value> {
        let mut url = self.endpoint_url(endpoint)?;
        for (key, value) in params {
            url.query_pairs_mut().append_pair(key, value);
        }
        self.inner
            .backoff
            .execute(Error::is_retryable, || {
                self.attempt(Method::GET, url.clone(), None)
            })
            .await
    }

    /// Upload raw bytes to a presigned blob URL with gzip JSON headers.
    /// Presigned URLs carry their own authorization.
    pub async fn put_blob(&self, blob_url: &str, data: Bytes) -> Result<()> {
        let response = self
            .inner
            .http
            .put(blob_url)
            .header("Content-Type", "application/json")
            .header("Content-Encoding", "gzip")
            .body(data)
            .send()
            .await
            .map_err(|e| Error::BlobUpload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::BlobUpload(format!("upload returned {status}")));
        }
        debug!(%blob_url, "blob upload complete");
        Ok(())
    }

    /// Verify the configured API key. Returns the project info payload.
    pub async fn verify_api_key(&self) -> Result<Value> {
        self.request(Method::GET, "verifyapikey", None).await
    }

    /// Release pooled connections. Dropping the last clone has the same
    /// effect; this exists for callers that want an explicit lifecycle.
    pub fn close(&self) {}

    fn endpoint_url(&self, endpoint: &str) -> Result<Url> {
        format!("{}/{}", self.inner.base_url.as_str().trim_end_matches('/'), endpoint)
            .parse()
            .map_err(|e| Error::Connection(format!("invalid endpoint URL: {e}")))
    }

    async fn attempt(&self, method: Method, url: Url, body: Option<Value>) -> Result<Value> {
        let mut request = self
            .inner
            .http
            .request(method, url)
            .header(
                "Authorization",
                format!("Api-Key {}", self.inner.api_key.expose_secret()),
            );

        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(self.inner.timeout)
            } else {
                Error::Connection(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(Error::from_response(status, &text));
        }

        if text.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&text).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SdkConfigBuilder;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport_for(server: &MockServer) -> Transport {
        let config = SdkConfigBuilder::new()
            .api_key("lk-test")
            .agent_id("agent-1")
            .base_url(server.uri())
            .backoff_factor(0.001)
            .build();
        Transport::new(&config).unwrap()
    }

    #[tokio::test]
    async fn attaches_auth_and_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/verifyapikey"))
            .and(header("Authorization", "Api-Key lk-test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"project": "p", "project_id": "pid"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let response = transport.verify_api_key().await.unwrap();
        assert_eq!(response["project"], "p");

        let requests = server.received_requests().await.unwrap();
        let ua = requests[0].headers.get("user-agent").unwrap();
        assert!(ua.to_str().unwrap().starts_with("lucidic-sdk/"));
    }

    #[tokio::test]
    async fn injects_current_time_into_post_bodies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/initsession"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        transport
            .request(
                Method::POST,
                "initsession",
                Some(serde_json::json!({"agent_id": "a"})),
            )
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: Value = requests[0].body_json().unwrap();
        assert_eq!(body["agent_id"], "a");
        let stamp = body["current_time"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    #[tokio::test]
    async fn retries_transient_status_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/verifyapikey"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/verifyapikey"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let response = transport.verify_api_key().await.unwrap();
        assert_eq!(response["ok"], true);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn never_retries_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/verifyapikey"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let err = transport.verify_api_key().await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        server.verify().await;
    }

    #[tokio::test]
    async fn maps_quota_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/verifyapikey"))
            .respond_with(ResponseTemplate::new(402).set_body_string("no credits"))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        assert!(matches!(
            transport.verify_api_key().await.unwrap_err(),
            Error::Quota(_)
        ));
    }

    #[tokio::test]
    async fn get_with_params_builds_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/getprompt"))
            .and(query_param("prompt_name", "greet"))
            .and(query_param("label", "prod"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"prompt_content": "hi {{name}}"})),
            )
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let response = transport
            .get_with_params("getprompt", &[("prompt_name", "greet"), ("label", "prod")])
            .await
            .unwrap();
        assert_eq!(response["prompt_content"], "hi {{name}}");
    }

    #[tokio::test]
    async fn blob_put_carries_gzip_headers() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/blob/1"))
            .and(header("Content-Type", "application/json"))
            .and(header("Content-Encoding", "gzip"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        transport
            .put_blob(
                &format!("{}/blob/1", server.uri()),
                Bytes::from_static(b"payload"),
            )
            .await
            .unwrap();
        server.verify().await;
    }

    #[tokio::test]
    async fn blob_put_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/blob/1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let err = transport
            .put_blob(
                &format!("{}/blob/1", server.uri()),
                Bytes::from_static(b"payload"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BlobUpload(_)));
    }

    #[tokio::test]
    async fn empty_response_body_parses_as_empty_object() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/updatesession"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let response = transport
            .request(Method::PUT, "updatesession", Some(serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response, serde_json::json!({}));
    }
}
