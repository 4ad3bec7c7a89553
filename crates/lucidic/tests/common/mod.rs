//! Shared fixtures: a mock backend and clients pointed at it.
#![allow(dead_code)]

use lucidic::{Client, SdkConfigBuilder};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_API_KEY: &str = "lk-test-key";
pub const TEST_AGENT_ID: &str = "agent-test";

/// Start a mock backend with the standard lifecycle endpoints mounted:
/// `initsession` returns `session_id`, `updatesession` returns `{}`.
pub async fn mock_backend(session_id: &str) -> MockServer {
    let server = MockServer::start().await;
    mount_init_session(&server, session_id).await;
    mount_update_session(&server).await;
    server
}

pub async fn mount_init_session(server: &MockServer, session_id: &str) {
    Mock::given(method("POST"))
        .and(path("/initsession"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"session_id": session_id})))
        .mount(server)
        .await;
}

pub async fn mount_update_session(server: &MockServer) {
    Mock::given(method("PUT"))
        .and(path("/updatesession"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

/// Mount the `events` endpoint with a plain `{}` response.
pub async fn mount_events_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

/// A client against the mock backend, tuned for fast tests: short batch
/// window, tiny retry backoff, and no process-level listeners.
pub fn client_for(server: &MockServer) -> Client {
    builder_for(server).build_client()
}

pub fn builder_for(server: &MockServer) -> TestClientBuilder {
    TestClientBuilder {
        inner: SdkConfigBuilder::new()
            .api_key(TEST_API_KEY)
            .agent_id(TEST_AGENT_ID)
            .base_url(server.uri())
            .timeout(std::time::Duration::from_secs(2))
            .flush_interval(std::time::Duration::from_millis(25))
            .backoff_factor(0.001)
            .capture_signals(false)
            .capture_panics(false),
    }
}

pub struct TestClientBuilder {
    pub inner: SdkConfigBuilder,
}

impl TestClientBuilder {
    pub fn tune(self, f: impl FnOnce(SdkConfigBuilder) -> SdkConfigBuilder) -> Self {
        Self {
            inner: f(self.inner),
        }
    }

    pub fn build_client(self) -> Client {
        Client::new(self.inner.build()).expect("test client")
    }
}

/// Bodies of all POSTs to `/events`, in arrival order.
pub async fn event_posts(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .expect("request recording enabled")
        .iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path() == "/events")
        .map(|r| r.body_json().expect("event body is JSON"))
        .collect()
}

/// Wait until `/events` has seen `count` POSTs, up to `timeout`.
pub async fn wait_for_event_posts(server: &MockServer, count: usize, timeout: std::time::Duration) {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if event_posts(server).await.len() >= count || std::time::Instant::now() >= deadline {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
