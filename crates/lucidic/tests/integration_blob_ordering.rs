//! Blob offload and parent-before-child dispatch ordering.

mod common;

use common::{builder_for, event_posts, mount_events_ok, wait_for_event_posts};
use lucidic::{EventKind, EventParams};
use serde_json::{Value, json};
use std::io::Read;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SESSION: &str = "sess-blob";

fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).expect("valid gzip");
    out
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_parent_offloads_then_child_follows() {
    let server = MockServer::start().await;
    let blob_url = format!("{}/blob/parent", server.uri());

    // Offloaded envelopes get a presigned URL; everything else a bare 200.
    Mock::given(method("POST"))
        .and(path("/events"))
        .and(body_partial_json(json!({"needs_blob": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"blob_url": blob_url})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .and(body_partial_json(json!({"needs_blob": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/blob/parent"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = builder_for(&server)
        .tune(|b| b.blob_threshold(64 * 1024))
        .build_client();

    // ~128 KiB of messages pushes the parent over the threshold.
    let big_content = "m".repeat(2048);
    let messages: Vec<Value> = (0..64)
        .map(|i| json!({"role": "user", "content": big_content, "index": i}))
        .collect();

    let parent_id = client.create_event(
        EventParams::new(EventKind::LlmGeneration)
            .session_id(SESSION)
            .field("provider", json!("openai"))
            .field("model", json!("gpt-4o"))
            .field("messages", json!(messages)),
    );
    let child_id = client.create_event(
        EventParams::new(EventKind::FunctionCall)
            .session_id(SESSION)
            .parent_event_id(parent_id)
            .field("function_name", json!("f")),
    );

    client.force_flush_async(Duration::from_secs(5)).await;

    let requests = server.received_requests().await.unwrap();
    let parent_post = requests
        .iter()
        .position(|r| {
            r.method.as_str() == "POST"
                && r.url.path() == "/events"
                && r.body_json::<Value>().unwrap()["client_event_id"] == json!(parent_id)
        })
        .expect("parent POST observed");
    let blob_put = requests
        .iter()
        .position(|r| r.method.as_str() == "PUT" && r.url.path() == "/blob/parent")
        .expect("blob PUT observed");
    let child_post = requests
        .iter()
        .position(|r| {
            r.method.as_str() == "POST"
                && r.url.path() == "/events"
                && r.body_json::<Value>().unwrap()["client_event_id"] == json!(child_id)
        })
        .expect("child POST observed");

    // Parent POST, then its blob upload, then the child.
    assert!(parent_post < blob_put, "blob must upload after the POST");
    assert!(blob_put < child_post, "child must wait for the parent dispatch");

    // Parent envelope carries a truncated preview, not the payload.
    let parent_body: Value = requests[parent_post].body_json().unwrap();
    assert_eq!(parent_body["needs_blob"], true);
    let preview = &parent_body["payload"];
    assert_eq!(preview["request"]["model"], "gpt-4o");
    assert_eq!(preview["request"]["provider"], "openai");
    let preview_messages = preview["request"]["messages"].as_array().unwrap();
    assert_eq!(preview_messages.len(), 5);
    for message in preview_messages {
        assert!(message["content"].as_str().unwrap().chars().count() <= 200);
    }

    // The blob decompresses to the full original payload.
    let blob = &requests[blob_put];
    assert_eq!(
        blob.headers.get("content-encoding").unwrap().to_str().unwrap(),
        "gzip"
    );
    let full: Value = serde_json::from_slice(&gunzip(&blob.body)).unwrap();
    assert_eq!(full["request"]["messages"].as_array().unwrap().len(), 64);
    assert_eq!(
        full["request"]["messages"][63]["content"].as_str().unwrap().len(),
        2048
    );

    // Child links to the parent with the normative field spelling.
    let child_body: Value = requests[child_post].body_json().unwrap();
    assert_eq!(child_body["client_parent_event_id"], json!(parent_id));
    assert_eq!(child_body["needs_blob"], false);

    client.shutdown(Duration::from_secs(2));
}

#[tokio::test(flavor = "multi_thread")]
async fn orphan_child_ships_after_deferral_rounds() {
    let server = MockServer::start().await;
    mount_events_ok(&server).await;
    let client = builder_for(&server).build_client();

    let missing_parent = Uuid::new_v4();
    let orphan = client.create_event(
        EventParams::generic("orphan")
            .session_id(SESSION)
            .parent_event_id(missing_parent),
    );

    // Five deferral rounds pass before the orphan ships anyway.
    wait_for_event_posts(&server, 1, Duration::from_secs(3)).await;

    let posts = event_posts(&server).await;
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["client_event_id"], json!(orphan));
    assert_eq!(posts[0]["client_parent_event_id"], json!(missing_parent));

    client.shutdown(Duration::from_secs(2));
}

#[tokio::test(flavor = "multi_thread")]
async fn late_parent_unblocks_deferred_child() {
    let server = MockServer::start().await;
    mount_events_ok(&server).await;
    // A wide batch window keeps the deferral budget from expiring before
    // the parent shows up.
    let client = builder_for(&server)
        .tune(|b| b.flush_interval(Duration::from_millis(200)))
        .build_client();

    let parent_id = Uuid::new_v4();
    let child = client.create_event(
        EventParams::generic("child")
            .session_id(SESSION)
            .parent_event_id(parent_id),
    );

    // Child defers while the parent is unknown.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let parent = client.create_event(
        EventParams::generic("parent")
            .session_id(SESSION)
            .event_id(parent_id),
    );
    assert_eq!(parent, parent_id);

    client.force_flush_async(Duration::from_secs(5)).await;

    let posts = event_posts(&server).await;
    assert_eq!(posts.len(), 2);
    let parent_index = posts
        .iter()
        .position(|b| b["client_event_id"] == json!(parent_id))
        .unwrap();
    let child_index = posts
        .iter()
        .position(|b| b["client_event_id"] == json!(child))
        .unwrap();
    assert!(parent_index < child_index, "parent must ship before child");

    client.shutdown(Duration::from_secs(2));
}
