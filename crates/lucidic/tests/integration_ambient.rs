//! Ambient session resolution and thread isolation.
//!
//! These assertions share process-global ambient state (the active session
//! and the primary-thread record), so they live in a single test function in
//! their own test binary.

mod common;

use common::{builder_for, event_posts, mock_backend, mount_events_ok};
use lucidic::{EventParams, SessionParams};
use serde_json::json;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn ambient_session_flows_to_events_but_not_to_threads() {
    let server = mock_backend("sess-ambient").await;
    mount_events_ok(&server).await;
    let client = builder_for(&server).build_client();

    // Creating the session makes it ambient for this (primary) thread.
    let session_id = client
        .create_session(SessionParams::named("ambient run"))
        .await
        .unwrap();
    assert_eq!(session_id, "sess-ambient");
    assert_eq!(lucidic::current_session_id().as_deref(), Some("sess-ambient"));

    // An event created with no explicit session resolves to the ambient one.
    let ambient_event = client.create_event(EventParams::generic("ambient"));
    client.force_flush_async(Duration::from_secs(3)).await;

    let posts = event_posts(&server).await;
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["session_id"], "sess-ambient");
    assert_eq!(posts[0]["client_event_id"], json!(ambient_event));

    // A spawned thread does not inherit the session: the call still returns
    // an id, but nothing is transmitted.
    let worker_client = client.clone();
    let worker_id = std::thread::spawn(move || {
        assert_eq!(lucidic::current_session_id(), None);
        worker_client.create_event(EventParams::generic("from worker"))
    })
    .join()
    .unwrap();
    assert!(!worker_id.is_nil());

    client.force_flush_async(Duration::from_secs(3)).await;
    assert_eq!(
        event_posts(&server).await.len(),
        1,
        "worker-thread event must not be transmitted"
    );

    // A thread that binds its own session is isolated the other way around.
    let worker_client = client.clone();
    let bound_event = std::thread::spawn(move || {
        let _guard = lucidic::bind_session("sess-worker");
        worker_client.create_event(EventParams::generic("bound"))
    })
    .join()
    .unwrap();

    client.force_flush_async(Duration::from_secs(3)).await;
    let posts = event_posts(&server).await;
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[1]["client_event_id"], json!(bound_event));
    assert_eq!(posts[1]["session_id"], "sess-worker");

    // End the session on the async path before tearing the client down.
    client
        .end_session(lucidic::EndSessionParams::successful())
        .await
        .unwrap();
    client.shutdown(Duration::from_secs(2));
}
