//! Queue capacity and overflow policy, end to end.

mod common;

use common::{builder_for, event_posts};
use lucidic::EventParams;
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SESSION: &str = "sess-overflow";

#[tokio::test(flavor = "multi_thread")]
async fn burst_beyond_capacity_drops_the_newest() {
    let server = MockServer::start().await;
    // Slow responses keep the pipeline busy while the burst lands.
    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_millis(700)),
        )
        .mount(&server)
        .await;

    let client = builder_for(&server)
        .tune(|b| b.max_queue_size(2).flush_at(1))
        .build_client();

    // The blocker occupies the dispatcher...
    let blocker = client.create_event(EventParams::generic("blocker").session_id(SESSION));
    tokio::time::sleep(Duration::from_millis(250)).await;

    // ...so the burst accumulates in the bounded queue: two fit, the third
    // is dropped.
    let e1 = client.create_event(EventParams::generic("e1").session_id(SESSION));
    let e2 = client.create_event(EventParams::generic("e2").session_id(SESSION));
    let e3 = client.create_event(EventParams::generic("e3").session_id(SESSION));

    // Flush polling would return early on the (intentional) progress stall
    // while the slow responses drain, so wait on the wire instead.
    common::wait_for_event_posts(&server, 3, Duration::from_secs(10)).await;

    let posted: HashSet<String> = event_posts(&server)
        .await
        .iter()
        .map(|b| b["client_event_id"].as_str().unwrap().to_string())
        .collect();

    assert!(posted.contains(&blocker.to_string()));
    assert!(posted.contains(&e1.to_string()), "first accepted item must ship");
    assert!(posted.contains(&e2.to_string()), "second accepted item must ship");
    assert!(
        !posted.contains(&e3.to_string()),
        "item beyond capacity must be dropped"
    );
    assert_eq!(posted.len(), 3);

    client.shutdown(Duration::from_secs(2));
}
