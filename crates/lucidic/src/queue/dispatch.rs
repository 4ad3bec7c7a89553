//! Single-event dispatch: deferral, blob offload, retries.

use super::{MAX_DEFERRALS, MAX_REQUEUES, QueueShared, preview};
use crate::error::Error;
use crate::types::QueuedEvent;
use http::Method;
use lucidic_core::retry::{BackoffStrategy, ExponentialBackoff};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

/// In-line attempts per dispatch (initial try plus two retries).
const DISPATCH_ATTEMPTS: u32 = 3;

/// What became of one dispatch.
pub(super) enum DispatchOutcome {
    /// POSTed (and uploaded, when offloaded) successfully.
    Delivered(Uuid),
    /// Parent not yet delivered; parked on the deferred list.
    Deferred,
    /// Already delivered earlier; nothing sent.
    Skipped,
    /// All in-line attempts failed; the item may be re-enqueued.
    Failed(QueuedEvent),
}

enum SendFailure {
    /// Retrying cannot help (e.g. the backend omitted `blob_url`).
    Fatal(String),
    Retryable(Error),
}

pub(super) async fn send_one(shared: &Arc<QueueShared>, mut item: QueuedEvent) -> DispatchOutcome {
    let id = item.request.client_event_id;

    // Ids are transmitted at most once, even if a caller re-supplies one.
    if shared.delivered.lock().expect("delivered lock").contains(&id) {
        debug!(%id, "event already delivered; skipping duplicate");
        return DispatchOutcome::Skipped;
    }

    if let Some(parent) = item.request.client_parent_event_id {
        let parent_known = shared
            .delivered
            .lock()
            .expect("delivered lock")
            .contains(&parent);
        if !parent_known && item.defer_count < MAX_DEFERRALS {
            item.defer_count += 1;
            debug!(%id, %parent, defer_count = item.defer_count, "parent not delivered; deferring");
            shared.deferred.lock().expect("deferred lock").push(item);
            return DispatchOutcome::Deferred;
        }
    }

    // Compact UTF-8 serialization decides offload; strictly greater than the
    // threshold.
    let payload_bytes = match serde_json::to_vec(&item.request.payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(%id, error = %e, "payload serialization failed; dropping event");
            return DispatchOutcome::Failed(item);
        }
    };
    let needs_blob = payload_bytes.len() > shared.blob_threshold;
    let preview = needs_blob.then(|| preview::build(&item.request.payload));
    if needs_blob {
        debug!(
            %id,
            size = payload_bytes.len(),
            threshold = shared.blob_threshold,
            "payload exceeds threshold; offloading to blob"
        );
    }

    let backoff = ExponentialBackoff::builder()
        .max_retries(DISPATCH_ATTEMPTS - 1)
        .initial_delay(Duration::from_millis(250))
        .multiplier(2.0)
        .build();

    let mut attempt = 0;
    loop {
        match try_send(shared, &item, needs_blob, preview.clone(), &payload_bytes).await {
            Ok(()) => return DispatchOutcome::Delivered(id),
            Err(SendFailure::Fatal(message)) => {
                error!(%id, %message, "event dispatch failed");
                return DispatchOutcome::Failed(item);
            }
            Err(SendFailure::Retryable(err)) => {
                attempt += 1;
                debug!(%id, attempt, error = %err, "event send attempt failed");
                if attempt >= DISPATCH_ATTEMPTS {
                    error!(%id, attempts = DISPATCH_ATTEMPTS, "event dispatch failed after all attempts");
                    return DispatchOutcome::Failed(item);
                }
                if let Some(delay) = backoff.next_delay(attempt - 1) {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

async fn try_send(
    shared: &Arc<QueueShared>,
    item: &QueuedEvent,
    needs_blob: bool,
    preview: Option<Value>,
    payload_bytes: &[u8],
) -> Result<(), SendFailure> {
    let body = item
        .request
        .wire_body(needs_blob, preview)
        .map_err(|e| SendFailure::Fatal(e.to_string()))?;

    let response = shared
        .transport
        .request(Method::POST, "events", Some(body))
        .await
        .map_err(SendFailure::Retryable)?;

    if needs_blob {
        let Some(blob_url) = response.get("blob_url").and_then(Value::as_str) else {
            return Err(SendFailure::Fatal(
                "no blob_url received for large payload".to_string(),
            ));
        };
        let compressed =
            gzip(payload_bytes).map_err(|e| SendFailure::Fatal(e.to_string()))?;
        shared
            .transport
            .put_blob(blob_url, compressed.into())
            .await
            .map_err(SendFailure::Retryable)?;
    }

    Ok(())
}

/// Re-enqueue items whose dispatch failed, bounded by the retry cap.
pub(super) async fn retry_failed(shared: &Arc<QueueShared>, failed: Vec<QueuedEvent>) {
    debug!(count = failed.len(), "re-enqueueing failed events");
    tokio::time::sleep(Duration::from_secs(1)).await;

    for mut item in failed {
        item.retry_count += 1;
        if item.retry_count <= MAX_REQUEUES {
            shared.push(item);
        } else {
            error!(
                id = %item.request.client_event_id,
                "dropping event after exhausting requeue budget"
            );
        }
    }
}

/// Gzip-compress the full payload for the blob PUT.
pub(super) fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    use flate2::{Compression, write::GzEncoder};
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}
