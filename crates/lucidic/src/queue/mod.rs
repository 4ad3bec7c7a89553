//! Bounded, non-blocking event queue with batching, dependency-aware
//! parallel dispatch, blob offload, retries, and deferral.
//!
//! Producers enqueue from any thread or task without blocking. A dedicated
//! coordinator task assembles batches, partitions them into dependency
//! groups (a child never ships before its parent), and dispatches each group
//! concurrently through a bounded worker pool.

mod dispatch;
mod preview;

use crate::config::{OverflowPolicy, SdkConfig};
use crate::http::Transport;
use crate::types::{EventRequest, QueuedEvent};
use dispatch::DispatchOutcome;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;

/// Deferral rounds before an item ships despite a missing parent.
pub(crate) const MAX_DEFERRALS: u32 = 5;

/// Requeue budget for items whose dispatch failed outright.
pub(crate) const MAX_REQUEUES: u32 = 3;

/// Poll period for flush/shutdown waits (~20 Hz).
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Polls with no queue-size progress before a flush gives up (~0.5 s).
const STALL_POLLS: u32 = 10;

/// The asynchronous event queue.
///
/// Cheap to clone; all clones share the same pipeline.
#[derive(Clone)]
pub struct EventQueue {
    shared: Arc<QueueShared>,
}

pub(crate) struct QueueShared {
    pub(crate) queue: Mutex<VecDeque<QueuedEvent>>,
    pub(crate) deferred: Mutex<Vec<QueuedEvent>>,
    pub(crate) delivered: Mutex<HashSet<Uuid>>,
    pub(crate) in_flight: AtomicUsize,
    items_available: Notify,
    flush_signal: Notify,
    stop_signal: Notify,
    stopped: AtomicBool,
    coordinator_done: AtomicBool,
    pub(crate) transport: Transport,

    max_queue_size: usize,
    flush_at: usize,
    flush_interval: Duration,
    pub(crate) blob_threshold: usize,
    worker_count: usize,
    retry_failed: bool,
    overflow_policy: OverflowPolicy,
}

impl QueueShared {
    fn from_config(config: &SdkConfig, transport: Transport) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            deferred: Mutex::new(Vec::new()),
            delivered: Mutex::new(HashSet::new()),
            in_flight: AtomicUsize::new(0),
            items_available: Notify::new(),
            flush_signal: Notify::new(),
            stop_signal: Notify::new(),
            stopped: AtomicBool::new(false),
            coordinator_done: AtomicBool::new(false),
            transport,
            max_queue_size: config.max_queue_size,
            flush_at: config.flush_at,
            flush_interval: config.flush_interval,
            blob_threshold: config.blob_threshold,
            worker_count: config.worker_count,
            retry_failed: config.retry_failed,
            overflow_policy: config.overflow_policy,
        }
    }

    /// Append an item, applying the overflow policy at capacity. Never
    /// blocks.
    pub(crate) fn push(&self, item: QueuedEvent) {
        if self.stopped.load(Ordering::Relaxed) {
            debug!("queue stopped; dropping event");
            return;
        }

        let len = {
            let mut queue = self.queue.lock().expect("queue lock");
            if queue.len() >= self.max_queue_size {
                match self.overflow_policy {
                    OverflowPolicy::DropNewest => {
                        debug!(
                            capacity = self.max_queue_size,
                            "queue at capacity; dropping incoming event"
                        );
                        return;
                    }
                    OverflowPolicy::DropOldest => {
                        queue.pop_front();
                        debug!(
                            capacity = self.max_queue_size,
                            "queue at capacity; dropped oldest event"
                        );
                    }
                }
            }
            queue.push_back(item);
            queue.len()
        };

        self.items_available.notify_one();
        if len >= self.flush_at {
            self.flush_signal.notify_one();
        }
    }

    fn queue_len(&self) -> usize {
        self.queue.lock().expect("queue lock").len()
    }

    fn deferred_len(&self) -> usize {
        self.deferred.lock().expect("deferred lock").len()
    }

    fn drained(&self) -> bool {
        self.queue_len() == 0
            && self.in_flight.load(Ordering::Acquire) == 0
            && self.deferred_len() == 0
    }
}

impl EventQueue {
    /// Spawn the coordinator on `handle` and return the queue handle.
    pub(crate) fn start(
        config: &SdkConfig,
        transport: Transport,
        handle: &tokio::runtime::Handle,
    ) -> Self {
        let shared = Arc::new(QueueShared::from_config(config, transport));
        handle.spawn(coordinator(Arc::clone(&shared)));
        Self { shared }
    }

    /// Enqueue a fully built event request. Returns immediately; the client
    /// id is already known to the caller. At capacity the overflow policy
    /// applies and the drop is logged at debug.
    pub fn enqueue(&self, request: EventRequest) {
        debug!(id = %request.client_event_id, "queueing event");
        self.shared.push(QueuedEvent::new(request));
    }

    /// True iff nothing is queued, deferred, or in flight.
    pub fn is_empty(&self) -> bool {
        self.shared.drained()
    }

    /// Flush synchronously, best effort. Returns when the pipeline is drained
    /// or the deadline elapses; returns early if the queue size stops making
    /// progress for about half a second. Never fails.
    ///
    /// Blocks the calling thread; from async code use
    /// [`force_flush_async`](Self::force_flush_async).
    pub fn force_flush(&self, timeout: Duration) {
        self.flush_inner(timeout, |d| std::thread::sleep(d));
    }

    /// Flush asynchronously, with the same semantics as
    /// [`force_flush`](Self::force_flush).
    pub async fn force_flush_async(&self, timeout: Duration) {
        let deadline = std::time::Instant::now() + timeout;
        let mut progress = FlushProgress::new(&self.shared);
        loop {
            if progress.step(&self.shared) || std::time::Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn flush_inner(&self, timeout: Duration, sleep: impl Fn(Duration)) {
        let deadline = std::time::Instant::now() + timeout;
        let mut progress = FlushProgress::new(&self.shared);
        loop {
            if progress.step(&self.shared) || std::time::Instant::now() >= deadline {
                return;
            }
            sleep(POLL_INTERVAL);
        }
    }

    /// Flush, stop the coordinator, and wait for it to exit. A coordinator
    /// that refuses to terminate within the deadline is reported at debug.
    /// Never fails. Blocks the calling thread.
    pub fn shutdown(&self, timeout: Duration) {
        debug!(queue_size = self.shared.queue_len(), "queue shutdown requested");
        self.force_flush(timeout);

        let wait_start = std::time::Instant::now();
        while !self.is_empty() && wait_start.elapsed() < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(10));
        }

        self.shared.stopped.store(true, Ordering::Release);
        self.shared.stop_signal.notify_waiters();
        self.shared.flush_signal.notify_one();

        let join_start = std::time::Instant::now();
        while !self.shared.coordinator_done.load(Ordering::Acquire) && join_start.elapsed() < timeout
        {
            std::thread::sleep(Duration::from_millis(10));
        }
        if !self.shared.coordinator_done.load(Ordering::Acquire) {
            debug!("queue coordinator did not terminate in time");
        }
    }
}

/// Flush polling state: two stable empty observations confirm completion, a
/// stuck non-zero size for [`STALL_POLLS`] polls ends the wait early.
struct FlushProgress {
    last_size: usize,
    stable: u32,
}

impl FlushProgress {
    fn new(shared: &QueueShared) -> Self {
        shared.flush_signal.notify_one();
        Self {
            last_size: usize::MAX,
            stable: 0,
        }
    }

    /// One poll step; true means the flush is finished (drained or stalled).
    fn step(&mut self, shared: &QueueShared) -> bool {
        let size = shared.queue_len();

        if shared.drained() {
            if self.stable >= 2 {
                debug!("flush complete; pipeline drained");
                return true;
            }
            self.stable += 1;
        } else if size == self.last_size && size != 0 {
            self.stable += 1;
            if self.stable >= STALL_POLLS {
                debug!(remaining = size, "flush stalled; returning early");
                return true;
            }
        } else {
            self.stable = 0;
            self.last_size = size;
        }

        shared.flush_signal.notify_one();
        false
    }
}

/// Batch assembly and group dispatch loop.
async fn coordinator(shared: Arc<QueueShared>) {
    let permits = Arc::new(Semaphore::new(shared.worker_count));

    loop {
        let batch = collect_batch(&shared).await;

        // Deferred items from prior batches go to the front so their
        // deferral budget keeps counting down.
        let mut work: Vec<QueuedEvent> = {
            let mut deferred = shared.deferred.lock().expect("deferred lock");
            deferred.drain(..).collect()
        };
        work.extend(batch);

        if work.is_empty() {
            if shared.stopped.load(Ordering::Acquire) && shared.queue_len() == 0 {
                break;
            }
            continue;
        }

        shared.in_flight.fetch_add(work.len(), Ordering::AcqRel);
        let count = work.len();
        process_batch(&shared, work, &permits).await;
        shared.in_flight.fetch_sub(count, Ordering::AcqRel);
    }

    shared.coordinator_done.store(true, Ordering::Release);
    debug!("queue coordinator stopped");
}

/// Collect until the flush-at count is reached, the flush interval elapses,
/// or a flush/stop is signalled (in which case the queue is drained).
async fn collect_batch(shared: &QueueShared) -> Vec<QueuedEvent> {
    let deadline = tokio::time::Instant::now() + shared.flush_interval;
    let mut batch = Vec::new();
    let mut force = false;

    loop {
        if force || shared.stopped.load(Ordering::Acquire) {
            let mut queue = shared.queue.lock().expect("queue lock");
            batch.extend(queue.drain(..));
            return batch;
        }

        {
            let mut queue = shared.queue.lock().expect("queue lock");
            while batch.len() < shared.flush_at {
                match queue.pop_front() {
                    Some(item) => batch.push(item),
                    None => break,
                }
            }
        }

        if batch.len() >= shared.flush_at {
            return batch;
        }
        if tokio::time::Instant::now() >= deadline {
            return batch;
        }

        tokio::select! {
            _ = shared.items_available.notified() => {}
            _ = shared.flush_signal.notified() => { force = true; }
            _ = shared.stop_signal.notified() => {}
            _ = tokio::time::sleep_until(deadline) => { return batch; }
        }
    }
}

async fn process_batch(
    shared: &Arc<QueueShared>,
    batch: Vec<QueuedEvent>,
    permits: &Arc<Semaphore>,
) {
    let delivered_snapshot = shared.delivered.lock().expect("delivered lock").clone();
    let groups = group_by_dependencies(&delivered_snapshot, batch);
    let total = groups.len();

    for (index, group) in groups.into_iter().enumerate() {
        debug!(group = index + 1, total, size = group.len(), "dispatching group");

        let futures = group.into_iter().map(|item| {
            let shared = Arc::clone(shared);
            let permits = Arc::clone(permits);
            async move {
                let _permit = permits.acquire().await.expect("worker semaphore closed");
                dispatch::send_one(&shared, item).await
            }
        });
        let outcomes = futures::future::join_all(futures).await;

        let mut failed = Vec::new();
        {
            let mut delivered = shared.delivered.lock().expect("delivered lock");
            for outcome in outcomes {
                match outcome {
                    DispatchOutcome::Delivered(id) => {
                        delivered.insert(id);
                    }
                    DispatchOutcome::Deferred | DispatchOutcome::Skipped => {}
                    DispatchOutcome::Failed(item) => failed.push(item),
                }
            }
        }

        if !failed.is_empty() && shared.retry_failed {
            dispatch::retry_failed(shared, failed).await;
        }
    }
}

/// Partition a batch into ordered groups: an item enters a group only once
/// its parent is delivered or scheduled in an earlier group. A pass that
/// makes no progress while items remain (orphaned or cyclic parents) ships
/// the remainder as one final group rather than blocking.
fn group_by_dependencies(
    delivered: &HashSet<Uuid>,
    events: Vec<QueuedEvent>,
) -> Vec<Vec<QueuedEvent>> {
    let max_iterations = events.len().max(1) * 2;
    let mut groups = Vec::new();
    let mut remaining = events;
    let mut processed = delivered.clone();
    let mut iterations = 0;

    while !remaining.is_empty() && iterations < max_iterations {
        iterations += 1;
        let mut current = Vec::new();
        let mut next = Vec::new();

        for event in remaining {
            let ready = match event.request.client_parent_event_id {
                None => true,
                Some(parent) => processed.contains(&parent),
            };
            if ready {
                processed.insert(event.request.client_event_id);
                current.push(event);
            } else {
                next.push(event);
            }
        }

        if current.is_empty() {
            warn!(
                count = next.len(),
                "events with unresolved parent references; sending as final group"
            );
            groups.push(next);
            return groups;
        }

        groups.push(current);
        remaining = next;
    }

    if !remaining.is_empty() {
        groups.push(remaining);
    }
    groups
}
