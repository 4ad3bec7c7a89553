//! Process-wide shutdown coordination.
//!
//! A singleton tracks every live session together with the queue and
//! session-resource handles needed to wind it down. Process listeners (signal
//! handlers, panic hook) are installed at most once, the first time a session
//! registers. On trigger, each auto-end session is flushed and ended with
//! `is_successful = false, reason = "Process shutdown"` from a dedicated
//! thread. Shutdown never panics; every failure is logged at debug.
//!
//! Rust has no portable atexit, so the normal-exit path is the client's
//! explicit `shutdown()` or its drop guard, both of which route through the
//! same per-session logic here.

use crate::context;
use crate::queue::EventQueue;
use crate::resources::Sessions;
use crate::types::EndSessionParams;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-session flush budget during shutdown.
const FLUSH_DEADLINE: Duration = Duration::from_secs(5);

/// Total shutdown budget.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Everything needed to wind one session down.
pub(crate) struct SessionHandle {
    pub(crate) queue: EventQueue,
    pub(crate) sessions: Sessions,
    pub(crate) runtime: tokio::runtime::Handle,
    pub(crate) auto_end: bool,
}

/// Singleton coordinating flush-and-end across all live sessions.
pub(crate) struct ShutdownCoordinator {
    active: Mutex<HashMap<String, SessionHandle>>,
    shutting_down: AtomicBool,
    listeners_registered: AtomicBool,
    complete: Arc<(Mutex<bool>, Condvar)>,
}

static COORDINATOR: OnceLock<ShutdownCoordinator> = OnceLock::new();

pub(crate) fn coordinator() -> &'static ShutdownCoordinator {
    COORDINATOR.get_or_init(|| ShutdownCoordinator {
        active: Mutex::new(HashMap::new()),
        shutting_down: AtomicBool::new(false),
        listeners_registered: AtomicBool::new(false),
        complete: Arc::new((Mutex::new(false), Condvar::new())),
    })
}

impl ShutdownCoordinator {
    /// Register a live session. Registering an id twice is a no-op on the
    /// second call.
    pub(crate) fn register_session(
        &self,
        session_id: &str,
        handle: SessionHandle,
        capture_signals: bool,
        capture_panics: bool,
    ) {
        let runtime = handle.runtime.clone();
        {
            let mut active = self.active.lock().expect("session registry lock");
            if active.contains_key(session_id) {
                debug!(%session_id, "session already registered");
                return;
            }
            debug!(%session_id, "registering session");
            active.insert(session_id.to_string(), handle);
        }
        self.ensure_listeners(&runtime, capture_signals, capture_panics);
    }

    /// Forget a session after it ended.
    pub(crate) fn unregister_session(&self, session_id: &str) {
        debug!(%session_id, "unregistering session");
        self.active
            .lock()
            .expect("session registry lock")
            .remove(session_id);
    }

    /// Whether a session is currently registered.
    pub(crate) fn is_session_active(&self, session_id: &str) -> bool {
        self.active
            .lock()
            .expect("session registry lock")
            .contains_key(session_id)
    }

    /// Flush and end one registered session now, on the calling thread.
    /// Used by the client's explicit shutdown and drop paths. Sessions
    /// registered without auto-end are only unregistered.
    pub(crate) fn end_registered_session(&self, session_id: &str) {
        let handle = self
            .active
            .lock()
            .expect("session registry lock")
            .remove(session_id);
        if let Some(handle) = handle {
            if handle.auto_end {
                end_one(session_id, &handle);
            } else {
                context::clear_active_session(session_id);
            }
        }
    }

    /// Coordinate shutdown of every auto-end session. Idempotent; later
    /// triggers are ignored.
    pub(crate) fn trigger(&self, trigger: &str) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!(trigger, "already shutting down; ignoring trigger");
            return;
        }

        let to_end: Vec<(String, SessionHandle)> = {
            let mut active = self.active.lock().expect("session registry lock");
            let ids: Vec<String> = active
                .iter()
                .filter(|(_, handle)| handle.auto_end)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| active.remove(&id).map(|handle| (id, handle)))
                .collect()
        };

        if to_end.is_empty() {
            debug!(trigger, "no active sessions to clean up");
            return;
        }
        info!(trigger, count = to_end.len(), "shutdown initiated");

        // A dedicated thread avoids deadlocking with whatever context fired
        // the trigger (signal task, panic hook, runtime worker).
        let complete = Arc::clone(&self.complete);
        *complete.0.lock().expect("completion lock") = false;
        let worker = {
            let complete = Arc::clone(&complete);
            std::thread::Builder::new()
                .name("lucidic-shutdown".into())
                .spawn(move || {
                    for (session_id, handle) in &to_end {
                        end_one(session_id, handle);
                    }
                    info!("shutdown complete");
                    let (done, condvar) = &*complete;
                    *done.lock().expect("completion lock") = true;
                    condvar.notify_all();
                })
        };

        match worker {
            Ok(_) => {
                let (done, condvar) = &*complete;
                let guard = done.lock().expect("completion lock");
                let (_guard, timeout) = condvar
                    .wait_timeout_while(guard, SHUTDOWN_DEADLINE, |finished| !*finished)
                    .expect("completion lock");
                if timeout.timed_out() {
                    warn!("shutdown timed out after {SHUTDOWN_DEADLINE:?}");
                }
            }
            Err(e) => debug!(error = %e, "could not spawn shutdown thread"),
        }
    }

    fn ensure_listeners(
        &self,
        runtime: &tokio::runtime::Handle,
        capture_signals: bool,
        capture_panics: bool,
    ) {
        if self.listeners_registered.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("registering process shutdown listeners");

        if capture_panics {
            let previous = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |panic_info| {
                if !panic_shielded() {
                    coordinator().trigger("panic");
                }
                previous(panic_info);
            }));
        }

        if capture_signals {
            runtime.spawn(listen_for_signals());
        }
    }
}

fn end_one(session_id: &str, handle: &SessionHandle) {
    debug!(%session_id, "flushing events before ending session");
    handle.queue.force_flush(FLUSH_DEADLINE);

    let params = EndSessionParams::failed("Process shutdown");
    let result = handle
        .runtime
        .block_on(handle.sessions.end(session_id, &params));
    if let Err(e) = result {
        debug!(%session_id, error = %e, "error ending session");
    }
    context::clear_active_session(session_id);
}

#[cfg(unix)]
async fn listen_for_signals() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            debug!(error = %e, "could not install SIGINT handler");
            return;
        }
    };
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            debug!(error = %e, "could not install SIGTERM handler");
            return;
        }
    };

    let received = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    };
    info!(signal = received, "received shutdown signal");
    coordinator().trigger(received);
    std::process::exit(0);
}

#[cfg(not(unix))]
async fn listen_for_signals() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("received ctrl-c");
        coordinator().trigger("ctrl_c");
        std::process::exit(0);
    }
}

thread_local! {
    static PANIC_SHIELD: Cell<bool> = const { Cell::new(false) };
}

/// Run `f` with the panic hook's shutdown trigger disarmed on this thread.
/// Used around SDK-internal `catch_unwind` sections (the masking hook) so a
/// contained panic does not tear the process down.
pub(crate) fn with_panic_shield<T>(f: impl FnOnce() -> T) -> T {
    PANIC_SHIELD.with(|flag| flag.set(true));
    let result = f();
    PANIC_SHIELD.with(|flag| flag.set(false));
    result
}

fn panic_shielded() -> bool {
    PANIC_SHIELD.with(Cell::get)
}

/// Trigger the process-shutdown path as if a signal had fired. Exposed for
/// tests; does not exit the process.
#[doc(hidden)]
pub fn trigger_process_shutdown(reason: &str) {
    coordinator().trigger(reason);
}
