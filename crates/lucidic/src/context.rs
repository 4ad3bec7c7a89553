//! Ambient context: which session and which parent event the current
//! logical flow belongs to.
//!
//! Two ambient values exist, the current session id and the current parent
//! event id. Resolution for an event created without an explicit session:
//!
//! 1. Task-local storage, when running inside an async binder scope.
//! 2. Thread-local storage for secondary threads. There is no fallback to
//!    the process global here: a thread that never bound a session resolves
//!    to no session even if its parent thread had one.
//! 3. The process-global active session, on the primary thread only.
//! 4. The thread-local lexical binder stack (primary thread).
//!
//! The "primary" thread is the thread that first activated a session; Rust
//! exposes no portable main-thread check.

use std::cell::RefCell;
use std::future::Future;
use std::sync::RwLock;
use std::thread::{self, ThreadId};
use uuid::Uuid;

/// Session identifiers are server-assigned and not necessarily UUIDs.
pub type SessionId = String;

#[derive(Clone, Default)]
struct TaskContext {
    sessions: Vec<SessionId>,
    parents: Vec<Uuid>,
}

tokio::task_local! {
    static TASK_CONTEXT: TaskContext;
}

thread_local! {
    static THREAD_SESSIONS: RefCell<Vec<SessionId>> = const { RefCell::new(Vec::new()) };
    static THREAD_PARENTS: RefCell<Vec<Uuid>> = const { RefCell::new(Vec::new()) };
}

static ACTIVE_SESSION: RwLock<Option<SessionId>> = RwLock::new(None);
static PRIMARY_THREAD: RwLock<Option<ThreadId>> = RwLock::new(None);

fn is_primary_thread() -> bool {
    PRIMARY_THREAD
        .read()
        .map(|id| *id == Some(thread::current().id()))
        .unwrap_or(false)
}

/// Mark `id` as the process-wide active session. The calling thread becomes
/// the primary thread if none was recorded yet.
pub fn set_active_session(id: impl Into<SessionId>) {
    let mut primary = PRIMARY_THREAD.write().expect("primary thread lock");
    if primary.is_none() {
        *primary = Some(thread::current().id());
    }
    drop(primary);
    *ACTIVE_SESSION.write().expect("active session lock") = Some(id.into());
}

/// Clear the process-wide active session if it matches `id`.
pub fn clear_active_session(id: &str) {
    let mut active = ACTIVE_SESSION.write().expect("active session lock");
    if active.as_deref() == Some(id) {
        *active = None;
    }
}

/// Resolve the ambient session id for the current flow, if any.
pub fn current_session_id() -> Option<SessionId> {
    // Async binder scope wins.
    if let Ok(Some(session)) = TASK_CONTEXT.try_with(|c| c.sessions.last().cloned()) {
        return Some(session);
    }

    // Secondary threads see only what they bound themselves.
    if !is_primary_thread() {
        return THREAD_SESSIONS.with(|s| s.borrow().last().cloned());
    }

    // Primary thread: active session, then the lexical binder stack.
    if let Some(active) = ACTIVE_SESSION
        .read()
        .expect("active session lock")
        .clone()
    {
        return Some(active);
    }
    THREAD_SESSIONS.with(|s| s.borrow().last().cloned())
}

/// Resolve the ambient parent event id for the current flow, if any.
pub fn current_parent_event_id() -> Option<Uuid> {
    if let Ok(Some(parent)) = TASK_CONTEXT.try_with(|c| c.parents.last().copied()) {
        return Some(parent);
    }
    THREAD_PARENTS.with(|p| p.borrow().last().copied())
}

/// RAII guard binding a session id to the current thread for its lifetime.
///
/// The previous value is restored on drop, on every exit path. Guards are
/// re-entrant and must be dropped in LIFO order (the natural order for a
/// stack-held guard).
#[must_use = "the session is only bound while the guard is alive"]
pub struct SessionBinding {
    _not_send: std::marker::PhantomData<*const ()>,
}

/// Bind `id` as the current session for the calling thread.
pub fn bind_session(id: impl Into<SessionId>) -> SessionBinding {
    THREAD_SESSIONS.with(|s| s.borrow_mut().push(id.into()));
    SessionBinding {
        _not_send: std::marker::PhantomData,
    }
}

impl Drop for SessionBinding {
    fn drop(&mut self) {
        THREAD_SESSIONS.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

/// RAII guard binding a parent event id to the current thread.
#[must_use = "the parent is only bound while the guard is alive"]
pub struct ParentBinding {
    _not_send: std::marker::PhantomData<*const ()>,
}

/// Bind `id` as the current parent event for the calling thread.
pub fn bind_parent(id: Uuid) -> ParentBinding {
    THREAD_PARENTS.with(|p| p.borrow_mut().push(id));
    ParentBinding {
        _not_send: std::marker::PhantomData,
    }
}

impl Drop for ParentBinding {
    fn drop(&mut self) {
        THREAD_PARENTS.with(|p| {
            p.borrow_mut().pop();
        });
    }
}

fn inherited_task_context() -> TaskContext {
    TASK_CONTEXT
        .try_with(|c| c.clone())
        .unwrap_or_default()
}

/// Run `fut` with `id` bound as the current session for that task scope.
///
/// The binding is carried by the returned future itself, so it is restored
/// on normal completion, on error, and on cancellation alike.
pub async fn with_session<F>(id: impl Into<SessionId>, fut: F) -> F::Output
where
    F: Future,
{
    let mut ctx = inherited_task_context();
    ctx.sessions.push(id.into());
    TASK_CONTEXT.scope(ctx, fut).await
}

/// Run `fut` with `id` bound as the current parent event for that task scope.
pub async fn with_parent<F>(id: Uuid, fut: F) -> F::Output
where
    F: Future,
{
    let mut ctx = inherited_task_context();
    ctx.parents.push(id);
    TASK_CONTEXT.scope(ctx, fut).await
}

/// Reset all ambient state. Intended for tests.
#[doc(hidden)]
pub fn reset_ambient_state() {
    *ACTIVE_SESSION.write().expect("active session lock") = None;
    *PRIMARY_THREAD.write().expect("primary thread lock") = None;
    THREAD_SESSIONS.with(|s| s.borrow_mut().clear());
    THREAD_PARENTS.with(|p| p.borrow_mut().clear());
}
