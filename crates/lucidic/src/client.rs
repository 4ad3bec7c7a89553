//! The Lucidic client: the composition root owning the transport, event
//! queue, session resources, and the background runtime they run on.

use crate::builder::{EventBuilder, EventParams};
use crate::config::SdkConfig;
use crate::context::{self, SessionId};
use crate::error::{Error, Result};
use crate::http::Transport;
use crate::queue::EventQueue;
use crate::resources::{Prompts, Sessions};
use crate::scope::{self, EventScope};
use crate::shutdown::{self, SessionHandle};
use crate::types::{EndSessionParams, EventKind, SessionParams};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Client for the Lucidic observability backend.
///
/// Cheap to clone; all clones share one pipeline. The client owns a small
/// background runtime so the queue keeps draining regardless of how the host
/// program schedules its own work.
///
/// # Example
///
/// ```rust,no_run
/// use lucidic::{Client, SdkConfigBuilder, SessionParams, EventParams};
///
/// # async fn example() -> lucidic::Result<()> {
/// let client = Client::new(
///     SdkConfigBuilder::new()
///         .api_key("lk-...")
///         .agent_id("my-agent")
///         .build(),
/// )?;
///
/// let session_id = client.create_session(SessionParams::named("run")).await?;
/// let event_id = client.create_event(EventParams::generic("started"));
/// # let _ = (session_id, event_id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: SdkConfig,
    transport: Transport,
    queue: EventQueue,
    sessions: Sessions,
    prompts: Prompts,
    handle: tokio::runtime::Handle,
    runtime: Mutex<Option<tokio::runtime::Runtime>>,
    own_sessions: Mutex<Vec<SessionId>>,
    shut_down: AtomicBool,
}

impl Client {
    /// Build a client from a configuration. Fails with a configuration
    /// error listing every missing or invalid option; this is never
    /// suppressed.
    pub fn new(config: SdkConfig) -> Result<Self> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(Error::Config(problems));
        }
        let agent_id = config
            .agent_id
            .clone()
            .ok_or_else(|| Error::Config(vec!["Agent ID is required (LUCIDIC_AGENT_ID)".into()]))?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("lucidic-queue")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        let transport = Transport::new(&config)?;
        let queue = EventQueue::start(&config, transport.clone(), &handle);
        let sessions = Sessions::new(transport.clone(), agent_id.clone());
        let prompts = Prompts::new(transport.clone(), agent_id);

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                queue,
                sessions,
                prompts,
                handle,
                runtime: Mutex::new(Some(runtime)),
                own_sessions: Mutex::new(Vec::new()),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Build a client purely from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(SdkConfig::from_env())
    }

    /// The resolved configuration.
    pub fn config(&self) -> &SdkConfig {
        &self.inner.config
    }

    // --- Sessions ---

    /// Create a session and make it the ambient active session. The
    /// server-assigned id is returned; it may differ from a proposed
    /// candidate.
    ///
    /// Configuration and authentication errors always propagate. Other
    /// failures return a placeholder id when error suppression is on; the
    /// placeholder is not activated, so subsequent ambient events become
    /// no-ops.
    pub async fn create_session(&self, params: SessionParams) -> Result<SessionId> {
        let auto_end = params.auto_end.unwrap_or(self.inner.config.auto_end);

        match self.inner.sessions.create(&params).await {
            Ok(session_id) => {
                context::set_active_session(session_id.clone());
                self.inner
                    .own_sessions
                    .lock()
                    .expect("own sessions lock")
                    .push(session_id.clone());
                shutdown::coordinator().register_session(
                    &session_id,
                    SessionHandle {
                        queue: self.inner.queue.clone(),
                        sessions: self.inner.sessions.clone(),
                        runtime: self.inner.handle.clone(),
                        auto_end,
                    },
                    self.inner.config.capture_signals,
                    self.inner.config.capture_panics,
                );
                Ok(session_id)
            }
            Err(err @ (Error::Config(_) | Error::Authentication(_))) => Err(err),
            Err(err) if self.inner.config.suppress_errors => {
                warn!(error = %err, "session creation failed; returning placeholder id");
                Ok(Uuid::new_v4().to_string())
            }
            Err(err) => Err(err),
        }
    }

    /// Blocking twin of [`create_session`](Self::create_session).
    ///
    /// Must not be called from async code; use the async version there.
    pub fn create_session_blocking(&self, params: SessionParams) -> Result<SessionId> {
        self.inner.handle.block_on(self.create_session(params))
    }

    /// End the ambient or specified session. Pending events for it are
    /// flushed first. Without a resolvable session this logs and returns.
    pub async fn end_session(&self, params: EndSessionParams) -> Result<()> {
        let Some(session_id) = params
            .session_id
            .clone()
            .or_else(context::current_session_id)
        else {
            warn!("no active session to end");
            return Ok(());
        };

        self.inner
            .queue
            .force_flush_async(Duration::from_secs(5))
            .await;

        let mut params = params;
        if let Some(masker) = &self.inner.config.masking {
            params.is_successful_reason = params.is_successful_reason.map(|r| masker.apply(&r));
            params.session_eval_reason = params.session_eval_reason.map(|r| masker.apply(&r));
        }

        match self.inner.sessions.end(&session_id, &params).await {
            Ok(()) => {}
            Err(err @ (Error::Config(_) | Error::Authentication(_))) => return Err(err),
            Err(err) if self.inner.config.suppress_errors => {
                warn!(error = %err, "session end failed")
            }
            Err(err) => return Err(err),
        }

        context::clear_active_session(&session_id);
        shutdown::coordinator().unregister_session(&session_id);
        self.inner
            .own_sessions
            .lock()
            .expect("own sessions lock")
            .retain(|id| id != &session_id);
        Ok(())
    }

    /// Blocking twin of [`end_session`](Self::end_session).
    pub fn end_session_blocking(&self, params: EndSessionParams) -> Result<()> {
        self.inner.handle.block_on(self.end_session(params))
    }

    /// Update attributes of the ambient or specified session without
    /// finishing it.
    pub async fn update_session(
        &self,
        session_id: Option<String>,
        task: Option<String>,
        tags: Option<Vec<String>>,
        is_successful: Option<bool>,
        is_successful_reason: Option<String>,
    ) -> Result<()> {
        let Some(session_id) = session_id.or_else(context::current_session_id) else {
            warn!("no active session to update");
            return Ok(());
        };
        let is_successful_reason = match (&self.inner.config.masking, is_successful_reason) {
            (Some(masker), Some(reason)) => Some(masker.apply(&reason)),
            (_, reason) => reason,
        };
        self.inner
            .sessions
            .update(&session_id, task, tags, is_successful, is_successful_reason)
            .await
    }

    // --- Events ---

    /// Build and enqueue an event, returning its client id immediately.
    ///
    /// Non-blocking: the enqueue path never waits on the network. Session
    /// and parent ids are resolved from the ambient context when not given
    /// explicitly; with no resolvable session a fresh id is returned and
    /// nothing is transmitted. This operation never fails.
    pub fn create_event(&self, params: EventParams) -> Uuid {
        let event_id = params.event_id.unwrap_or_else(Uuid::new_v4);

        let Some(session_id) = params
            .session_id
            .clone()
            .or_else(context::current_session_id)
        else {
            debug!("no active session; returning unattached event id");
            return event_id;
        };

        let parent = params
            .parent_event_id
            .or_else(context::current_parent_event_id);
        let occurred_at = params
            .occurred_at
            .unwrap_or_else(|| Utc::now().fixed_offset());

        let mut params = params;
        if let Some(masker) = &self.inner.config.masking {
            for (_, value) in params.fields.iter_mut() {
                masker.mask_json(value);
            }
        }

        let request = EventBuilder::build(params, session_id, event_id, parent, occurred_at);
        self.inner.queue.enqueue(request);
        event_id
    }

    /// Convenience for emitting an `error_traceback` event. When no
    /// traceback is given, the current backtrace is captured.
    pub fn create_error_event(
        &self,
        error: impl std::fmt::Display,
        traceback: Option<String>,
    ) -> Uuid {
        let traceback = traceback
            .unwrap_or_else(|| std::backtrace::Backtrace::force_capture().to_string());
        self.create_event(
            EventParams::new(EventKind::ErrorTraceback)
                .field("error", Value::String(error.to_string()))
                .field("traceback", Value::String(traceback)),
        )
    }

    // --- Function-call instrumentation ---

    /// Open a manual [`EventScope`]: the returned guard binds its event id
    /// as the current parent and emits one `function_call` event when
    /// dropped.
    pub fn event_scope(&self, function_name: &str, arguments: Value) -> EventScope {
        EventScope::enter(self.clone(), function_name, arguments)
    }

    /// Run `f` as an instrumented function call. Nested events created by
    /// `f` attach under the call's event. A panic emits an error sibling
    /// and resumes unwinding.
    pub fn observe<T, F>(&self, function_name: &str, arguments: Value, f: F) -> T
    where
        F: FnOnce() -> T,
        T: Serialize,
    {
        let mut scope = self.event_scope(function_name, arguments);
        let outcome = shutdown::with_panic_shield(|| catch_unwind(AssertUnwindSafe(f)));
        match outcome {
            Ok(value) => {
                scope.record_return(&value);
                drop(scope);
                value
            }
            Err(payload) => {
                scope.record_error(scope::panic_message(payload.as_ref()));
                drop(scope);
                resume_unwind(payload)
            }
        }
    }

    /// Like [`observe`](Self::observe) for fallible functions: an `Err`
    /// return emits an `error_traceback` sibling.
    pub fn observe_result<T, E, F>(
        &self,
        function_name: &str,
        arguments: Value,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        T: Serialize,
        E: std::fmt::Display,
    {
        let mut scope = self.event_scope(function_name, arguments);
        let result = f();
        match &result {
            Ok(value) => scope.record_return(value),
            Err(e) => scope.record_error(e.to_string()),
        }
        result
    }

    /// Async twin of [`observe`](Self::observe). The parent binding rides
    /// on the wrapped future, so cancellation restores it; a cancelled call
    /// emits nothing.
    pub async fn observe_async<T, Fut>(&self, function_name: &str, arguments: Value, fut: Fut) -> T
    where
        Fut: Future<Output = T>,
        T: Serialize,
    {
        let event_id = Uuid::new_v4();
        let parent = context::current_parent_event_id();
        let started = std::time::Instant::now();

        let value = context::with_parent(event_id, fut).await;

        scope::emit_function_call(
            self,
            event_id,
            parent,
            function_name,
            arguments,
            serde_json::to_value(&value).ok(),
            started.elapsed().as_secs_f64(),
        );
        value
    }

    /// Async twin of [`observe_result`](Self::observe_result).
    pub async fn observe_async_result<T, E, Fut>(
        &self,
        function_name: &str,
        arguments: Value,
        fut: Fut,
    ) -> std::result::Result<T, E>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Serialize,
        E: std::fmt::Display,
    {
        let event_id = Uuid::new_v4();
        let parent = context::current_parent_event_id();
        let started = std::time::Instant::now();

        let result = context::with_parent(event_id, fut).await;

        let return_value = result
            .as_ref()
            .ok()
            .and_then(|value| serde_json::to_value(value).ok());
        scope::emit_function_call(
            self,
            event_id,
            parent,
            function_name,
            arguments,
            return_value,
            started.elapsed().as_secs_f64(),
        );
        if let Err(e) = &result {
            scope::emit_error_sibling(self, parent, e.to_string());
        }
        result
    }

    // --- Prompts and credentials ---

    /// Fetch a prompt template and substitute `{{variable}}` placeholders.
    pub async fn get_prompt(
        &self,
        name: &str,
        label: &str,
        variables: &HashMap<String, String>,
    ) -> Result<String> {
        self.inner.prompts.get(name, label, variables).await
    }

    /// Blocking twin of [`get_prompt`](Self::get_prompt).
    pub fn get_prompt_blocking(
        &self,
        name: &str,
        label: &str,
        variables: &HashMap<String, String>,
    ) -> Result<String> {
        self.inner
            .handle
            .block_on(self.get_prompt(name, label, variables))
    }

    /// Verify the configured API key against the backend.
    pub async fn verify_api_key(&self) -> Result<Value> {
        self.inner.transport.verify_api_key().await
    }

    /// Blocking twin of [`verify_api_key`](Self::verify_api_key).
    pub fn verify_api_key_blocking(&self) -> Result<Value> {
        self.inner.handle.block_on(self.verify_api_key())
    }

    // --- Flush and shutdown ---

    /// True iff nothing is queued, deferred, or in flight.
    pub fn is_queue_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }

    /// Flush the event queue, blocking up to `timeout`. Never fails.
    pub fn force_flush(&self, timeout: Duration) {
        self.inner.queue.force_flush(timeout);
    }

    /// Async twin of [`force_flush`](Self::force_flush).
    pub async fn force_flush_async(&self, timeout: Duration) {
        self.inner.queue.force_flush_async(timeout).await;
    }

    /// Flush, end this client's auto-end sessions, and stop the pipeline.
    /// Idempotent; never fails. After it returns no further requests are
    /// issued.
    pub fn shutdown(&self, timeout: Duration) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let ids: Vec<SessionId> = self
            .inner
            .own_sessions
            .lock()
            .expect("own sessions lock")
            .drain(..)
            .collect();
        for session_id in &ids {
            shutdown::coordinator().end_registered_session(session_id);
        }
        self.inner.queue.shutdown(timeout);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.transport.base_url())
            .finish_non_exhaustive()
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let already_shut_down = self.shut_down.swap(true, Ordering::SeqCst);
        let runtime = self.runtime.lock().expect("runtime lock").take();
        let ids: Vec<SessionId> = if already_shut_down {
            Vec::new()
        } else {
            self.own_sessions
                .lock()
                .expect("own sessions lock")
                .drain(..)
                .collect()
        };
        let queue = self.queue.clone();

        // The wind-down blocks (flush, HTTP, runtime teardown), so it runs
        // on its own thread. From a plain thread we wait for it; from async
        // contexts joining would block a runtime worker, so it is detached.
        let worker = std::thread::Builder::new()
            .name("lucidic-drop".into())
            .spawn(move || {
                for session_id in &ids {
                    shutdown::coordinator().end_registered_session(session_id);
                }
                if !already_shut_down {
                    queue.shutdown(Duration::from_secs(5));
                }
                if let Some(runtime) = runtime {
                    runtime.shutdown_timeout(Duration::from_secs(2));
                }
            });

        if let Ok(worker) = worker {
            if tokio::runtime::Handle::try_current().is_err() {
                let _ = worker.join();
            }
        }
    }
}
