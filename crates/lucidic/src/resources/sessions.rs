//! Session lifecycle operations against the backend.

use crate::context::SessionId;
use crate::error::{Error, Result};
use crate::http::Transport;
use crate::types::session::{InitSessionRequest, UpdateSessionRequest};
use crate::types::{EndSessionParams, SessionParams};
use http::Method;
use lru::LruCache;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

/// Candidate→real session id mappings kept for idempotent re-creates.
const CANDIDATE_MAP_CAPACITY: usize = 500;

/// Session resource: create, update, and end sessions.
///
/// The backend owns session identity: a client-proposed candidate id may be
/// replaced by the server's. The mapping is remembered in a bounded LRU so
/// repeated creates with the same candidate return the same real id instead
/// of opening a second session.
#[derive(Clone)]
pub struct Sessions {
    inner: Arc<SessionsInner>,
}

struct SessionsInner {
    transport: Transport,
    agent_id: String,
    candidate_map: Mutex<LruCache<String, SessionId>>,
}

impl Sessions {
    /// Create the resource.
    pub(crate) fn new(transport: Transport, agent_id: String) -> Self {
        Self {
            inner: Arc::new(SessionsInner {
                transport,
                agent_id,
                candidate_map: Mutex::new(LruCache::new(
                    NonZeroUsize::new(CANDIDATE_MAP_CAPACITY).expect("nonzero capacity"),
                )),
            }),
        }
    }

    /// Create (or continue) a session. Returns the server-assigned id.
    pub async fn create(&self, params: &SessionParams) -> Result<SessionId> {
        let candidate = params
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Some(real) = self
            .inner
            .candidate_map
            .lock()
            .expect("candidate map lock")
            .get(&candidate)
            .cloned()
        {
            debug!(%candidate, %real, "session candidate already mapped");
            return Ok(real);
        }

        let session_name = params.session_name.as_deref().unwrap_or("Unnamed Session");
        let request = InitSessionRequest {
            agent_id: &self.inner.agent_id,
            session_name,
            session_id: &candidate,
            task: params.task.as_deref(),
            tags: &params.tags,
            experiment_id: params.experiment_id.as_deref(),
            datasetitem_id: params.dataset_item_id.as_deref(),
            evaluators: &params.evaluators,
            production_monitoring: params.production_monitoring,
        };

        let response = self
            .inner
            .transport
            .request(Method::POST, "initsession", Some(serde_json::to_value(&request)?))
            .await?;

        // The backend's id wins over the candidate.
        let real = response
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| candidate.clone());

        self.inner
            .candidate_map
            .lock()
            .expect("candidate map lock")
            .put(candidate, real.clone());

        info!(session_id = %real, name = %session_name, "session created");
        Ok(real)
    }

    /// Update session attributes without finishing it.
    pub async fn update(
        &self,
        session_id: &str,
        task: Option<String>,
        tags: Option<Vec<String>>,
        is_successful: Option<bool>,
        is_successful_reason: Option<String>,
    ) -> Result<()> {
        let request = UpdateSessionRequest {
            session_id: session_id.to_string(),
            task,
            tags,
            is_successful,
            is_successful_reason,
            ..Default::default()
        };
        self.put_update(request).await
    }

    /// Finish a session, optionally with a success verdict and evaluation.
    pub async fn end(&self, session_id: &str, params: &EndSessionParams) -> Result<()> {
        let request = UpdateSessionRequest {
            session_id: session_id.to_string(),
            is_finished: Some(true),
            is_successful: params.is_successful,
            is_successful_reason: params.is_successful_reason.clone(),
            session_eval: params.session_eval,
            session_eval_reason: params.session_eval_reason.clone(),
            ..Default::default()
        };
        self.put_update(request).await?;
        info!(%session_id, "session ended");
        Ok(())
    }

    async fn put_update(&self, request: UpdateSessionRequest) -> Result<()> {
        self.inner
            .transport
            .request(
                Method::PUT,
                "updatesession",
                Some(serde_json::to_value(&request).map_err(Error::from)?),
            )
            .await?;
        Ok(())
    }
}
