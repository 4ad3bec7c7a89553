//! Session parameter types.

use serde::Serialize;

/// Parameters for creating (or continuing) a session.
#[derive(Debug, Clone, Default)]
pub struct SessionParams {
    /// Display name.
    pub session_name: Option<String>,
    /// Client-proposed session id; the backend may replace it.
    pub session_id: Option<String>,
    /// Task description.
    pub task: Option<String>,
    /// Session tags.
    pub tags: Vec<String>,
    /// Experiment association.
    pub experiment_id: Option<String>,
    /// Dataset item association.
    pub dataset_item_id: Option<String>,
    /// Rubrics/evaluators to run against the session.
    pub evaluators: Vec<String>,
    /// Production monitoring flag.
    pub production_monitoring: bool,
    /// Whether the shutdown coordinator should end this session. `None`
    /// falls back to the configured default.
    pub auto_end: Option<bool>,
}

impl SessionParams {
    /// Start params with a display name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            session_name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Propose a session id (the backend may still replace it).
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Set the task description.
    pub fn task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Set session tags.
    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Associate with an experiment.
    pub fn experiment_id(mut self, id: impl Into<String>) -> Self {
        self.experiment_id = Some(id.into());
        self
    }

    /// Associate with a dataset item.
    pub fn dataset_item_id(mut self, id: impl Into<String>) -> Self {
        self.dataset_item_id = Some(id.into());
        self
    }

    /// Set evaluators.
    pub fn evaluators(mut self, evaluators: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.evaluators = evaluators.into_iter().map(Into::into).collect();
        self
    }

    /// Enable production monitoring.
    pub fn production_monitoring(mut self, enabled: bool) -> Self {
        self.production_monitoring = enabled;
        self
    }

    /// Override the auto-end behavior for this session.
    pub fn auto_end(mut self, auto_end: bool) -> Self {
        self.auto_end = Some(auto_end);
        self
    }
}

/// Parameters for ending a session.
#[derive(Debug, Clone, Default)]
pub struct EndSessionParams {
    /// Session to end; the ambient session when absent.
    pub session_id: Option<String>,
    /// Whether the session succeeded.
    pub is_successful: Option<bool>,
    /// Reason for the success/failure verdict.
    pub is_successful_reason: Option<String>,
    /// Evaluation score.
    pub session_eval: Option<f64>,
    /// Evaluation reason.
    pub session_eval_reason: Option<String>,
}

impl EndSessionParams {
    /// End the ambient session with a success verdict.
    pub fn successful() -> Self {
        Self {
            is_successful: Some(true),
            ..Default::default()
        }
    }

    /// End the ambient session with a failure verdict and reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            is_successful: Some(false),
            is_successful_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Target a specific session instead of the ambient one.
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Attach an evaluation score.
    pub fn eval(mut self, score: f64, reason: impl Into<String>) -> Self {
        self.session_eval = Some(score);
        self.session_eval_reason = Some(reason.into());
        self
    }
}

/// Wire body for `POST initsession`. `current_time` is injected by the
/// transport.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct InitSessionRequest<'a> {
    pub agent_id: &'a str,
    pub session_name: &'a str,
    pub session_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<&'a str>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub tags: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datasetitem_id: Option<&'a str>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub evaluators: &'a [String],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub production_monitoring: bool,
}

/// Wire body for `PUT updatesession`.
#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct UpdateSessionRequest {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_finished: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_successful: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_successful_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_eval: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_eval_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}
