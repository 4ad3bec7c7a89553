//! Prompt retrieval and template substitution.

use crate::error::{Error, Result};
use crate::http::Transport;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Prompt resource: fetches prompt templates from the backend and fills in
/// `{{variable}}` placeholders. Fetched templates are cached per
/// (name, label).
#[derive(Clone)]
pub struct Prompts {
    inner: Arc<PromptsInner>,
}

struct PromptsInner {
    transport: Transport,
    agent_id: String,
    cache: Mutex<HashMap<(String, String), String>>,
}

impl Prompts {
    pub(crate) fn new(transport: Transport, agent_id: String) -> Self {
        Self {
            inner: Arc::new(PromptsInner {
                transport,
                agent_id,
                cache: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Fetch the raw prompt template for `name` under `label`.
    pub async fn fetch(&self, name: &str, label: &str) -> Result<String> {
        let key = (name.to_string(), label.to_string());
        if let Some(cached) = self.inner.cache.lock().expect("prompt cache lock").get(&key) {
            debug!(prompt = name, label, "prompt cache hit");
            return Ok(cached.clone());
        }

        let response = self
            .inner
            .transport
            .get_with_params(
                "getprompt",
                &[
                    ("agent_id", &self.inner.agent_id),
                    ("prompt_name", name),
                    ("label", label),
                ],
            )
            .await?;

        let content = response
            .get("prompt_content")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Prompt(format!("no prompt_content returned for '{name}'")))?
            .to_string();

        self.inner
            .cache
            .lock()
            .expect("prompt cache lock")
            .insert(key, content.clone());
        Ok(content)
    }

    /// Fetch a prompt and substitute `{{variable}}` placeholders.
    pub async fn get(
        &self,
        name: &str,
        label: &str,
        variables: &HashMap<String, String>,
    ) -> Result<String> {
        let template = self.fetch(name, label).await?;
        substitute(&template, variables)
    }
}

/// Replace each `{{key}}` with its value. Every supplied variable must occur
/// in the template, and no placeholder may remain afterwards.
pub fn substitute(template: &str, variables: &HashMap<String, String>) -> Result<String> {
    let mut prompt = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{key}}}}}");
        if !prompt.contains(&placeholder) {
            return Err(Error::Prompt(format!(
                "variable '{key}' not found in prompt template"
            )));
        }
        prompt = prompt.replace(&placeholder, value);
    }

    if let (Some(open), Some(close)) = (prompt.find("{{"), prompt.find("}}")) {
        if open < close {
            return Err(Error::Prompt(
                "unreplaced variable left in prompt template".to_string(),
            ));
        }
    }

    Ok(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SdkConfigBuilder;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_all_placeholders() {
        let result = substitute("Hello {{name}}, task: {{task}}", &vars(&[
            ("name", "Ada"),
            ("task", "review"),
        ]))
        .unwrap();
        assert_eq!(result, "Hello Ada, task: review");
    }

    #[test]
    fn missing_variable_is_an_error() {
        let err = substitute("Hello {{name}}", &vars(&[("missing", "x")])).unwrap_err();
        assert!(matches!(err, Error::Prompt(_)));
    }

    #[test]
    fn unreplaced_placeholder_is_an_error() {
        let err = substitute("Hello {{name}}, {{left}}", &vars(&[("name", "Ada")])).unwrap_err();
        assert!(matches!(err, Error::Prompt(_)));
    }

    #[tokio::test]
    async fn fetches_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/getprompt"))
            .and(query_param("agent_id", "agent-1"))
            .and(query_param("prompt_name", "greet"))
            .and(query_param("label", "production"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"prompt_content": "hi {{name}}"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let config = SdkConfigBuilder::new()
            .api_key("lk-test")
            .agent_id("agent-1")
            .base_url(server.uri())
            .build();
        let prompts = Prompts::new(Transport::new(&config).unwrap(), "agent-1".into());

        let first = prompts
            .get("greet", "production", &vars(&[("name", "Ada")]))
            .await
            .unwrap();
        assert_eq!(first, "hi Ada");

        // Second call is served from cache; the mock expects exactly one hit.
        let second = prompts
            .get("greet", "production", &vars(&[("name", "Bob")]))
            .await
            .unwrap();
        assert_eq!(second, "hi Bob");
        server.verify().await;
    }
}
