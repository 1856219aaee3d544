//! Agent session dispatch.
//!
//! The final cascade step creates one coding-agent session against the
//! session API. Requests are idempotent on the provider side (same prompt
//! yields the same session), which is what makes job re-runs safe.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::Settings;
use crate::errors::DispatchError;
use crate::job::AgentSession;

/// The session API rejects prompts over 30,000 characters; stay under it
/// with a buffer.
const PROMPT_LIMIT: usize = 29_000;
const PROMPT_TRUNCATE_TO: usize = 28_000;
const TRUNCATION_MARKER: &str = "...\n\n[Content truncated to fit the session API length limit]";

const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates agent sessions. One method, so tests can record dispatches
/// with a few lines of fake.
#[async_trait]
pub trait AgentApi: Send + Sync {
    async fn create_session(&self, prompt: &str) -> Result<AgentSession, DispatchError>;
}

/// HTTP client for the agent session API.
pub struct SessionClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl SessionClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: settings.agent_api_base.trim_end_matches('/').to_string(),
            api_key: settings.agent_api_key.clone(),
        }
    }
}

#[async_trait]
impl AgentApi for SessionClient {
    async fn create_session(&self, prompt: &str) -> Result<AgentSession, DispatchError> {
        let prompt = bound_prompt(prompt);
        let response = self
            .http
            .post(format!("{}/v1/sessions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&json!({ "prompt": prompt, "idempotent": true }))
            .timeout(SESSION_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: SessionResponse = response.json().await?;
            return Ok(AgentSession {
                session_id: body.session_id,
                session_url: body.url,
                status: body.status.unwrap_or_else(|| "created".to_string()),
            });
        }

        let message = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED => Err(DispatchError::Auth),
            StatusCode::TOO_MANY_REQUESTS => Err(DispatchError::RateLimited),
            _ => Err(DispatchError::Api {
                status: status.as_u16(),
                message,
            }),
        }
    }
}

/// Stand-in used in mock mode when no agent API key is configured.
/// Fabricates a session so the cascade can be exercised end to end.
pub struct MockAgent;

#[async_trait]
impl AgentApi for MockAgent {
    async fn create_session(&self, prompt: &str) -> Result<AgentSession, DispatchError> {
        let session_id = format!("mock-session-{}", uuid::Uuid::new_v4());
        info!(session_id = %session_id, prompt_length = prompt.len(), "mock agent session created");
        Ok(AgentSession {
            session_id,
            session_url: None,
            status: "mocked".to_string(),
        })
    }
}

/// The session API returns `url`, not `session_url`.
#[derive(Debug, Deserialize)]
struct SessionResponse {
    session_id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Cap the prompt under the session API limit, leaving a visible marker
/// so a truncated prompt is never mistaken for a complete one.
pub fn bound_prompt(prompt: &str) -> String {
    if prompt.len() <= PROMPT_LIMIT {
        return prompt.to_string();
    }
    warn!(
        length = prompt.len(),
        limit = PROMPT_LIMIT,
        "prompt over session API limit, truncating"
    );
    let mut end = PROMPT_TRUNCATE_TO;
    while !prompt.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &prompt[..end], TRUNCATION_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_prompt_untouched() {
        let prompt = "customize the template";
        assert_eq!(bound_prompt(prompt), prompt);
    }

    #[test]
    fn test_prompt_at_limit_untouched() {
        let prompt = "x".repeat(PROMPT_LIMIT);
        assert_eq!(bound_prompt(&prompt).len(), PROMPT_LIMIT);
    }

    #[test]
    fn test_long_prompt_truncated_with_marker() {
        let prompt = "x".repeat(40_000);
        let bounded = bound_prompt(&prompt);
        assert_eq!(bounded.len(), PROMPT_TRUNCATE_TO + TRUNCATION_MARKER.len());
        assert!(bounded.len() < PROMPT_LIMIT);
        assert!(bounded.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // Multi-byte characters straddling the cut point must not split.
        let prompt = "é".repeat(20_000);
        let bounded = bound_prompt(&prompt);
        assert!(bounded.ends_with(TRUNCATION_MARKER));
        assert!(bounded.is_char_boundary(bounded.len() - TRUNCATION_MARKER.len()));
    }

    #[test]
    fn test_session_response_field_names() {
        let body = r#"{"session_id":"devin-123","url":"https://app.devin.ai/sessions/123","status":"running"}"#;
        let parsed: SessionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.session_id, "devin-123");
        assert_eq!(parsed.url.as_deref(), Some("https://app.devin.ai/sessions/123"));

        // Minimal response still parses.
        let minimal: SessionResponse = serde_json::from_str(r#"{"session_id":"s"}"#).unwrap();
        assert!(minimal.url.is_none());
        assert!(minimal.status.is_none());
    }
}
