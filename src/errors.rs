//! Typed error hierarchy for the Templar provisioning service.
//!
//! Three top-level enums cover the three subsystems: `HostError` for
//! repository host API failures (pre-classified by kind),
//! `DispatchError` for the agent session API, and `ProvisionError` for
//! orchestrator-level job failures.
//!
//! Classification of host failures happens in exactly one place
//! ([`HostError::classify`]) so the cascade never string-matches status
//! text at call sites.

use thiserror::Error;

/// Errors from the repository host API.
///
/// The orchestrator's cascade decisions key off the variant, not the
/// message: `RateLimit` short-circuits to the manual-fallback path,
/// `Timeout`/`Status`/`Transport` advance to the next strategy, and
/// `Auth`/`NotFound` are fatal for the step that produced them.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited or forbidden: {0}")]
    RateLimit(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl HostError {
    /// Classify a non-2xx host response into an error variant.
    ///
    /// Status codes decide first; the response body is consulted only to
    /// catch providers that report rate limiting under a generic status.
    pub fn classify(status: u16, body: &str) -> Self {
        let message = truncate_message(body);
        match status {
            401 => HostError::Auth(message),
            403 | 429 => HostError::RateLimit(message),
            404 => HostError::NotFound(message),
            _ => {
                let lower = body.to_lowercase();
                if lower.contains("rate limit") || lower.contains("forbidden") {
                    HostError::RateLimit(message)
                } else {
                    HostError::Status { status, message }
                }
            }
        }
    }

    /// Rate-limit/forbidden failures stop the whole cascade rather than
    /// advancing to the next strategy.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, HostError::RateLimit(_))
    }

    /// Whether the cascade may advance to the next fallback after this
    /// failure. Authentication errors are surfaced instead: the next
    /// strategy would fail the same way.
    pub fn advances_cascade(&self) -> bool {
        matches!(
            self,
            HostError::Timeout(_)
                | HostError::Status { .. }
                | HostError::Transport(_)
                | HostError::NotFound(_)
        )
    }
}

impl From<reqwest::Error> for HostError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HostError::Timeout(err.to_string())
        } else {
            HostError::Transport(err.to_string())
        }
    }
}

/// Errors from the agent session API.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid agent API key")]
    Auth,

    #[error("agent API rate limit exceeded; try again later")]
    RateLimited,

    #[error("agent API request timed out")]
    Timeout,

    #[error("agent API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to reach agent API: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DispatchError::Timeout
        } else {
            DispatchError::Transport(err.to_string())
        }
    }
}

/// Orchestrator-level failures for a provisioning job.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("job {0} is already running")]
    JobAlreadyRunning(String),

    #[error("job was cancelled")]
    Cancelled,

    #[error("failed to identify host user: {0}")]
    Identity(HostError),

    #[error("failed to create repository {owner}/{repo}: {source}")]
    CreateFailed {
        owner: String,
        repo: String,
        #[source]
        source: HostError,
    },

    #[error("all replication strategies failed; last error: {0}")]
    ReplicationExhausted(HostError),

    #[error("repository {owner}/{repo} not found; fork the template first, then resume")]
    RepoMissing { owner: String, repo: String },

    #[error("repository {owner}/{repo} is empty; fork the template with contents, then resume")]
    RepoEmpty { owner: String, repo: String },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Host(HostError),
}

/// Cap provider message length so errors stay readable in logs and API
/// responses.
fn truncate_message(body: &str) -> String {
    const MAX: usize = 300;
    let trimmed = body.trim();
    if trimmed.len() <= MAX {
        trimmed.to_string()
    } else {
        let mut end = MAX;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_401_is_auth() {
        let err = HostError::classify(401, "Bad credentials");
        assert!(matches!(err, HostError::Auth(_)));
    }

    #[test]
    fn test_classify_403_is_rate_limit() {
        let err = HostError::classify(403, "API rate limit exceeded");
        assert!(err.is_rate_limit());
    }

    #[test]
    fn test_classify_429_is_rate_limit() {
        let err = HostError::classify(429, "slow down");
        assert!(err.is_rate_limit());
    }

    #[test]
    fn test_classify_404_is_not_found() {
        let err = HostError::classify(404, "Not Found");
        assert!(matches!(err, HostError::NotFound(_)));
        assert!(!err.is_rate_limit());
    }

    #[test]
    fn test_classify_rate_limit_message_under_generic_status() {
        let err = HostError::classify(422, "You have exceeded a secondary rate limit");
        assert!(err.is_rate_limit());
    }

    #[test]
    fn test_classify_forbidden_message_under_generic_status() {
        let err = HostError::classify(400, "Repository access forbidden by policy");
        assert!(err.is_rate_limit());
    }

    #[test]
    fn test_classify_generic_status() {
        let err = HostError::classify(500, "boom");
        assert!(matches!(err, HostError::Status { status: 500, .. }));
        assert!(err.advances_cascade());
    }

    #[test]
    fn test_auth_does_not_advance_cascade() {
        assert!(!HostError::Auth("bad".into()).advances_cascade());
    }

    #[test]
    fn test_not_found_advances_cascade() {
        assert!(HostError::NotFound("gone".into()).advances_cascade());
    }

    #[test]
    fn test_rate_limit_does_not_advance_cascade() {
        assert!(!HostError::RateLimit("limited".into()).advances_cascade());
    }

    #[test]
    fn test_message_truncation() {
        let body = "x".repeat(1000);
        let err = HostError::classify(500, &body);
        match err {
            HostError::Status { message, .. } => {
                assert!(message.len() < 400);
                assert!(message.ends_with("..."));
            }
            _ => panic!("expected Status variant"),
        }
    }
}
