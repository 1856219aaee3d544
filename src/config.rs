//! Runtime configuration for Templar.
//!
//! All settings come from environment variables (with `.env` support via
//! dotenvy) and carry sensible defaults. Only the two credentials are
//! required to talk to real services; everything else tunes timeouts and
//! pacing.

use std::time::Duration;

/// Default GitHub REST API base.
const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Default web host used for repository and manual-fork URLs.
const DEFAULT_WEB_BASE: &str = "https://github.com";

/// Default agent session API base.
const DEFAULT_AGENT_API_BASE: &str = "https://api.devin.ai";

/// Settle delay between a populate attempt and the post-replication
/// integrity probe, giving the host time to materialize the repo.
const DEFAULT_POPULATE_SETTLE_SECS: u64 = 3;

/// Fixed throttle between per-file content writes (rate-limit courtesy).
const DEFAULT_COPY_THROTTLE_MS: u64 = 250;

/// Keepalive interval for progress streams.
const DEFAULT_KEEPALIVE_SECS: u64 = 15;

/// TTL after which an unconsumed job topic is garbage-collected.
const DEFAULT_JOB_TTL_SECS: u64 = 1800;

/// Runtime settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Repository host credential (e.g. a GitHub PAT).
    pub host_token: String,
    /// Repository host REST API base URL.
    pub host_api_base: String,
    /// Repository host web base URL (repository/fork links).
    pub host_web_base: String,
    /// Agent session API base URL.
    pub agent_api_base: String,
    /// Agent session API credential.
    pub agent_api_key: String,
    /// Delay before the post-populate integrity probe.
    pub populate_settle: Duration,
    /// Sleep between per-file writes in the content-copy strategy.
    pub copy_throttle: Duration,
    /// Progress stream keepalive interval.
    pub keepalive: Duration,
    /// TTL for unconsumed job state.
    pub job_ttl: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host_token: String::new(),
            host_api_base: DEFAULT_API_BASE.to_string(),
            host_web_base: DEFAULT_WEB_BASE.to_string(),
            agent_api_base: DEFAULT_AGENT_API_BASE.to_string(),
            agent_api_key: String::new(),
            populate_settle: Duration::from_secs(DEFAULT_POPULATE_SETTLE_SECS),
            copy_throttle: Duration::from_millis(DEFAULT_COPY_THROTTLE_MS),
            keepalive: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
            job_ttl: Duration::from_secs(DEFAULT_JOB_TTL_SECS),
        }
    }
}

impl Settings {
    /// Load settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        // Best-effort .env load; absence is normal in production.
        let _ = dotenvy::dotenv();

        let defaults = Settings::default();
        Self {
            host_token: env_or("GITHUB_TOKEN", ""),
            host_api_base: env_or("GITHUB_API_BASE", &defaults.host_api_base),
            host_web_base: env_or("GITHUB_WEB_BASE", &defaults.host_web_base),
            agent_api_base: env_or("AGENT_API_BASE", &defaults.agent_api_base),
            agent_api_key: env_or("AGENT_API_KEY", ""),
            populate_settle: duration_secs_or("POPULATE_SETTLE_SECS", defaults.populate_settle),
            copy_throttle: duration_ms_or("COPY_THROTTLE_MS", defaults.copy_throttle),
            keepalive: duration_secs_or("PROGRESS_KEEPALIVE_SECS", defaults.keepalive),
            job_ttl: duration_secs_or("JOB_TTL_SECS", defaults.job_ttl),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn duration_secs_or(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn duration_ms_or(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.host_api_base, "https://api.github.com");
        assert_eq!(s.host_web_base, "https://github.com");
        assert_eq!(s.keepalive, Duration::from_secs(15));
        assert_eq!(s.copy_throttle, Duration::from_millis(250));
    }

    #[test]
    fn test_env_or_empty_falls_back() {
        // Unset or blank values must not override defaults.
        assert_eq!(env_or("TEMPLAR_TEST_UNSET_KEY", "fallback"), "fallback");
    }

    #[test]
    fn test_duration_parsers_ignore_garbage() {
        assert_eq!(
            duration_secs_or("TEMPLAR_TEST_UNSET_KEY", Duration::from_secs(7)),
            Duration::from_secs(7)
        );
        assert_eq!(
            duration_ms_or("TEMPLAR_TEST_UNSET_KEY", Duration::from_millis(9)),
            Duration::from_millis(9)
        );
    }
}
