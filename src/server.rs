//! HTTP surface: job submission, status, progress streaming (SSE),
//! cancellation, and the manual-fork resume endpoint.
//!
//! Handlers stay thin. A job submission spawns the orchestrator as an
//! independent task and returns 202 immediately; everything about the
//! run is observable through the registry snapshot and the progress
//! stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::Settings;
use crate::content::{CustomizationRecord, TemplateContent};
use crate::errors::ProvisionError;
use crate::dispatch::{MockAgent, SessionClient};
use crate::host::github::GitHubClient;
use crate::host::mock::MockHost;
use crate::job::{JobRequest, ProvisionMode, RepoRef, TargetSpec};
use crate::progress::Frame;
use crate::provision::Orchestrator;
use crate::replicate::default_strategies;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub keepalive: Duration,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateJobRequest {
    /// Progress topic key; generated when absent.
    #[serde(default)]
    pub job_id: Option<String>,
    pub source: RepoRef,
    #[serde(default)]
    pub target: TargetSpec,
    #[serde(default)]
    pub mode: ProvisionMode,
    pub template_title: String,
    #[serde(default)]
    pub customization: CustomizationRecord,
}

#[derive(Deserialize)]
pub struct ResumeJobRequest {
    #[serde(default)]
    pub job_id: Option<String>,
    pub source: RepoRef,
    pub owner: String,
    pub repo: String,
    pub template_title: String,
    #[serde(default)]
    pub customization: CustomizationRecord,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/jobs", post(create_job))
        .route("/api/jobs/{job_id}", get(get_job))
        .route("/api/jobs/{job_id}/stream", get(stream_job))
        .route("/api/jobs/{job_id}/cancel", post(cancel_job))
        .route("/api/jobs/{job_id}/resume", post(resume_job))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn create_job(
    State(state): State<SharedState>,
    Json(payload): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.source.owner.trim().is_empty() || payload.source.repo.trim().is_empty() {
        return Err(ApiError::BadRequest("source owner and repo are required".into()));
    }
    if payload.template_title.trim().is_empty() {
        return Err(ApiError::BadRequest("template_title is required".into()));
    }
    let job_id = payload
        .job_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    if let Some(record) = state.orchestrator.job(&job_id) {
        if !record.status.is_terminal() {
            return Err(ApiError::Conflict(format!("job {} is already running", job_id)));
        }
    }

    let request = JobRequest {
        job_id: job_id.clone(),
        source: payload.source,
        target: payload.target,
        mode: payload.mode,
        template_title: payload.template_title,
        customization: payload.customization,
    };
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        // Terminal state, outcome, and errors land in the registry and
        // on the progress topic.
        let _ = orchestrator.start_job(request).await;
    });

    Ok((StatusCode::ACCEPTED, Json(json!({"job_id": job_id}))))
}

async fn get_job(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .orchestrator
        .job(&job_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown job {}", job_id)))
}

async fn stream_job(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let subscription = state.orchestrator.broker().subscribe(&job_id);
    let stream = subscription
        .into_stream(state.keepalive)
        .map(|frame| {
            Ok(match frame {
                Frame::Event(event) => SseEvent::default()
                    .event(event.event.clone())
                    .data(event.data.to_string()),
                Frame::Keepalive => SseEvent::default().comment("keep-alive"),
            })
        });
    Sse::new(stream)
}

async fn cancel_job(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    state.orchestrator.broker().cancel(&job_id);
    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "cancelled", "job_id": job_id})),
    )
}

async fn resume_job(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
    Json(payload): Json<ResumeJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.owner.trim().is_empty() || payload.repo.trim().is_empty() {
        return Err(ApiError::BadRequest("owner and repo are required".into()));
    }

    let target = RepoRef::new(payload.owner.trim(), payload.repo.trim());
    let request = JobRequest {
        job_id: job_id.clone(),
        source: payload.source,
        target: TargetSpec {
            owner: Some(target.owner.clone()),
            repo: Some(target.repo.clone()),
        },
        mode: ProvisionMode::default(),
        template_title: payload.template_title,
        customization: payload.customization,
    };

    // Unlike job submission, the resume path skips the cascade, so the
    // outcome is returned directly.
    match state.orchestrator.resume(request, target).await {
        Ok(outcome) => Ok((StatusCode::OK, Json(json!({"job_id": job_id, "outcome": outcome})))),
        Err(err @ ProvisionError::RepoMissing { .. }) => Err(ApiError::NotFound(err.to_string())),
        Err(err @ ProvisionError::RepoEmpty { .. }) => Err(ApiError::BadRequest(err.to_string())),
        Err(err @ ProvisionError::JobAlreadyRunning(_)) => Err(ApiError::Conflict(err.to_string())),
        Err(err) => Err(ApiError::Internal(err.to_string())),
    }
}

// ── Server bootstrap ──────────────────────────────────────────────────

/// Configuration for the provisioning server.
pub struct ServerConfig {
    pub port: u16,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            dev_mode: false,
        }
    }
}

/// Wire the orchestrator from settings. Missing credentials switch the
/// corresponding collaborator to its mock implementation.
pub fn build_orchestrator(settings: Settings) -> Arc<Orchestrator> {
    let host: Arc<dyn crate::host::RepoHost> = if settings.host_token.trim().is_empty() {
        warn!("no host token configured, running against the in-memory mock host");
        Arc::new(MockHost::with_sample_template())
    } else {
        Arc::new(GitHubClient::new(
            settings.host_token.clone(),
            &settings.host_api_base,
            &settings.host_web_base,
        ))
    };
    let agent: Arc<dyn crate::dispatch::AgentApi> = if settings.agent_api_key.trim().is_empty() {
        warn!("no agent API key configured, sessions will be mocked");
        Arc::new(MockAgent)
    } else {
        Arc::new(SessionClient::new(&settings))
    };
    let strategies = default_strategies(settings.copy_throttle);
    Arc::new(Orchestrator::new(
        host,
        agent,
        Arc::new(TemplateContent),
        crate::progress::ProgressBroker::new(),
        strategies,
        settings,
    ))
}

pub fn build_router(state: SharedState) -> Router {
    api_router().with_state(state)
}

/// Start the provisioning server.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let settings = Settings::from_env();
    let keepalive = settings.keepalive;
    let job_ttl = settings.job_ttl;
    let orchestrator = build_orchestrator(settings);

    // Garbage-collect abandoned progress topics.
    let broker = orchestrator.broker().clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            let purged = broker.purge_stale(job_ttl);
            if purged > 0 {
                info!(purged, "purged stale progress topics");
            }
        }
    });

    let state = Arc::new(AppState {
        orchestrator,
        keepalive,
    });
    let mut app = build_router(state);
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("templar listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::job::JobStatus;

    fn test_settings() -> Settings {
        Settings {
            populate_settle: Duration::ZERO,
            copy_throttle: Duration::ZERO,
            ..Settings::default()
        }
    }

    fn test_state() -> SharedState {
        Arc::new(AppState {
            orchestrator: build_orchestrator(test_settings()),
            keepalive: Duration::from_millis(50),
        })
    }

    fn test_app() -> Router {
        build_router(test_state())
    }

    async fn body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn job_payload(job_id: &str) -> serde_json::Value {
        json!({
            "job_id": job_id,
            "source": {"owner": "octo", "repo": "template"},
            "target": {"owner": null, "repo": "template-acme"},
            "template_title": "Sample Template",
            "customization": {
                "company_name": "Acme",
                "industry": "Retail",
                "use_case": "Support",
                "customer_scenario": "A support bot",
                "additional_requirements": "None"
            }
        })
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response.into_body()).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_create_job_is_accepted_with_generated_id() {
        let app = test_app();
        let mut payload = job_payload("");
        payload.as_object_mut().unwrap().remove("job_id");

        let response = app.oneshot(post_json("/api/jobs", payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response.into_body()).await;
        assert!(!body["job_id"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_job_rejects_blank_source() {
        let app = test_app();
        let payload = json!({
            "source": {"owner": "", "repo": ""},
            "template_title": "t"
        });
        let response = app.oneshot(post_json("/api/jobs", payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/jobs/no-such-job")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_is_accepted() {
        let app = test_app();
        let response = app
            .oneshot(post_json("/api/jobs/some-job/cancel", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_resume_requires_owner_and_repo() {
        let app = test_app();
        let payload = json!({
            "source": {"owner": "octo", "repo": "template"},
            "owner": "",
            "repo": "",
            "template_title": "t"
        });
        let response = app
            .oneshot(post_json("/api/jobs/j1/resume", payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_resume_unknown_repo_is_404() {
        let app = test_app();
        let payload = json!({
            "source": {"owner": "octo", "repo": "template"},
            "owner": "ghost",
            "repo": "nowhere",
            "template_title": "t"
        });
        let response = app
            .oneshot(post_json("/api/jobs/j-resume-404/resume", payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_resume_on_populated_repo_returns_outcome() {
        let app = test_app();
        let payload = json!({
            "source": {"owner": "octo", "repo": "template"},
            "owner": "octo",
            "repo": "template",
            "template_title": "Sample Template"
        });
        let response = app
            .oneshot(post_json("/api/jobs/j-resume-ok/resume", payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response.into_body()).await;
        assert_eq!(body["outcome"]["kind"], "provisioned");
        assert_eq!(body["outcome"]["strategy_used"], "manual");
    }

    #[tokio::test]
    async fn test_job_runs_to_success_against_mock_host() {
        let state = test_state();
        let app = build_router(state.clone());

        let response = app
            .oneshot(post_json("/api/jobs", job_payload("e2e-job")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let mut status = None;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let Some(record) = state.orchestrator.job("e2e-job") {
                if record.status.is_terminal() {
                    status = Some(record.status);
                    break;
                }
            }
        }
        assert_eq!(status, Some(JobStatus::Succeeded));
    }
}
