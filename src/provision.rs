//! Provisioning orchestrator.
//!
//! Runs the cascade for one job: fork, create-and-replicate through the
//! strategy chain, integrity probe, metadata write, agent dispatch. Each
//! transition is published to the job's progress topic and recorded in
//! the in-memory registry. Cancellation is polled at step boundaries;
//! an in-flight host call is never interrupted.
//!
//! Rate-limit and forbidden failures do not walk the fallback chain.
//! They short-circuit to the manual-fork outcome, and if this job
//! created the destination repository and it is still empty, that repo
//! is deleted on the way out so the caller's manual fork has a clean
//! namespace.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use regex::Regex;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::Settings;
use crate::content::{ContentGenerator, METADATA_COMMIT_MESSAGE, METADATA_PATH, TemplateCard};
use crate::dispatch::AgentApi;
use crate::errors::ProvisionError;
use crate::host::{RepoHost, probe};
use crate::job::{
    JobOutcome, JobRequest, JobStatus, ManualFork, ProvisionMode, ProvisioningOutcome, RepoRef,
    Strategy,
};
use crate::progress::{DONE_EVENT, ProgressBroker};
use crate::replicate::{ReplicationProgress, ReplicationStrategy};

/// Registry snapshot for one job, as served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub status: JobStatus,
    /// Every status this job has passed through, in order.
    pub history: Vec<JobStatus>,
    pub outcome: Option<JobOutcome>,
    pub error: Option<String>,
}

impl JobRecord {
    fn new() -> Self {
        Self {
            status: JobStatus::Pending,
            history: vec![JobStatus::Pending],
            outcome: None,
            error: None,
        }
    }
}

pub struct Orchestrator {
    host: Arc<dyn RepoHost>,
    agent: Arc<dyn AgentApi>,
    content: Arc<dyn ContentGenerator>,
    broker: ProgressBroker,
    strategies: Vec<Box<dyn ReplicationStrategy>>,
    settings: Settings,
    jobs: Mutex<HashMap<String, JobRecord>>,
}

impl Orchestrator {
    pub fn new(
        host: Arc<dyn RepoHost>,
        agent: Arc<dyn AgentApi>,
        content: Arc<dyn ContentGenerator>,
        broker: ProgressBroker,
        strategies: Vec<Box<dyn ReplicationStrategy>>,
        settings: Settings,
    ) -> Self {
        Self {
            host,
            agent,
            content,
            broker,
            strategies,
            settings,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn broker(&self) -> &ProgressBroker {
        &self.broker
    }

    /// Registry snapshot for one job.
    pub fn job(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.lock().expect("job registry lock poisoned").get(job_id).cloned()
    }

    /// Run the full cascade for a job.
    ///
    /// Re-running a job id that already reached a successful terminal
    /// state returns the stored outcome without touching the host again;
    /// a live job id is rejected; failed and cancelled jobs re-run.
    pub async fn start_job(&self, request: JobRequest) -> Result<JobOutcome, ProvisionError> {
        if let Some(stored) = self.admit(&request.job_id)? {
            return Ok(stored);
        }
        let result = self.run(&request).await;
        self.settle_terminal(&request.job_id, result)
    }

    /// Manual-fork continuation: the caller forked by hand, so only
    /// validate that the repository exists and has content, then write
    /// metadata and dispatch.
    pub async fn resume(
        &self,
        request: JobRequest,
        target: RepoRef,
    ) -> Result<JobOutcome, ProvisionError> {
        if let Some(stored) = self.admit(&request.job_id)? {
            return Ok(stored);
        }
        let result = self.run_resume(&request, &target).await;
        self.settle_terminal(&request.job_id, result)
    }

    /// Admission control against the registry. `Ok(Some(..))` replays a
    /// stored successful outcome.
    fn admit(&self, job_id: &str) -> Result<Option<JobOutcome>, ProvisionError> {
        let mut jobs = self.jobs.lock().expect("job registry lock poisoned");
        if let Some(existing) = jobs.get(job_id) {
            match existing.status {
                JobStatus::Succeeded | JobStatus::PartialManualForkRequired => {
                    if let Some(outcome) = existing.outcome.clone() {
                        info!(job_id, "replaying stored outcome for finished job");
                        return Ok(Some(outcome));
                    }
                }
                JobStatus::Failed | JobStatus::Cancelled => {
                    info!(job_id, "re-running previously unsuccessful job");
                }
                _ => return Err(ProvisionError::JobAlreadyRunning(job_id.to_string())),
            }
        }
        jobs.insert(job_id.to_string(), JobRecord::new());
        Ok(None)
    }

    /// Record the terminal state and publish the `done` event.
    fn settle_terminal(
        &self,
        job_id: &str,
        result: Result<JobOutcome, ProvisionError>,
    ) -> Result<JobOutcome, ProvisionError> {
        match &result {
            Ok(JobOutcome::Provisioned(outcome)) => {
                self.transition(job_id, JobStatus::Succeeded);
                self.store_outcome(job_id, result.as_ref().ok().cloned(), None);
                self.broker.publish(
                    job_id,
                    DONE_EVENT,
                    json!({
                        "status": "success",
                        "repository_url": outcome.repository_url,
                        "session_id": outcome.session.session_id,
                    }),
                );
            }
            Ok(JobOutcome::ManualForkRequired(manual)) => {
                self.transition(job_id, JobStatus::PartialManualForkRequired);
                self.store_outcome(job_id, result.as_ref().ok().cloned(), None);
                self.broker.publish(
                    job_id,
                    DONE_EVENT,
                    json!({
                        "status": "manual_fork_required",
                        "fork_url": manual.fork_url,
                        "message": manual.message,
                    }),
                );
            }
            Err(ProvisionError::Cancelled) => {
                self.transition(job_id, JobStatus::Cancelled);
                self.store_outcome(job_id, None, Some("cancelled".to_string()));
                self.broker
                    .publish(job_id, DONE_EVENT, json!({ "status": "cancelled" }));
            }
            Err(err) => {
                warn!(job_id, error = %err, "provisioning job failed");
                self.transition(job_id, JobStatus::Failed);
                self.store_outcome(job_id, None, Some(err.to_string()));
                self.broker.publish(
                    job_id,
                    DONE_EVENT,
                    json!({ "status": "error", "message": err.to_string() }),
                );
            }
        }
        result
    }

    fn transition(&self, job_id: &str, next: JobStatus) {
        let mut jobs = self.jobs.lock().expect("job registry lock poisoned");
        if let Some(record) = jobs.get_mut(job_id) {
            if record.status.can_transition_to(next) {
                record.status = next;
                record.history.push(next);
            } else {
                warn!(job_id, from = ?record.status, to = ?next, "illegal status transition ignored");
            }
        }
    }

    fn store_outcome(&self, job_id: &str, outcome: Option<JobOutcome>, error: Option<String>) {
        let mut jobs = self.jobs.lock().expect("job registry lock poisoned");
        if let Some(record) = jobs.get_mut(job_id) {
            record.outcome = outcome;
            record.error = error;
        }
    }

    fn check_cancel(&self, job_id: &str) -> Result<(), ProvisionError> {
        if self.broker.is_cancelled(job_id) {
            Err(ProvisionError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn run(&self, request: &JobRequest) -> Result<JobOutcome, ProvisionError> {
        let job_id = request.job_id.as_str();
        let source = &request.source;
        self.check_cancel(job_id)?;

        self.broker
            .publish(job_id, "resolve-source", json!({ "source": source.slug() }));
        let login = self
            .host
            .viewer_login()
            .await
            .map_err(ProvisionError::Identity)?;
        let owner = match request.target.owner.as_deref() {
            Some(owner) if !owner.trim().is_empty() => owner.trim().to_string(),
            _ => login.clone(),
        };
        let is_org = owner != login;
        let desired_name = match request.target.repo.as_deref() {
            Some(repo) if !repo.trim().is_empty() => repo.trim().to_string(),
            _ => derive_repo_name(&request.template_title, &request.customization.company_name),
        };

        self.check_cancel(job_id)?;

        let mut created_new_repo = false;

        // Fork attempt. Any failure falls through to create-and-replicate;
        // the rate-limit special case is decided by the strategies there.
        if request.mode == ProvisionMode::ForkPreferred {
            self.transition(job_id, JobStatus::Forking);
            self.broker
                .publish(job_id, "fork-start", json!({ "source": source.slug() }));
            match self.host.fork(source, &owner, is_org).await {
                Ok(()) => {
                    // Forks are materialized asynchronously on the
                    // provider side.
                    tokio::time::sleep(self.settings.populate_settle).await;
                    let mut target = RepoRef::new(owner.clone(), source.repo.clone());
                    if desired_name != source.repo {
                        match self.host.rename(&target, &desired_name).await {
                            Ok(()) => target.repo = desired_name.clone(),
                            Err(err) => {
                                // Keep the source-derived name; the fork
                                // itself is intact.
                                warn!(job_id, error = %err, "rename after fork failed, keeping fork name");
                            }
                        }
                    }
                    self.broker
                        .publish(job_id, "fork-ok", json!({ "repo": target.slug() }));
                    return self
                        .finalize(request, &target, Strategy::Fork, true)
                        .await;
                }
                Err(err) => {
                    info!(job_id, error = %err, "fork unavailable, falling back to create-and-replicate");
                    self.broker
                        .publish(job_id, "fork-fallback", json!({ "error": err.to_string() }));
                }
            }
        }

        let target = RepoRef::new(owner, desired_name);

        // Create (or adopt) the destination.
        self.check_cancel(job_id)?;
        self.transition(job_id, JobStatus::Creating);
        self.broker
            .publish(job_id, "create-start", json!({ "repo": target.slug() }));
        match probe::exists(self.host.as_ref(), &target).await {
            Ok(true) => {
                match probe::is_empty(self.host.as_ref(), &target).await {
                    Ok(false) => {
                        // Already provisioned outside this job; skip
                        // straight to metadata and dispatch.
                        info!(job_id, repo = %target.slug(), "destination already has content");
                        return self
                            .finalize(request, &target, Strategy::Manual, false)
                            .await;
                    }
                    Ok(true) => {
                        info!(job_id, repo = %target.slug(), "adopting existing empty repository");
                    }
                    Err(err) => return Err(ProvisionError::Host(err)),
                }
            }
            Ok(false) => {
                if let Err(err) = self.host.create_repo(&target.owner, &target.repo, is_org).await
                {
                    if err.is_rate_limit() {
                        return self
                            .manual_fallback(request, &target, false, &err.to_string())
                            .await;
                    }
                    return Err(ProvisionError::CreateFailed {
                        owner: target.owner,
                        repo: target.repo,
                        source: err,
                    });
                }
                created_new_repo = true;
            }
            Err(err) => return Err(ProvisionError::Host(err)),
        }

        // Replication strategy chain.
        self.transition(job_id, JobStatus::Replicating);
        let mut strategy_used = None;
        let mut last_error = None;
        for strategy in &self.strategies {
            self.check_cancel(job_id)?;
            self.broker.publish(
                job_id,
                "populate-start",
                json!({ "strategy": strategy.name() }),
            );

            let progress = |p: ReplicationProgress| {
                self.broker.publish(
                    job_id,
                    "copy-progress",
                    json!({ "copied": p.copied, "total": p.total }),
                );
            };
            let should_cancel = || self.broker.is_cancelled(job_id);
            let result = strategy
                .replicate(self.host.as_ref(), source, &target, &progress, &should_cancel)
                .await;

            if result.success {
                let event = match strategy.kind() {
                    Strategy::ContentCopy => "copy-ok",
                    _ => "import-ok",
                };
                self.broker.publish(
                    job_id,
                    event,
                    json!({ "strategy": strategy.name(), "files": result.files_copied }),
                );
                strategy_used = Some(strategy.kind());
                break;
            }
            if result.is_rate_limited() {
                let reason = result
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "rate limited".to_string());
                return self
                    .manual_fallback(request, &target, created_new_repo, &reason)
                    .await;
            }
            match result.error {
                // No error on an unsuccessful result means a
                // cancellation checkpoint fired inside the strategy.
                None => return Err(ProvisionError::Cancelled),
                Some(err) if !err.advances_cascade() => return Err(ProvisionError::Host(err)),
                Some(err) => {
                    warn!(job_id, strategy = strategy.name(), error = %err, "replication strategy failed");
                    self.broker.publish(
                        job_id,
                        "populate-failed",
                        json!({ "strategy": strategy.name(), "error": err.to_string() }),
                    );
                    last_error = Some(err);
                }
            }
        }
        let Some(strategy_used) = strategy_used else {
            let err = last_error.expect("exhausted strategies leave a last error");
            return Err(ProvisionError::ReplicationExhausted(err));
        };

        // Integrity probe after a settle delay: an import can be accepted
        // but never materialize.
        tokio::time::sleep(self.settings.populate_settle).await;
        match probe::is_empty(self.host.as_ref(), &target).await {
            Ok(true) => {
                return self
                    .manual_fallback(
                        request,
                        &target,
                        created_new_repo,
                        "replication reported success but the repository is empty",
                    )
                    .await;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(job_id, error = %err, "post-replication probe failed, proceeding");
            }
        }

        self.finalize(request, &target, strategy_used, created_new_repo)
            .await
    }

    async fn run_resume(
        &self,
        request: &JobRequest,
        target: &RepoRef,
    ) -> Result<JobOutcome, ProvisionError> {
        self.check_cancel(&request.job_id)?;
        if !probe::exists(self.host.as_ref(), target)
            .await
            .map_err(ProvisionError::Host)?
        {
            return Err(ProvisionError::RepoMissing {
                owner: target.owner.clone(),
                repo: target.repo.clone(),
            });
        }
        if probe::is_empty(self.host.as_ref(), target)
            .await
            .map_err(ProvisionError::Host)?
        {
            return Err(ProvisionError::RepoEmpty {
                owner: target.owner.clone(),
                repo: target.repo.clone(),
            });
        }
        self.finalize(request, target, Strategy::Manual, false).await
    }

    /// Shared tail of every successful path: metadata write (best
    /// effort), then agent dispatch.
    async fn finalize(
        &self,
        request: &JobRequest,
        target: &RepoRef,
        strategy_used: Strategy,
        created_new_repo: bool,
    ) -> Result<JobOutcome, ProvisionError> {
        let job_id = request.job_id.as_str();
        let repo_url = self.host.html_url(target);
        let card = TemplateCard {
            title: request.template_title.clone(),
            description: None,
            source_url: self.host.html_url(&request.source),
        };

        self.check_cancel(job_id)?;
        self.transition(job_id, JobStatus::WritingMetadata);
        self.broker
            .publish(job_id, "write-agents", json!({ "repo": target.slug() }));
        let metadata = self.content.metadata_file(&card, &request.customization);
        if let Err(err) = self
            .host
            .create_file(target, METADATA_PATH, metadata.as_bytes(), METADATA_COMMIT_MESSAGE)
            .await
        {
            // The agent session can proceed without the metadata file.
            warn!(job_id, error = %err, "metadata file write failed");
        }

        self.check_cancel(job_id)?;
        self.transition(job_id, JobStatus::Dispatching);
        self.broker.publish(job_id, "agent-start", json!({}));
        let prompt = self
            .content
            .task_prompt(&card, &request.customization, &repo_url);
        let session = self.agent.create_session(&prompt).await?;
        info!(job_id, session_id = %session.session_id, repo = %target.slug(), "agent session created");

        Ok(JobOutcome::Provisioned(ProvisioningOutcome {
            repository_url: repo_url,
            owner: target.owner.clone(),
            repo_name: target.repo.clone(),
            created_new_repo,
            strategy_used,
            session,
        }))
    }

    /// The one place the manual-fork outcome is assembled. When this job
    /// created the destination and it is still empty, it is deleted here,
    /// and nowhere else, so cleanup happens exactly once.
    async fn manual_fallback(
        &self,
        request: &JobRequest,
        target: &RepoRef,
        created_new_repo: bool,
        reason: &str,
    ) -> Result<JobOutcome, ProvisionError> {
        let job_id = request.job_id.as_str();
        if created_new_repo {
            match probe::is_empty(self.host.as_ref(), target).await {
                Ok(true) => {
                    self.broker
                        .publish(job_id, "cleanup", json!({ "repo": target.slug() }));
                    if let Err(err) = self.host.delete_repo(target).await {
                        warn!(job_id, error = %err, "failed to delete empty repository");
                    }
                }
                Ok(false) => {
                    info!(job_id, repo = %target.slug(), "keeping partially populated repository");
                }
                Err(err) => {
                    warn!(job_id, error = %err, "emptiness probe failed, leaving repository in place");
                }
            }
        }

        let fork_url = self.host.fork_page_url(&request.source);
        Ok(JobOutcome::ManualForkRequired(ManualFork {
            message: format!(
                "Automated provisioning stopped ({}). Fork the template manually at {} as {}/{}, then resume the job.",
                reason, fork_url, target.owner, target.repo
            ),
            fork_url,
            suggested_owner: target.owner.clone(),
            suggested_repo: target.repo.clone(),
            source: request.source.clone(),
        }))
    }
}

static SLUG_CLEANUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug regex"));

/// Derive a destination repository name from the template title and the
/// customer name.
pub fn derive_repo_name(template_title: &str, company_name: &str) -> String {
    let raw = format!("{} {}", template_title, company_name).to_lowercase();
    let slug = SLUG_CLEANUP.replace_all(&raw, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "customized-template".to_string()
    } else {
        slug.chars().take(100).collect()
    }
}
