//! Data model for provisioning jobs: requests, the status state machine,
//! and terminal outcomes.

use serde::{Deserialize, Serialize};

use crate::content::CustomizationRecord;

/// An `owner/repo` pair on the repository host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Desired destination. Owner defaults to the caller's own login, repo
/// name to a slug derived from the template title and customer name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetSpec {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
}

/// Whether to attempt the provider-native fork before falling back to
/// create-and-replicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionMode {
    #[default]
    ForkPreferred,
    ImportPreferred,
}

/// Everything needed to run one provisioning job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Caller-supplied progress topic key.
    pub job_id: String,
    /// Public template to copy from.
    pub source: RepoRef,
    /// Desired destination (owner and name optional).
    #[serde(default)]
    pub target: TargetSpec,
    #[serde(default)]
    pub mode: ProvisionMode,
    /// Template title, used for repo-name derivation and prompt text.
    pub template_title: String,
    /// Customer customization fed to the content generator.
    pub customization: CustomizationRecord,
}

/// Job lifecycle states.
///
/// Transitions are monotonic along the cascade; the three abnormal
/// terminals (`PartialManualForkRequired`, `Failed`, `Cancelled`) are
/// reachable from any non-terminal state. No backward transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Forking,
    Creating,
    Replicating,
    WritingMetadata,
    Dispatching,
    Succeeded,
    PartialManualForkRequired,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded
                | JobStatus::PartialManualForkRequired
                | JobStatus::Failed
                | JobStatus::Cancelled
        )
    }

    /// Position along the forward cascade; terminals have no rank.
    fn rank(&self) -> Option<u8> {
        match self {
            JobStatus::Pending => Some(0),
            JobStatus::Forking => Some(1),
            JobStatus::Creating => Some(2),
            JobStatus::Replicating => Some(3),
            JobStatus::WritingMetadata => Some(4),
            JobStatus::Dispatching => Some(5),
            _ => None,
        }
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Forward skips are allowed (fork success jumps straight to
    /// `WritingMetadata`); terminals accept nothing.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobStatus::Succeeded => *self == JobStatus::Dispatching,
            JobStatus::PartialManualForkRequired | JobStatus::Failed | JobStatus::Cancelled => true,
            _ => match (self.rank(), next.rank()) {
                (Some(cur), Some(nxt)) => nxt > cur,
                _ => false,
            },
        }
    }
}

/// Which replication path ultimately populated the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Fork,
    TarballImport,
    LegacyImport,
    ContentCopy,
    /// Content was provisioned outside this job (manual fork / resume /
    /// pre-existing destination).
    Manual,
}

/// A created agent session, as returned by the session API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub session_id: String,
    pub session_url: Option<String>,
    pub status: String,
}

/// Terminal record for a fully provisioned and dispatched job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningOutcome {
    pub repository_url: String,
    pub owner: String,
    pub repo_name: String,
    pub created_new_repo: bool,
    pub strategy_used: Strategy,
    pub session: AgentSession,
}

/// Terminal record for the manual-fallback path: the caller completes the
/// fork by hand, then resumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualFork {
    pub message: String,
    /// Ready-to-use `https://<host>/<owner>/<repo>/fork` URL.
    pub fork_url: String,
    pub suggested_owner: String,
    pub suggested_repo: String,
    pub source: RepoRef,
}

/// What a job ends with when it does not fail outright.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutcome {
    Provisioned(ProvisioningOutcome),
    ManualForkRequired(ManualFork),
}
