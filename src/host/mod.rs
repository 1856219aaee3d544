//! Repository host seam.
//!
//! The orchestrator and replication strategies talk to the host through
//! the narrow [`RepoHost`] trait: identity lookup, existence/content
//! probes, fork/create/delete, single-file writes, git-object writes for
//! the tarball import, tarball download, and the legacy importer. The
//! production implementation is [`github::GitHubClient`];
//! [`mock::MockHost`] backs mock mode and most tests.

pub mod github;
pub mod mock;
pub mod probe;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::HostError;
use crate::job::RepoRef;

/// Repository metadata subset the cascade cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoInfo {
    pub default_branch: String,
    /// Host-reported size; `0` is one of the emptiness signals, though
    /// the content listing is preferred since metadata caches lag right
    /// after creation.
    #[serde(default)]
    pub size: u64,
    pub html_url: String,
}

/// Whether a directory listing entry is a file or a subdirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    /// Symlinks, submodules, and anything else the copy strategy skips.
    #[serde(other)]
    Other,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

/// A file destined for the single-commit tree of the tarball import.
#[derive(Debug, Clone)]
pub struct TreeFile {
    pub path: String,
    pub blob_sha: String,
}

/// Narrow contract over the repository host API.
///
/// Every method maps to a single host call; retries, pacing, and fallback
/// ordering live in the callers.
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// Stable login of the authenticated user or installation.
    async fn viewer_login(&self) -> Result<String, HostError>;

    /// Repository metadata. `NotFound` means the repo does not exist.
    async fn get_repo(&self, repo: &RepoRef) -> Result<RepoInfo, HostError>;

    /// List one directory level. `path` is empty for the root.
    async fn list_dir(&self, repo: &RepoRef, path: &str) -> Result<Vec<DirEntry>, HostError>;

    /// Decoded file content. `NotFound` doubles as the skip-if-exists
    /// probe in the copy strategy.
    async fn read_file(&self, repo: &RepoRef, path: &str) -> Result<Vec<u8>, HostError>;

    /// Provider-native fork of `source` into `target_owner`'s namespace.
    /// `organization` is set when the target owner is not the caller.
    async fn fork(&self, source: &RepoRef, target_owner: &str, is_org: bool)
    -> Result<(), HostError>;

    /// Rename a repository.
    async fn rename(&self, repo: &RepoRef, new_name: &str) -> Result<(), HostError>;

    /// Create an empty repository under the user or an organization.
    async fn create_repo(&self, owner: &str, name: &str, is_org: bool) -> Result<(), HostError>;

    /// Delete a repository. Only ever called on a repo this service just
    /// created.
    async fn delete_repo(&self, repo: &RepoRef) -> Result<(), HostError>;

    /// Create or update a file through the single-file write call.
    async fn create_file(
        &self,
        repo: &RepoRef,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), HostError>;

    /// Download the default-branch tarball (gzip'd tar).
    async fn download_tarball(&self, repo: &RepoRef) -> Result<Vec<u8>, HostError>;

    /// Create a content-addressed blob; returns its sha.
    async fn create_blob(&self, repo: &RepoRef, content: &[u8]) -> Result<String, HostError>;

    /// Assemble a tree from blobs; returns the tree sha.
    async fn create_tree(&self, repo: &RepoRef, files: &[TreeFile]) -> Result<String, HostError>;

    /// Create a parentless commit pointing at `tree_sha`; returns the
    /// commit sha.
    async fn create_commit(
        &self,
        repo: &RepoRef,
        message: &str,
        tree_sha: &str,
    ) -> Result<String, HostError>;

    /// Point `branch` at `commit_sha`, creating the ref if missing.
    async fn set_branch_ref(
        &self,
        repo: &RepoRef,
        branch: &str,
        commit_sha: &str,
    ) -> Result<(), HostError>;

    /// Kick off the server-side legacy import keyed by clone URL.
    /// Success means accepted, not complete.
    async fn start_import(&self, target: &RepoRef, vcs_url: &str) -> Result<(), HostError>;

    /// Web URL for a repository on this host.
    fn html_url(&self, repo: &RepoRef) -> String;

    /// Clone URL for a repository on this host.
    fn clone_url(&self, repo: &RepoRef) -> String;

    /// Ready-to-use manual fork URL for a source repository.
    fn fork_page_url(&self, source: &RepoRef) -> String;
}
