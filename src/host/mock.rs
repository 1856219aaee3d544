//! In-memory mock host.
//!
//! When no host credential is configured the service runs in mock mode
//! against this implementation instead of refusing to start, so the full
//! cascade can be exercised locally without touching a real provider.
//! Tests drive it with programmable per-call failures.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;

use super::{DirEntry, EntryKind, RepoHost, RepoInfo, TreeFile};
use crate::errors::HostError;
use crate::job::RepoRef;

const WEB_BASE: &str = "https://github.com";

/// Per-call failure injection: a status code makes the named call fail
/// with that classified error on every invocation.
#[derive(Debug, Default, Clone)]
pub struct Failures {
    pub fork: Option<u16>,
    pub create_repo: Option<u16>,
    pub delete_repo: Option<u16>,
    pub tarball: Option<u16>,
    pub blob: Option<u16>,
    pub import: Option<u16>,
    pub create_file: Option<u16>,
    pub list_dir: Option<u16>,
}

#[derive(Debug, Default, Clone)]
struct MockRepo {
    files: BTreeMap<String, Vec<u8>>,
}

#[derive(Default)]
struct MockState {
    repos: HashMap<String, MockRepo>,
    blobs: HashMap<String, Vec<u8>>,
    trees: HashMap<String, Vec<TreeFile>>,
    /// commit sha -> tree sha
    commits: HashMap<String, String>,
    deleted: Vec<String>,
    mutations: Vec<String>,
    failures: Failures,
    counter: u64,
}

/// In-memory [`RepoHost`].
pub struct MockHost {
    login: String,
    state: Mutex<MockState>,
}

impl MockHost {
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Mock-mode host with a small seeded template, enough for a full
    /// local cascade run.
    pub fn with_sample_template() -> Self {
        let host = Self::new("mock-user");
        host.seed_repo(
            "octo",
            "template",
            &[
                ("README.md", b"# Sample template\n" as &[u8]),
                ("src/main.rs", b"fn main() {}\n"),
                (".gitignore", b"/target\n"),
            ],
        );
        host
    }

    pub fn seed_repo(&self, owner: &str, repo: &str, files: &[(&str, &[u8])]) {
        let mut state = self.state.lock().unwrap();
        let entry = state.repos.entry(format!("{}/{}", owner, repo)).or_default();
        for (path, content) in files {
            entry.files.insert((*path).to_string(), content.to_vec());
        }
    }

    /// Adjust failure injection.
    pub fn set_failures(&self, update: impl FnOnce(&mut Failures)) {
        let mut state = self.state.lock().unwrap();
        update(&mut state.failures);
    }

    /// Repositories deleted so far, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Names of mutating calls made so far, in order.
    pub fn mutation_log(&self) -> Vec<String> {
        self.state.lock().unwrap().mutations.clone()
    }

    /// Files currently present in a repository.
    pub fn files(&self, owner: &str, repo: &str) -> Option<Vec<String>> {
        let state = self.state.lock().unwrap();
        state
            .repos
            .get(&format!("{}/{}", owner, repo))
            .map(|r| r.files.keys().cloned().collect())
    }

    pub fn file_content(&self, owner: &str, repo: &str, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .repos
            .get(&format!("{}/{}", owner, repo))
            .and_then(|r| r.files.get(path).cloned())
    }

    fn fail(status: u16) -> HostError {
        HostError::classify(status, "mock host injected failure")
    }

    fn next_sha(state: &mut MockState, prefix: &str) -> String {
        state.counter += 1;
        format!("{}-{:06}", prefix, state.counter)
    }
}

#[async_trait]
impl RepoHost for MockHost {
    async fn viewer_login(&self) -> Result<String, HostError> {
        Ok(self.login.clone())
    }

    async fn get_repo(&self, repo: &RepoRef) -> Result<RepoInfo, HostError> {
        let state = self.state.lock().unwrap();
        match state.repos.get(&repo.slug()) {
            Some(found) => Ok(RepoInfo {
                default_branch: "main".to_string(),
                size: found.files.values().map(|v| v.len() as u64).sum(),
                html_url: format!("{}/{}", WEB_BASE, repo.slug()),
            }),
            None => Err(HostError::NotFound(format!("{} not found", repo.slug()))),
        }
    }

    async fn list_dir(&self, repo: &RepoRef, path: &str) -> Result<Vec<DirEntry>, HostError> {
        let state = self.state.lock().unwrap();
        if let Some(status) = state.failures.list_dir {
            return Err(Self::fail(status));
        }
        let found = state
            .repos
            .get(&repo.slug())
            .ok_or_else(|| HostError::NotFound(format!("{} not found", repo.slug())))?;

        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path.trim_matches('/'))
        };
        let mut entries: Vec<DirEntry> = Vec::new();
        let mut seen_dirs: Vec<String> = Vec::new();
        for file_path in found.files.keys() {
            let Some(rest) = file_path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                None => entries.push(DirEntry {
                    path: file_path.clone(),
                    kind: EntryKind::File,
                }),
                Some((dir, _)) => {
                    let dir_path = format!("{}{}", prefix, dir);
                    if !seen_dirs.contains(&dir_path) {
                        seen_dirs.push(dir_path.clone());
                        entries.push(DirEntry {
                            path: dir_path,
                            kind: EntryKind::Dir,
                        });
                    }
                }
            }
        }
        Ok(entries)
    }

    async fn read_file(&self, repo: &RepoRef, path: &str) -> Result<Vec<u8>, HostError> {
        let state = self.state.lock().unwrap();
        state
            .repos
            .get(&repo.slug())
            .and_then(|r| r.files.get(path))
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("{}:{} not found", repo.slug(), path)))
    }

    async fn fork(
        &self,
        source: &RepoRef,
        target_owner: &str,
        _is_org: bool,
    ) -> Result<(), HostError> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push("fork".to_string());
        if let Some(status) = state.failures.fork {
            return Err(Self::fail(status));
        }
        let cloned = state
            .repos
            .get(&source.slug())
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("{} not found", source.slug())))?;
        state
            .repos
            .insert(format!("{}/{}", target_owner, source.repo), cloned);
        Ok(())
    }

    async fn rename(&self, repo: &RepoRef, new_name: &str) -> Result<(), HostError> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push("rename".to_string());
        let existing = state
            .repos
            .remove(&repo.slug())
            .ok_or_else(|| HostError::NotFound(format!("{} not found", repo.slug())))?;
        state
            .repos
            .insert(format!("{}/{}", repo.owner, new_name), existing);
        Ok(())
    }

    async fn create_repo(&self, owner: &str, name: &str, _is_org: bool) -> Result<(), HostError> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push("create_repo".to_string());
        if let Some(status) = state.failures.create_repo {
            return Err(Self::fail(status));
        }
        state
            .repos
            .insert(format!("{}/{}", owner, name), MockRepo::default());
        Ok(())
    }

    async fn delete_repo(&self, repo: &RepoRef) -> Result<(), HostError> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push("delete_repo".to_string());
        if let Some(status) = state.failures.delete_repo {
            return Err(Self::fail(status));
        }
        state.repos.remove(&repo.slug());
        state.deleted.push(repo.slug());
        Ok(())
    }

    async fn create_file(
        &self,
        repo: &RepoRef,
        path: &str,
        content: &[u8],
        _message: &str,
    ) -> Result<(), HostError> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push(format!("create_file:{}", path));
        if let Some(status) = state.failures.create_file {
            return Err(Self::fail(status));
        }
        let found = state
            .repos
            .get_mut(&repo.slug())
            .ok_or_else(|| HostError::NotFound(format!("{} not found", repo.slug())))?;
        if found.files.contains_key(path) {
            // Matches the real contents API: a create without the prior
            // file sha is rejected.
            return Err(HostError::Status {
                status: 422,
                message: format!("{} already exists", path),
            });
        }
        found.files.insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn download_tarball(&self, repo: &RepoRef) -> Result<Vec<u8>, HostError> {
        let state = self.state.lock().unwrap();
        if let Some(status) = state.failures.tarball {
            return Err(Self::fail(status));
        }
        let found = state
            .repos
            .get(&repo.slug())
            .ok_or_else(|| HostError::NotFound(format!("{} not found", repo.slug())))?;

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, content) in &found.files {
            let full = format!("{}-{}-snapshot/{}", repo.owner, repo.repo, path);
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, full, content.as_slice())
                .map_err(|e| HostError::Transport(e.to_string()))?;
        }
        let encoder = builder
            .into_inner()
            .map_err(|e| HostError::Transport(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| HostError::Transport(e.to_string()))
    }

    async fn create_blob(&self, _repo: &RepoRef, content: &[u8]) -> Result<String, HostError> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push("create_blob".to_string());
        if let Some(status) = state.failures.blob {
            return Err(Self::fail(status));
        }
        let sha = Self::next_sha(&mut state, "blob");
        state.blobs.insert(sha.clone(), content.to_vec());
        Ok(sha)
    }

    async fn create_tree(&self, _repo: &RepoRef, files: &[TreeFile]) -> Result<String, HostError> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push("create_tree".to_string());
        let sha = Self::next_sha(&mut state, "tree");
        state.trees.insert(sha.clone(), files.to_vec());
        Ok(sha)
    }

    async fn create_commit(
        &self,
        _repo: &RepoRef,
        _message: &str,
        tree_sha: &str,
    ) -> Result<String, HostError> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push("create_commit".to_string());
        let sha = Self::next_sha(&mut state, "commit");
        state.commits.insert(sha.clone(), tree_sha.to_string());
        Ok(sha)
    }

    async fn set_branch_ref(
        &self,
        repo: &RepoRef,
        _branch: &str,
        commit_sha: &str,
    ) -> Result<(), HostError> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push("set_branch_ref".to_string());
        let tree_sha = state
            .commits
            .get(commit_sha)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("commit {} not found", commit_sha)))?;
        let tree = state
            .trees
            .get(&tree_sha)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("tree {} not found", tree_sha)))?;
        let mut materialized = BTreeMap::new();
        for file in tree {
            let content = state
                .blobs
                .get(&file.blob_sha)
                .cloned()
                .ok_or_else(|| HostError::NotFound(format!("blob {} not found", file.blob_sha)))?;
            materialized.insert(file.path, content);
        }
        let found = state
            .repos
            .get_mut(&repo.slug())
            .ok_or_else(|| HostError::NotFound(format!("{} not found", repo.slug())))?;
        found.files.extend(materialized);
        Ok(())
    }

    async fn start_import(&self, target: &RepoRef, vcs_url: &str) -> Result<(), HostError> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push("start_import".to_string());
        if let Some(status) = state.failures.import {
            return Err(Self::fail(status));
        }
        let slug = vcs_url
            .trim_end_matches(".git")
            .rsplit('/')
            .take(2)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("/");
        let source = state
            .repos
            .get(&slug)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("{} not found", slug)))?;
        let found = state
            .repos
            .get_mut(&target.slug())
            .ok_or_else(|| HostError::NotFound(format!("{} not found", target.slug())))?;
        found.files.extend(source.files);
        Ok(())
    }

    fn html_url(&self, repo: &RepoRef) -> String {
        format!("{}/{}", WEB_BASE, repo.slug())
    }

    fn clone_url(&self, repo: &RepoRef) -> String {
        format!("{}/{}.git", WEB_BASE, repo.slug())
    }

    fn fork_page_url(&self, source: &RepoRef) -> String {
        format!("{}/{}/fork", WEB_BASE, source.slug())
    }
}
