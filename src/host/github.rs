//! GitHub implementation of the [`RepoHost`] seam.
//!
//! Every method is a single REST call with a per-call timeout: short for
//! identity and metadata lookups, longer for writes, longest for the
//! tarball transfer. Non-2xx responses are classified centrally through
//! [`HostError::classify`].

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;

use super::{DirEntry, RepoHost, RepoInfo, TreeFile};
use crate::errors::HostError;
use crate::job::RepoRef;

/// Timeout for identity/metadata lookups.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(20);

/// Timeout for mutating calls (fork, create, writes, git objects).
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the tarball download, which can be large.
const TARBALL_TIMEOUT: Duration = Duration::from_secs(120);

const ACCEPT_JSON: &str = "application/vnd.github+json";
const USER_AGENT: &str = "templar-provisioner";

#[derive(Debug, Deserialize)]
struct ViewerResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct FileContentResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

/// GitHub REST client.
pub struct GitHubClient {
    http: reqwest::Client,
    token: String,
    api_base: String,
    web_base: String,
}

impl GitHubClient {
    pub fn new(token: impl Into<String>, api_base: &str, web_base: &str) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            token: token.into(),
            api_base: api_base.trim_end_matches('/').to_string(),
            web_base: web_base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn request(&self, method: reqwest::Method, path: &str, timeout: Duration) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(&self.token)
            .header("Accept", ACCEPT_JSON)
            .timeout(timeout)
    }

    /// Map a response to `Ok` on 2xx, otherwise classify the failure.
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, HostError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            Err(HostError::classify(status, &body))
        }
    }
}

#[async_trait]
impl RepoHost for GitHubClient {
    async fn viewer_login(&self) -> Result<String, HostError> {
        let resp = self
            .request(reqwest::Method::GET, "/user", LOOKUP_TIMEOUT)
            .send()
            .await?;
        let viewer: ViewerResponse = Self::check(resp).await?.json().await?;
        Ok(viewer.login)
    }

    async fn get_repo(&self, repo: &RepoRef) -> Result<RepoInfo, HostError> {
        let path = format!("/repos/{}/{}", repo.owner, repo.repo);
        let resp = self
            .request(reqwest::Method::GET, &path, LOOKUP_TIMEOUT)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn list_dir(&self, repo: &RepoRef, path: &str) -> Result<Vec<DirEntry>, HostError> {
        let api_path = format!(
            "/repos/{}/{}/contents/{}",
            repo.owner,
            repo.repo,
            path.trim_start_matches('/')
        );
        let resp = self
            .request(reqwest::Method::GET, &api_path, LOOKUP_TIMEOUT)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn read_file(&self, repo: &RepoRef, path: &str) -> Result<Vec<u8>, HostError> {
        let api_path = format!(
            "/repos/{}/{}/contents/{}",
            repo.owner,
            repo.repo,
            path.trim_start_matches('/')
        );
        let resp = self
            .request(reqwest::Method::GET, &api_path, LOOKUP_TIMEOUT)
            .send()
            .await?;
        let file: FileContentResponse = Self::check(resp).await?.json().await?;
        if file.encoding != "base64" {
            return Err(HostError::Status {
                status: 200,
                message: format!("unexpected content encoding '{}' for {}", file.encoding, path),
            });
        }
        let compact: String = file.content.chars().filter(|c| !c.is_whitespace()).collect();
        BASE64.decode(compact.as_bytes()).map_err(|e| HostError::Status {
            status: 200,
            message: format!("invalid base64 content for {}: {}", path, e),
        })
    }

    async fn fork(
        &self,
        source: &RepoRef,
        target_owner: &str,
        is_org: bool,
    ) -> Result<(), HostError> {
        let path = format!("/repos/{}/{}/forks", source.owner, source.repo);
        let mut req = self.request(reqwest::Method::POST, &path, WRITE_TIMEOUT);
        if is_org {
            req = req.json(&serde_json::json!({ "organization": target_owner }));
        }
        Self::check(req.send().await?).await?;
        Ok(())
    }

    async fn rename(&self, repo: &RepoRef, new_name: &str) -> Result<(), HostError> {
        let path = format!("/repos/{}/{}", repo.owner, repo.repo);
        let resp = self
            .request(reqwest::Method::PATCH, &path, WRITE_TIMEOUT)
            .json(&serde_json::json!({ "name": new_name }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn create_repo(&self, owner: &str, name: &str, is_org: bool) -> Result<(), HostError> {
        let path = if is_org {
            format!("/orgs/{}/repos", owner)
        } else {
            "/user/repos".to_string()
        };
        let resp = self
            .request(reqwest::Method::POST, &path, WRITE_TIMEOUT)
            .json(&serde_json::json!({
                "name": name,
                "private": false,
                "has_issues": true,
                "has_projects": true,
                "has_wiki": false,
                "auto_init": false,
            }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn delete_repo(&self, repo: &RepoRef) -> Result<(), HostError> {
        let path = format!("/repos/{}/{}", repo.owner, repo.repo);
        let resp = self
            .request(reqwest::Method::DELETE, &path, WRITE_TIMEOUT)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn create_file(
        &self,
        repo: &RepoRef,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), HostError> {
        let api_path = format!(
            "/repos/{}/{}/contents/{}",
            repo.owner,
            repo.repo,
            path.trim_start_matches('/')
        );
        let resp = self
            .request(reqwest::Method::PUT, &api_path, WRITE_TIMEOUT)
            .json(&serde_json::json!({
                "message": message,
                "content": BASE64.encode(content),
            }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn download_tarball(&self, repo: &RepoRef) -> Result<Vec<u8>, HostError> {
        let path = format!("/repos/{}/{}/tarball", repo.owner, repo.repo);
        let resp = self
            .request(reqwest::Method::GET, &path, TARBALL_TIMEOUT)
            .send()
            .await?;
        let bytes = Self::check(resp).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn create_blob(&self, repo: &RepoRef, content: &[u8]) -> Result<String, HostError> {
        let path = format!("/repos/{}/{}/git/blobs", repo.owner, repo.repo);
        let resp = self
            .request(reqwest::Method::POST, &path, WRITE_TIMEOUT)
            .json(&serde_json::json!({
                "content": BASE64.encode(content),
                "encoding": "base64",
            }))
            .send()
            .await?;
        let blob: ShaResponse = Self::check(resp).await?.json().await?;
        Ok(blob.sha)
    }

    async fn create_tree(&self, repo: &RepoRef, files: &[TreeFile]) -> Result<String, HostError> {
        let entries: Vec<serde_json::Value> = files
            .iter()
            .map(|f| {
                serde_json::json!({
                    "path": f.path,
                    "mode": "100644",
                    "type": "blob",
                    "sha": f.blob_sha,
                })
            })
            .collect();
        let path = format!("/repos/{}/{}/git/trees", repo.owner, repo.repo);
        let resp = self
            .request(reqwest::Method::POST, &path, WRITE_TIMEOUT)
            .json(&serde_json::json!({ "tree": entries }))
            .send()
            .await?;
        let tree: ShaResponse = Self::check(resp).await?.json().await?;
        Ok(tree.sha)
    }

    async fn create_commit(
        &self,
        repo: &RepoRef,
        message: &str,
        tree_sha: &str,
    ) -> Result<String, HostError> {
        let path = format!("/repos/{}/{}/git/commits", repo.owner, repo.repo);
        let resp = self
            .request(reqwest::Method::POST, &path, WRITE_TIMEOUT)
            .json(&serde_json::json!({
                "message": message,
                "tree": tree_sha,
                "parents": [],
            }))
            .send()
            .await?;
        let commit: ShaResponse = Self::check(resp).await?.json().await?;
        Ok(commit.sha)
    }

    async fn set_branch_ref(
        &self,
        repo: &RepoRef,
        branch: &str,
        commit_sha: &str,
    ) -> Result<(), HostError> {
        let create_path = format!("/repos/{}/{}/git/refs", repo.owner, repo.repo);
        let resp = self
            .request(reqwest::Method::POST, &create_path, WRITE_TIMEOUT)
            .json(&serde_json::json!({
                "ref": format!("refs/heads/{}", branch),
                "sha": commit_sha,
            }))
            .send()
            .await?;
        match Self::check(resp).await {
            Ok(_) => Ok(()),
            // 422 means the ref already exists; force-update it instead.
            Err(HostError::Status { status: 422, .. }) => {
                let update_path =
                    format!("/repos/{}/{}/git/refs/heads/{}", repo.owner, repo.repo, branch);
                let resp = self
                    .request(reqwest::Method::PATCH, &update_path, WRITE_TIMEOUT)
                    .json(&serde_json::json!({ "sha": commit_sha, "force": true }))
                    .send()
                    .await?;
                Self::check(resp).await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn start_import(&self, target: &RepoRef, vcs_url: &str) -> Result<(), HostError> {
        let path = format!("/repos/{}/{}/import", target.owner, target.repo);
        let resp = self
            .request(reqwest::Method::PUT, &path, WRITE_TIMEOUT)
            .json(&serde_json::json!({ "vcs": "git", "vcs_url": vcs_url }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    fn html_url(&self, repo: &RepoRef) -> String {
        format!("{}/{}/{}", self.web_base, repo.owner, repo.repo)
    }

    fn clone_url(&self, repo: &RepoRef) -> String {
        format!("{}/{}/{}.git", self.web_base, repo.owner, repo.repo)
    }

    fn fork_page_url(&self, source: &RepoRef) -> String {
        format!("{}/{}/{}/fork", self.web_base, source.owner, source.repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::EntryKind;

    fn client() -> GitHubClient {
        GitHubClient::new("ghp_test", "https://api.github.com/", "https://github.com/")
    }

    #[test]
    fn test_url_bases_are_trimmed() {
        let c = client();
        assert_eq!(c.url("/user"), "https://api.github.com/user");
        assert_eq!(
            c.html_url(&RepoRef::new("alice", "demo")),
            "https://github.com/alice/demo"
        );
    }

    #[test]
    fn test_clone_and_fork_urls() {
        let c = client();
        let source = RepoRef::new("octo", "template");
        assert_eq!(c.clone_url(&source), "https://github.com/octo/template.git");
        assert_eq!(
            c.fork_page_url(&source),
            "https://github.com/octo/template/fork"
        );
    }

    #[test]
    fn test_repo_info_deserialize() {
        let json = r#"{
            "default_branch": "main",
            "size": 128,
            "html_url": "https://github.com/octo/template",
            "full_name": "octo/template"
        }"#;
        let info: RepoInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.default_branch, "main");
        assert_eq!(info.size, 128);
    }

    #[test]
    fn test_repo_info_size_defaults_to_zero() {
        let json = r#"{"default_branch": "main", "html_url": "https://github.com/o/r"}"#;
        let info: RepoInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.size, 0);
    }

    #[test]
    fn test_dir_entry_deserialize() {
        let json = r#"[
            {"path": "src/main.rs", "type": "file"},
            {"path": "src", "type": "dir"},
            {"path": "link", "type": "symlink"}
        ]"#;
        let entries: Vec<DirEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[1].kind, EntryKind::Dir);
        assert_eq!(entries[2].kind, EntryKind::Other);
    }

    #[test]
    fn test_viewer_response_deserialize() {
        let viewer: ViewerResponse = serde_json::from_str(r#"{"login": "alice"}"#).unwrap();
        assert_eq!(viewer.login, "alice");
    }

    #[test]
    fn test_base64_roundtrip_matches_contents_api() {
        // The contents API wraps base64 at 60 columns; decoding must
        // tolerate embedded newlines.
        let wrapped = "aGVsbG8g\nd29ybGQ=\n";
        let compact: String = wrapped.chars().filter(|c| !c.is_whitespace()).collect();
        assert_eq!(BASE64.decode(compact.as_bytes()).unwrap(), b"hello world");
    }
}
