//! Tarball + git-object import strategy.
//!
//! Downloads the source's default-branch tarball, creates a
//! content-addressed blob per regular file, assembles one tree, creates a
//! single parentless commit, and points the target's default branch ref
//! at it. Source history depth is irrelevant: the result is always
//! exactly one commit. Version-control metadata paths are skipped.

use std::io::Read;

use async_trait::async_trait;
use flate2::read::GzDecoder;

use super::{
    CancelFn, PROGRESS_EVERY, ProgressFn, ReplicationProgress, ReplicationResult,
    ReplicationStrategy,
};
use crate::errors::HostError;
use crate::host::{RepoHost, TreeFile};
use crate::job::{RepoRef, Strategy};

pub struct TarballImport {
    _private: (),
}

impl TarballImport {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for TarballImport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplicationStrategy for TarballImport {
    fn name(&self) -> &'static str {
        "tarball-import"
    }

    fn kind(&self) -> Strategy {
        Strategy::TarballImport
    }

    async fn replicate(
        &self,
        host: &dyn RepoHost,
        source: &RepoRef,
        target: &RepoRef,
        progress: ProgressFn<'_>,
        should_cancel: CancelFn<'_>,
    ) -> ReplicationResult {
        let info = match host.get_repo(source).await {
            Ok(info) => info,
            Err(err) => return ReplicationResult::failed(err, 0, 0),
        };

        let archive = match host.download_tarball(source).await {
            Ok(bytes) => bytes,
            Err(err) => return ReplicationResult::failed(err, 0, 0),
        };

        let files = match unpack_tarball(&archive) {
            Ok(files) => files,
            Err(message) => {
                return ReplicationResult::failed(
                    HostError::Status { status: 0, message },
                    0,
                    0,
                );
            }
        };
        let total = files.len();

        let mut tree_files = Vec::with_capacity(total);
        for (index, (path, content)) in files.into_iter().enumerate() {
            if should_cancel() {
                return ReplicationResult::cancelled(index, total);
            }
            let blob_sha = match host.create_blob(target, &content).await {
                Ok(sha) => sha,
                Err(err) => return ReplicationResult::failed(err, index, total),
            };
            tree_files.push(TreeFile { path, blob_sha });

            let done = index + 1;
            if done % PROGRESS_EVERY == 0 || done == total {
                progress(ReplicationProgress { copied: done, total });
            }
        }

        let tree_sha = match host.create_tree(target, &tree_files).await {
            Ok(sha) => sha,
            Err(err) => return ReplicationResult::failed(err, total, total),
        };
        let message = format!("Import template contents from {}", source.slug());
        let commit_sha = match host.create_commit(target, &message, &tree_sha).await {
            Ok(sha) => sha,
            Err(err) => return ReplicationResult::failed(err, total, total),
        };
        if let Err(err) = host
            .set_branch_ref(target, &info.default_branch, &commit_sha)
            .await
        {
            return ReplicationResult::failed(err, total, total);
        }

        ReplicationResult::ok(total, total)
    }
}

/// Extract regular files from a gzip'd tarball, stripping the archive's
/// single top-level directory and skipping `.git` metadata paths.
fn unpack_tarball(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>, String> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut files = Vec::new();

    let entries = archive
        .entries()
        .map_err(|e| format!("unreadable tarball: {}", e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| format!("corrupt tarball entry: {}", e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| format!("bad path in tarball: {}", e))?
            .to_string_lossy()
            .into_owned();
        let Some(relative) = strip_archive_root(&path) else {
            continue;
        };
        if is_vcs_metadata(&relative) {
            continue;
        }
        let mut content = Vec::new();
        entry
            .read_to_end(&mut content)
            .map_err(|e| format!("failed to read {} from tarball: {}", relative, e))?;
        files.push((relative, content));
    }
    Ok(files)
}

/// Host tarballs nest everything under `<owner>-<repo>-<sha>/`; drop that
/// component. Entries without one (e.g. pax headers) are skipped.
fn strip_archive_root(path: &str) -> Option<String> {
    let (_, rest) = path.split_once('/')?;
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

fn is_vcs_metadata(path: &str) -> bool {
    path == ".git" || path.starts_with(".git/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    /// Build a gzip'd tarball the way host archives look: one root
    /// directory wrapping everything.
    fn make_tarball(files: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, content) in files {
            let full = format!("octo-template-abc123/{}", path);
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, full, *content).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_unpack_strips_root_directory() {
        let tarball = make_tarball(&[("README.md", b"hello"), ("src/main.rs", b"fn main() {}")]);
        let files = unpack_tarball(&tarball).unwrap();
        let paths: Vec<&str> = files.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "src/main.rs"]);
        assert_eq!(files[0].1, b"hello");
    }

    #[test]
    fn test_unpack_skips_git_metadata() {
        let tarball = make_tarball(&[
            ("README.md", b"hello"),
            (".git/config", b"[core]"),
            (".git/HEAD", b"ref: refs/heads/main"),
            (".github/workflows/ci.yml", b"on: push"),
        ]);
        let files = unpack_tarball(&tarball).unwrap();
        let paths: Vec<&str> = files.iter().map(|(p, _)| p.as_str()).collect();
        // `.github` is real content; only `.git` is metadata.
        assert_eq!(paths, vec!["README.md", ".github/workflows/ci.yml"]);
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        assert!(unpack_tarball(b"not a tarball at all").is_err());
    }

    #[test]
    fn test_strip_archive_root() {
        assert_eq!(
            strip_archive_root("root-dir/src/lib.rs"),
            Some("src/lib.rs".to_string())
        );
        assert_eq!(strip_archive_root("pax_global_header"), None);
        assert_eq!(strip_archive_root("root-dir/"), None);
    }

    #[test]
    fn test_vcs_metadata_detection() {
        assert!(is_vcs_metadata(".git/config"));
        assert!(is_vcs_metadata(".git"));
        assert!(!is_vcs_metadata(".gitignore"));
        assert!(!is_vcs_metadata(".github/workflows/ci.yml"));
        assert!(!is_vcs_metadata("src/.git.rs"));
    }
}
