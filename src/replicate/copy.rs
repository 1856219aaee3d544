//! Per-file copy strategy, the last resort.
//!
//! Walks the source tree one directory level at a time, then writes each
//! file into the target through the single-file contents call. Slowest of
//! the three strategies and the most API-hungry, but it is the only one
//! that survives a partial earlier attempt: files that already exist in
//! the target are skipped, never overwritten.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::{
    CancelFn, PROGRESS_EVERY, ProgressFn, ReplicationProgress, ReplicationResult,
    ReplicationStrategy,
};
use crate::errors::HostError;
use crate::host::{EntryKind, RepoHost};
use crate::job::{RepoRef, Strategy};

pub struct ContentCopy {
    /// Pause between writes so a large template does not trip secondary
    /// rate limits.
    throttle: Duration,
}

impl ContentCopy {
    pub fn new(throttle: Duration) -> Self {
        Self { throttle }
    }

    /// Collect every file path in the source. Non-file entries
    /// (symlinks, submodules) are skipped with a warning.
    async fn collect_paths(
        &self,
        host: &dyn RepoHost,
        source: &RepoRef,
    ) -> Result<Vec<String>, HostError> {
        let mut paths = Vec::new();
        let mut pending = vec![String::new()];
        while let Some(dir) = pending.pop() {
            for entry in host.list_dir(source, &dir).await? {
                match entry.kind {
                    EntryKind::File => paths.push(entry.path),
                    EntryKind::Dir => pending.push(entry.path),
                    EntryKind::Other => {
                        warn!(path = %entry.path, "skipping non-file entry during copy");
                    }
                }
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl ReplicationStrategy for ContentCopy {
    fn name(&self) -> &'static str {
        "content-copy"
    }

    fn kind(&self) -> Strategy {
        Strategy::ContentCopy
    }

    async fn replicate(
        &self,
        host: &dyn RepoHost,
        source: &RepoRef,
        target: &RepoRef,
        progress: ProgressFn<'_>,
        should_cancel: CancelFn<'_>,
    ) -> ReplicationResult {
        let paths = match self.collect_paths(host, source).await {
            Ok(paths) => paths,
            Err(err) => return ReplicationResult::failed(err, 0, 0),
        };
        let total = paths.len();

        let mut copied = 0;
        for (index, path) in paths.iter().enumerate() {
            if should_cancel() {
                return ReplicationResult::cancelled(copied, total);
            }

            // Skip files a previous partial attempt already wrote.
            match host.read_file(target, path).await {
                Ok(_) => continue,
                Err(HostError::NotFound(_)) => {}
                Err(err) => return ReplicationResult::failed(err, copied, total),
            }

            let content = match host.read_file(source, path).await {
                Ok(content) => content,
                Err(err) => return ReplicationResult::failed(err, copied, total),
            };
            let message = format!("Copy {} from template", path);
            if let Err(err) = host.create_file(target, path, &content, &message).await {
                return ReplicationResult::failed(err, copied, total);
            }
            copied += 1;

            let done = index + 1;
            if done % PROGRESS_EVERY == 0 || done == total {
                progress(ReplicationProgress { copied: done, total });
            }

            if !self.throttle.is_zero() {
                tokio::time::sleep(self.throttle).await;
            }
        }

        ReplicationResult::ok(copied, total)
    }
}
