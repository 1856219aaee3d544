//! Content Replication Engine.
//!
//! Three interchangeable strategies populate a destination repository
//! from a source repository, all behind one contract so the orchestrator
//! tries them in order without per-strategy branching. Adding a fourth
//! strategy is a one-line change to [`default_strategies`].
//!
//! Order of preference:
//! 1. [`tarball::TarballImport`]: fewest round trips, one synthetic
//!    commit.
//! 2. [`importer::LegacyImport`]: server-side import job, fire and
//!    forget.
//! 3. [`copy::ContentCopy`]: per-file copy, slow but idempotent-safe.

pub mod copy;
pub mod importer;
pub mod tarball;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::HostError;
use crate::host::RepoHost;
use crate::job::{RepoRef, Strategy};

/// Invoke the progress callback every N files so a large template does
/// not saturate the progress channel.
pub(crate) const PROGRESS_EVERY: usize = 10;

/// Snapshot handed to the progress callback.
#[derive(Debug, Clone, Copy)]
pub struct ReplicationProgress {
    pub copied: usize,
    /// Best-effort total; 0 when pre-counting was not possible.
    pub total: usize,
}

/// Callback invoked at a bounded frequency while a strategy runs.
pub type ProgressFn<'a> = &'a (dyn Fn(ReplicationProgress) + Send + Sync);

/// Cooperative cancellation probe, checked between unit of work, never
/// mid-call.
pub type CancelFn<'a> = &'a (dyn Fn() -> bool + Send + Sync);

/// Outcome of one replication attempt.
#[derive(Debug)]
pub struct ReplicationResult {
    pub success: bool,
    pub files_copied: usize,
    /// 0 when pre-counting failed; counting is best-effort and never
    /// blocks replication.
    pub files_total: usize,
    pub error: Option<HostError>,
}

impl ReplicationResult {
    pub fn ok(files_copied: usize, files_total: usize) -> Self {
        Self {
            success: true,
            files_copied,
            files_total,
            error: None,
        }
    }

    pub fn failed(error: HostError, files_copied: usize, files_total: usize) -> Self {
        Self {
            success: false,
            files_copied,
            files_total,
            error: Some(error),
        }
    }

    /// Stopped at a cancellation checkpoint; not an error.
    pub fn cancelled(files_copied: usize, files_total: usize) -> Self {
        Self {
            success: false,
            files_copied,
            files_total,
            error: None,
        }
    }

    /// Whether this failure must short-circuit the whole cascade.
    pub fn is_rate_limited(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.is_rate_limit())
    }
}

/// One way of populating a destination repository from a source.
#[async_trait]
pub trait ReplicationStrategy: Send + Sync {
    /// Short name used in logs and progress events.
    fn name(&self) -> &'static str;

    /// Which [`Strategy`] this reports in the terminal outcome.
    fn kind(&self) -> Strategy;

    async fn replicate(
        &self,
        host: &dyn RepoHost,
        source: &RepoRef,
        target: &RepoRef,
        progress: ProgressFn<'_>,
        should_cancel: CancelFn<'_>,
    ) -> ReplicationResult;
}

/// The standard cascade order.
pub fn default_strategies(copy_throttle: Duration) -> Vec<Box<dyn ReplicationStrategy>> {
    vec![
        Box::new(tarball::TarballImport::new()),
        Box::new(importer::LegacyImport::new()),
        Box::new(copy::ContentCopy::new(copy_throttle)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_strategy_order() {
        let strategies = default_strategies(Duration::from_millis(0));
        let kinds: Vec<Strategy> = strategies.iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                Strategy::TarballImport,
                Strategy::LegacyImport,
                Strategy::ContentCopy
            ]
        );
    }

    #[test]
    fn test_result_rate_limit_detection() {
        let limited = ReplicationResult::failed(HostError::RateLimit("quota".into()), 0, 0);
        assert!(limited.is_rate_limited());

        let generic =
            ReplicationResult::failed(HostError::Status { status: 500, message: "x".into() }, 0, 0);
        assert!(!generic.is_rate_limited());

        let cancelled = ReplicationResult::cancelled(3, 10);
        assert!(!cancelled.is_rate_limited());
        assert!(!cancelled.success);
    }
}
