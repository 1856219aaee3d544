//! Legacy repository-importer strategy.
//!
//! Delegates the whole copy to the host's server-side import job, keyed
//! by the source's clone URL. The call is asynchronous on the provider's
//! side: acceptance (2xx) counts as success and completion is not polled
//! here. The orchestrator's post-replication probe catches imports that
//! never materialize.

use async_trait::async_trait;

use super::{CancelFn, ProgressFn, ReplicationResult, ReplicationStrategy};
use crate::host::RepoHost;
use crate::job::{RepoRef, Strategy};

pub struct LegacyImport {
    _private: (),
}

impl LegacyImport {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for LegacyImport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplicationStrategy for LegacyImport {
    fn name(&self) -> &'static str {
        "legacy-import"
    }

    fn kind(&self) -> Strategy {
        Strategy::LegacyImport
    }

    async fn replicate(
        &self,
        host: &dyn RepoHost,
        source: &RepoRef,
        target: &RepoRef,
        _progress: ProgressFn<'_>,
        should_cancel: CancelFn<'_>,
    ) -> ReplicationResult {
        if should_cancel() {
            return ReplicationResult::cancelled(0, 0);
        }
        // File counts are not meaningful here: the provider materializes
        // content asynchronously after acceptance.
        match host.start_import(target, &host.clone_url(source)).await {
            Ok(()) => ReplicationResult::ok(0, 0),
            Err(err) => ReplicationResult::failed(err, 0, 0),
        }
    }
}
