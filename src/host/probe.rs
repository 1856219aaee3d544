//! Read-only repository state probes.
//!
//! Used before provisioning (an existing non-empty destination
//! short-circuits the cascade) and after a populate attempt (to catch the
//! "succeeded but empty" anomaly).

use super::RepoHost;
use crate::errors::HostError;
use crate::job::RepoRef;

/// Does the repository exist?
///
/// A 404 means "no"; any other failure propagates so an auth problem is
/// never mistaken for absence.
pub async fn exists(host: &dyn RepoHost, repo: &RepoRef) -> Result<bool, HostError> {
    match host.get_repo(repo).await {
        Ok(_) => Ok(true),
        Err(HostError::NotFound(_)) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Is the repository empty?
///
/// The content listing is authoritative immediately after creation, so it
/// is consulted first: an empty listing or a 404 on the listing means
/// empty. Only when the listing fails some other way does the metadata
/// `size == 0` signal decide.
pub async fn is_empty(host: &dyn RepoHost, repo: &RepoRef) -> Result<bool, HostError> {
    match host.list_dir(repo, "").await {
        Ok(entries) => Ok(entries.is_empty()),
        Err(HostError::NotFound(_)) => Ok(true),
        Err(listing_err) => match host.get_repo(repo).await {
            Ok(info) => Ok(info.size == 0),
            Err(_) => Err(listing_err),
        },
    }
}
