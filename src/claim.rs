//! Taking ownership of exactly one unclaimed job.
//!
//! There is no lock manager: every candidate is claimed with the store's
//! conditional update and an affected count of 0 just means another poller
//! got there first. The candidate list may be stale by the time it is
//! walked, which is fine because only the conditional update decides.

use crate::errors::Result;
use crate::job::{JobId, PrintJob};
use crate::store::JobStore;
use tracing::debug;

/// Claim the first candidate that is still unclaimed.
///
/// `candidates` must be ordered oldest first. Returns `None` when every
/// candidate was lost to another poller (or the list is empty).
pub async fn claim_first(store: &dyn JobStore, candidates: &[PrintJob]) -> Result<Option<JobId>> {
    for candidate in candidates {
        match store.claim(candidate.id).await? {
            1 => {
                debug!("Claimed print job {}", candidate.id);
                return Ok(Some(candidate.id));
            }
            _ => debug!("Print job {} already claimed, trying next", candidate.id),
        }
    }

    Ok(None)
}

/// Claim the oldest unclaimed job and return it with its payload.
pub async fn claim_next(store: &dyn JobStore) -> Result<Option<PrintJob>> {
    let candidates = store.list_unclaimed().await?;
    if candidates.is_empty() {
        return Ok(None);
    }

    match claim_first(store, &candidates).await? {
        Some(id) => store.fetch_full(id).await,
        None => Ok(None),
    }
}
