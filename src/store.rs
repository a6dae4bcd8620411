use crate::errors::Result;
use crate::job::{JobId, NewPrintJob, PrintJob};
use crate::status::QueueStats;
use async_trait::async_trait;

/// Storage seam for print jobs.
///
/// The only concurrency guarantee the rest of the system relies on is
/// `claim`: a compare-and-swap of the `claimed` flag keyed by job id, so
/// that no two callers ever both see an affected count of 1 for one job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Store a new, unclaimed job and return it (with its assigned id).
    async fn insert(&self, job: NewPrintJob) -> Result<PrintJob>;

    /// Unclaimed jobs, oldest submission first, without payload.
    async fn list_unclaimed(&self) -> Result<Vec<PrintJob>>;

    /// Set `claimed` on job `id` only if it is still unclaimed.
    /// Returns the number of rows changed (0 or 1).
    async fn claim(&self, id: JobId) -> Result<u64>;

    /// The job including its payload.
    async fn fetch_full(&self, id: JobId) -> Result<Option<PrintJob>>;

    /// Mark a job done (and claimed). Returns false if the job does not exist.
    async fn mark_done(&self, id: JobId) -> Result<bool>;

    /// Put a job back in the queue. Returns false if the job does not exist.
    async fn mark_undone(&self, id: JobId) -> Result<bool>;

    /// Delete every job marked done. Returns the number deleted.
    async fn delete_all_done(&self) -> Result<u64>;

    /// All jobs, newest submission first, without payload.
    async fn list_all(&self) -> Result<Vec<PrintJob>>;

    /// Job counts per status.
    async fn stats(&self) -> Result<QueueStats>;
}
