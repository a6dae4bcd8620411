use crate::errors::Result;
use crate::job::{JobId, PrintJob};
use async_trait::async_trait;

/// Where a daemon gets print jobs from.
///
/// `EndpointClient` is the production implementation.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Claim the next job and return it with its payload, `None` if there is
    /// no work.
    async fn next_job(&self) -> Result<Option<PrintJob>>;

    /// Mark a printed job done. Unknown ids fail with `JobNotFound`.
    async fn acknowledge(&self, id: JobId) -> Result<()>;
}
