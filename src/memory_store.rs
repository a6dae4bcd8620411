use crate::errors::Result;
use crate::job::{normalize_language, JobId, NewPrintJob, PrintJob};
use crate::status::QueueStats;
use crate::store::JobStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;

/// In-process job store.
///
/// Every operation takes the lock once, so `claim` is atomic exactly like
/// the conditional UPDATE of the SQLite store, while a listing followed by
/// a claim can still interleave with other callers.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    last_id: JobId,
    jobs: BTreeMap<JobId, PrintJob>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_oldest_first(jobs: &mut [PrintJob]) {
    jobs.sort_by(|a, b| {
        a.submitted_at
            .total_cmp(&b.submitted_at)
            .then(a.id.cmp(&b.id))
    });
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: NewPrintJob) -> Result<PrintJob> {
        let mut state = self.state.lock().await;
        state.last_id += 1;
        let stored = PrintJob {
            id: state.last_id,
            submitted_at: job.submitted_at,
            requester: job.requester,
            filename: job.filename,
            language: normalize_language(&job.language),
            room: job.room,
            claimed: false,
            done: false,
            payload: Some(job.payload),
        };
        state.jobs.insert(stored.id, stored.clone());
        debug!("Stored print job {} in memory", stored.id);
        Ok(stored)
    }

    async fn list_unclaimed(&self) -> Result<Vec<PrintJob>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<PrintJob> = state
            .jobs
            .values()
            .filter(|job| !job.claimed)
            .map(|job| job.clone().into_summary())
            .collect();
        sort_oldest_first(&mut jobs);
        Ok(jobs)
    }

    async fn claim(&self, id: JobId) -> Result<u64> {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(&id) {
            Some(job) if !job.claimed => {
                job.claimed = true;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn fetch_full(&self, id: JobId) -> Result<Option<PrintJob>> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&id).cloned())
    }

    async fn mark_done(&self, id: JobId) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(&id) {
            Some(job) => {
                job.claimed = true;
                job.done = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_undone(&self, id: JobId) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(&id) {
            Some(job) => {
                job.claimed = false;
                job.done = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_all_done(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, job| !job.done);
        Ok((before - state.jobs.len()) as u64)
    }

    async fn list_all(&self) -> Result<Vec<PrintJob>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<PrintJob> = state
            .jobs
            .values()
            .map(|job| job.clone().into_summary())
            .collect();
        sort_oldest_first(&mut jobs);
        jobs.reverse();
        Ok(jobs)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.state.lock().await;
        let mut stats = QueueStats::default();
        for job in state.jobs.values() {
            stats.add(job.status());
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job(submitted_at: f64, filename: &str) -> NewPrintJob {
        NewPrintJob {
            submitted_at,
            requester: "t1: testers".to_string(),
            room: None,
            filename: filename.to_string(),
            language: String::new(),
            payload: b"data".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let store = MemoryJobStore::new();
        let a = store.insert(new_job(2.0, "a.txt")).await.unwrap();
        let b = store.insert(new_job(1.0, "b.txt")).await.unwrap();
        assert!(b.id > a.id);
        assert_eq!(a.language, "plain");
    }

    #[tokio::test]
    async fn test_unclaimed_ordered_by_submission_time() {
        let store = MemoryJobStore::new();
        store.insert(new_job(3.0, "c.txt")).await.unwrap();
        store.insert(new_job(1.0, "a.txt")).await.unwrap();
        store.insert(new_job(2.0, "b.txt")).await.unwrap();

        let names: Vec<String> = store
            .list_unclaimed()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.filename)
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn test_claim_is_conditional() {
        let store = MemoryJobStore::new();
        let job = store.insert(new_job(1.0, "a.txt")).await.unwrap();

        assert_eq!(store.claim(job.id).await.unwrap(), 1);
        assert_eq!(store.claim(job.id).await.unwrap(), 0);
        assert_eq!(store.claim(999).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_listing_has_no_payload_but_fetch_full_does() {
        let store = MemoryJobStore::new();
        let job = store.insert(new_job(1.0, "a.txt")).await.unwrap();

        let listed = store.list_unclaimed().await.unwrap();
        assert!(listed[0].payload.is_none());

        let full = store.fetch_full(job.id).await.unwrap().unwrap();
        assert_eq!(full.payload.as_deref(), Some(&b"data"[..]));
    }

    #[tokio::test]
    async fn test_delete_all_done_keeps_open_jobs() {
        let store = MemoryJobStore::new();
        let a = store.insert(new_job(1.0, "a.txt")).await.unwrap();
        let b = store.insert(new_job(2.0, "b.txt")).await.unwrap();
        store.claim(b.id).await.unwrap();
        store.mark_done(a.id).await.unwrap();

        assert_eq!(store.delete_all_done().await.unwrap(), 1);
        let remaining = store.list_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b.id);
    }
}
