/// Print job status labels, shared by operator listings, queue stats
/// and the HTTP API.
pub const PENDING: &str = "pending";
pub const PRINTING: &str = "printing";
pub const DONE: &str = "done";

use serde::{Deserialize, Serialize};

/// Status of a print job, derived from its `claimed` and `done` flags.
///
/// Flag combinations:
///   (false, false) = pending, available to claim
///   (true,  false) = printing, a daemon holds it
///   (true,  true)  = done
///   (false, true)  = invalid, never produced by the store
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Printing,
    Done,
}

impl JobStatus {
    /// Map the two status flags to a status.
    ///
    /// Returns `None` for the invalid (unclaimed, done) combination.
    pub fn from_flags(claimed: bool, done: bool) -> Option<Self> {
        match (claimed, done) {
            (false, false) => Some(JobStatus::Pending),
            (true, false) => Some(JobStatus::Printing),
            (true, true) => Some(JobStatus::Done),
            (false, true) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => PENDING,
            JobStatus::Printing => PRINTING,
            JobStatus::Done => DONE,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job counts per status, as reported by a job store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: u64,
    pub printing: u64,
    pub done: u64,
}

impl QueueStats {
    pub fn add(&mut self, status: JobStatus) {
        self.add_count(status, 1);
    }

    pub fn add_count(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Printing => self.printing += count,
            JobStatus::Done => self.done += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.printing + self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_flag_combinations() {
        assert_eq!(JobStatus::from_flags(false, false), Some(JobStatus::Pending));
        assert_eq!(JobStatus::from_flags(true, false), Some(JobStatus::Printing));
        assert_eq!(JobStatus::from_flags(true, true), Some(JobStatus::Done));
    }

    #[test]
    fn test_unclaimed_done_is_invalid() {
        assert_eq!(JobStatus::from_flags(false, true), None);
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(JobStatus::Pending.to_string(), "pending");
        assert_eq!(JobStatus::Printing.to_string(), "printing");
        assert_eq!(JobStatus::Done.to_string(), "done");
        assert_eq!(
            serde_json::to_string(&JobStatus::Printing).unwrap(),
            "\"printing\""
        );
    }

    #[test]
    fn test_stats_accumulate() {
        let mut stats = QueueStats::default();
        stats.add(JobStatus::Pending);
        stats.add(JobStatus::Pending);
        stats.add(JobStatus::Done);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.printing, 0);
        assert_eq!(stats.done, 1);
        assert_eq!(stats.total(), 3);
    }
}
