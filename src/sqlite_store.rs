use crate::errors::Result;
use crate::job::{normalize_language, JobId, NewPrintJob, PrintJob};
use crate::status::{JobStatus, QueueStats};
use crate::store::JobStore;
use async_trait::async_trait;
use rusqlite::OptionalExtension;
use std::path::Path;
use std::time::Duration;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

const SUMMARY_COLUMNS: &str =
    "id, submitted_at, requester, room, filename, language, claimed, done";

/// SQLite-backed job store used by the print server.
pub struct SqliteJobStore {
    conn: Connection,
}

impl SqliteJobStore {
    /// Open (or create) the job database at `db_path`.
    ///
    /// `:memory:` gives a private in-memory database, which the tests use.
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if db_path != Path::new(":memory:") {
            if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            // Several server processes may share one database file
            conn.busy_timeout(Duration::from_secs(5))?;

            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS print_jobs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    submitted_at REAL NOT NULL,
                    requester TEXT NOT NULL,
                    room TEXT,
                    filename TEXT NOT NULL,
                    language TEXT NOT NULL DEFAULT 'plain',
                    payload BLOB NOT NULL,
                    claimed INTEGER NOT NULL DEFAULT 0,
                    done INTEGER NOT NULL DEFAULT 0,
                    CHECK (NOT (done = 1 AND claimed = 0))
                )
                "#,
                [],
            )?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_unclaimed ON print_jobs(claimed, submitted_at)",
                [],
            )?;

            Ok(())
        })
        .await?;

        info!("Print job database ready at {}", db_path.display());

        Ok(Self { conn })
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrintJob> {
    Ok(PrintJob {
        id: row.get(0)?,
        submitted_at: row.get(1)?,
        requester: row.get(2)?,
        room: row.get(3)?,
        filename: row.get(4)?,
        language: row.get(5)?,
        claimed: row.get(6)?,
        done: row.get(7)?,
        payload: None,
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: NewPrintJob) -> Result<PrintJob> {
        let language = normalize_language(&job.language);

        let stored = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO print_jobs (submitted_at, requester, room, filename, language, payload)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    rusqlite::params![
                        job.submitted_at,
                        job.requester,
                        job.room,
                        job.filename,
                        language,
                        job.payload,
                    ],
                )?;

                Ok(PrintJob {
                    id: conn.last_insert_rowid(),
                    submitted_at: job.submitted_at,
                    requester: job.requester,
                    filename: job.filename,
                    language,
                    room: job.room,
                    claimed: false,
                    done: false,
                    payload: Some(job.payload),
                })
            })
            .await?;

        debug!("Stored print job {} ({})", stored.id, stored.filename);
        Ok(stored)
    }

    async fn list_unclaimed(&self) -> Result<Vec<PrintJob>> {
        let jobs = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM print_jobs WHERE claimed = 0 ORDER BY submitted_at ASC, id ASC",
                    SUMMARY_COLUMNS
                ))?;
                let rows = stmt.query_map([], row_to_job)?;

                let mut jobs = Vec::new();
                for job in rows {
                    jobs.push(job?);
                }
                Ok(jobs)
            })
            .await?;

        Ok(jobs)
    }

    async fn claim(&self, id: JobId) -> Result<u64> {
        let updated = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE print_jobs SET claimed = 1 WHERE id = ?1 AND claimed = 0",
                    [id],
                )?;
                Ok(n as u64)
            })
            .await?;

        Ok(updated)
    }

    async fn fetch_full(&self, id: JobId) -> Result<Option<PrintJob>> {
        let job = self
            .conn
            .call(move |conn| {
                let job = conn
                    .query_row(
                        &format!(
                            "SELECT {}, payload FROM print_jobs WHERE id = ?1",
                            SUMMARY_COLUMNS
                        ),
                        [id],
                        |row| {
                            let mut job = row_to_job(row)?;
                            job.payload = Some(row.get(8)?);
                            Ok(job)
                        },
                    )
                    .optional()?;
                Ok(job)
            })
            .await?;

        Ok(job)
    }

    async fn mark_done(&self, id: JobId) -> Result<bool> {
        let updated = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE print_jobs SET claimed = 1, done = 1 WHERE id = ?1",
                    [id],
                )?;
                Ok(n)
            })
            .await?;

        Ok(updated == 1)
    }

    async fn mark_undone(&self, id: JobId) -> Result<bool> {
        let updated = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE print_jobs SET claimed = 0, done = 0 WHERE id = ?1",
                    [id],
                )?;
                Ok(n)
            })
            .await?;

        Ok(updated == 1)
    }

    async fn delete_all_done(&self) -> Result<u64> {
        let deleted = self
            .conn
            .call(|conn| {
                let n = conn.execute("DELETE FROM print_jobs WHERE done = 1", [])?;
                Ok(n as u64)
            })
            .await?;

        info!("Purged {} completed print jobs", deleted);
        Ok(deleted)
    }

    async fn list_all(&self) -> Result<Vec<PrintJob>> {
        let jobs = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM print_jobs ORDER BY submitted_at DESC, id DESC",
                    SUMMARY_COLUMNS
                ))?;
                let rows = stmt.query_map([], row_to_job)?;

                let mut jobs = Vec::new();
                for job in rows {
                    jobs.push(job?);
                }
                Ok(jobs)
            })
            .await?;

        Ok(jobs)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let counts = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT claimed, done, COUNT(*)
                    FROM print_jobs
                    GROUP BY claimed, done
                    "#,
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, bool>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })?;

                let mut counts = Vec::new();
                for row in rows {
                    counts.push(row?);
                }
                Ok(counts)
            })
            .await?;

        let mut stats = QueueStats::default();
        for (claimed, done, count) in counts {
            // The CHECK constraint rules out done-but-unclaimed rows
            let status = JobStatus::from_flags(claimed, done).unwrap_or(JobStatus::Done);
            stats.add_count(status, count as u64);
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
            requester: "t7: Segfaults".to_string(),
            room: Some("A1".to_string()),
            filename: filename.to_string(),
            language: "py3".to_string(),
            payload: b"print('hi')\n".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch_full() {
        let store = SqliteJobStore::open(":memory:").await.unwrap();
        let job = store.insert(new_job(10.5, "a.py")).await.unwrap();

        let full = store.fetch_full(job.id).await.unwrap().unwrap();
        assert_eq!(full.filename, "a.py");
        assert_eq!(full.room.as_deref(), Some("A1"));
        assert_eq!(full.payload.as_deref(), Some(&b"print('hi')\n"[..]));
        assert!(!full.claimed);
        assert!(!full.done);
    }

    #[tokio::test]
    async fn test_fetch_full_unknown_id() {
        let store = SqliteJobStore::open(":memory:").await.unwrap();
        assert!(store.fetch_full(12).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conditional_claim_affects_one_row_once() {
        let store = SqliteJobStore::open(":memory:").await.unwrap();
        let job = store.insert(new_job(1.0, "a.py")).await.unwrap();

        assert_eq!(store.claim(job.id).await.unwrap(), 1);
        assert_eq!(store.claim(job.id).await.unwrap(), 0);
        assert!(store.list_unclaimed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_undone_requeues() {
        let store = SqliteJobStore::open(":memory:").await.unwrap();
        let job = store.insert(new_job(1.0, "a.py")).await.unwrap();
        store.claim(job.id).await.unwrap();
        store.mark_done(job.id).await.unwrap();

        assert!(store.mark_undone(job.id).await.unwrap());
        let unclaimed = store.list_unclaimed().await.unwrap();
        assert_eq!(unclaimed.len(), 1);
        assert_eq!(unclaimed[0].id, job.id);
    }

    #[tokio::test]
    async fn test_stats_by_status() {
        let store = SqliteJobStore::open(":memory:").await.unwrap();
        let a = store.insert(new_job(1.0, "a.py")).await.unwrap();
        let b = store.insert(new_job(2.0, "b.py")).await.unwrap();
        store.insert(new_job(3.0, "c.py")).await.unwrap();
        store.claim(a.id).await.unwrap();
        store.mark_done(b.id).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats, QueueStats { pending: 1, printing: 1, done: 1 });
    }

    #[tokio::test]
    async fn test_list_all_newest_first() {
        let store = SqliteJobStore::open(":memory:").await.unwrap();
        store.insert(new_job(1.0, "old.py")).await.unwrap();
        store.insert(new_job(2.0, "new.py")).await.unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all[0].filename, "new.py");
        assert!(all.iter().all(|j| j.payload.is_none()));
    }
}
