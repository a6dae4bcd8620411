use crate::errors::{DaemonError, Result};
use crate::status::JobStatus;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize};

pub type JobId = i64;

/// Language tag used when a job was submitted without one.
pub const PLAIN_LANGUAGE: &str = "plain";

/// One print request.
///
/// The same type serves both query shapes of the store: listings leave
/// `payload` empty, `fetch_full` fills it in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintJob {
    pub id: JobId,
    /// Submission time in fractional seconds since the Unix epoch (FIFO key)
    pub submitted_at: f64,
    /// Display label of the requester, e.g. `t12: Team Rocket`
    pub requester: String,
    pub filename: String,
    pub language: String,
    /// Destination room, only known for team requesters
    pub room: Option<String>,
    pub claimed: bool,
    pub done: bool,
    #[serde(skip)]
    pub payload: Option<Vec<u8>>,
}

impl PrintJob {
    /// A done job counts as done even if its claimed flag was lost.
    pub fn status(&self) -> JobStatus {
        JobStatus::from_flags(self.claimed, self.done).unwrap_or(JobStatus::Done)
    }

    /// Drop the payload, keeping only the summary fields.
    pub fn into_summary(mut self) -> Self {
        self.payload = None;
        self
    }
}

/// Who asked for a print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Requester {
    Team {
        id: i64,
        name: String,
        #[serde(default)]
        room: Option<String>,
    },
    User {
        id: i64,
        name: String,
    },
}

impl Requester {
    /// Label printed in the page header and shown to operators.
    pub fn label(&self) -> String {
        match self {
            Requester::Team { id, name, .. } => format!("t{}: {}", id, name),
            Requester::User { id, name } => format!("u{}: {}", id, name),
        }
    }

    /// Destination room, derived from the requester's team.
    pub fn room(&self) -> Option<&str> {
        match self {
            Requester::Team { room, .. } => room.as_deref().filter(|r| !r.is_empty()),
            Requester::User { .. } => None,
        }
    }
}

/// A validated submission, ready to be stored.
#[derive(Debug, Clone)]
pub struct NewPrintJob {
    pub submitted_at: f64,
    pub requester: String,
    pub room: Option<String>,
    pub filename: String,
    pub language: String,
    pub payload: Vec<u8>,
}

/// Current time as fractional Unix seconds.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Normalise an empty language tag to `plain`.
pub fn normalize_language(language: &str) -> String {
    let trimmed = language.trim();
    if trimmed.is_empty() {
        PLAIN_LANGUAGE.to_string()
    } else {
        trimmed.to_string()
    }
}

// =============================================================================
// Wire format
// =============================================================================

/// JSON record exchanged between the print server and daemons.
///
/// Field names follow the established printing API so the daemon can also
/// poll servers that speak it: `processed` is the claimed flag and
/// `sourcecode` carries the base64 payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub time: f64,
    #[serde(default)]
    pub lang: String,
    pub team: String,
    pub filename: String,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub processed: bool,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sourcecode: Option<String>,
}

impl From<&PrintJob> for JobRecord {
    fn from(job: &PrintJob) -> Self {
        Self {
            id: job.id,
            time: job.submitted_at,
            lang: normalize_language(&job.language),
            team: job.requester.clone(),
            filename: job.filename.clone(),
            room: job.room.clone(),
            processed: job.claimed,
            done: job.done,
            sourcecode: job.payload.as_ref().map(|bytes| STANDARD.encode(bytes)),
        }
    }
}

impl TryFrom<JobRecord> for PrintJob {
    type Error = DaemonError;

    fn try_from(record: JobRecord) -> Result<Self> {
        let payload = match record.sourcecode {
            Some(encoded) => Some(STANDARD.decode(encoded.trim()).map_err(|e| {
                DaemonError::MalformedResponse(format!(
                    "payload of print job {} is not valid base64: {}",
                    record.id, e
                ))
            })?),
            None => None,
        };

        Ok(PrintJob {
            id: record.id,
            submitted_at: record.time,
            requester: record.team,
            filename: record.filename,
            language: normalize_language(&record.lang),
            room: record.room.filter(|r| !r.is_empty()),
            claimed: record.processed,
            done: record.done,
            payload,
        })
    }
}

/// Accept the timestamp either as a JSON number or as a decimal string.
fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Timestamp {
        Number(f64),
        Text(String),
    }

    match Timestamp::deserialize(deserializer)? {
        Timestamp::Number(value) => Ok(value),
        Timestamp::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid timestamp '{}': {}", text, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_job() -> PrintJob {
        PrintJob {
            id: 42,
            submitted_at: 1700000000.25,
            requester: "t3: Null Pointers".to_string(),
            filename: "main.cpp".to_string(),
            language: "cpp".to_string(),
            room: Some("B12".to_string()),
            claimed: true,
            done: false,
            payload: Some(b"int main() {}\n".to_vec()),
        }
    }

    #[test]
    fn test_requester_labels() {
        let team = Requester::Team {
            id: 3,
            name: "Null Pointers".to_string(),
            room: Some("B12".to_string()),
        };
        let user = Requester::User {
            id: 8,
            name: "jury".to_string(),
        };

        assert_eq!(team.label(), "t3: Null Pointers");
        assert_eq!(team.room(), Some("B12"));
        assert_eq!(user.label(), "u8: jury");
        assert_eq!(user.room(), None);
    }

    #[test]
    fn test_empty_team_room_is_absent() {
        let team = Requester::Team {
            id: 1,
            name: "x".to_string(),
            room: Some(String::new()),
        };
        assert_eq!(team.room(), None);
    }

    #[test]
    fn test_record_carries_payload_as_base64() {
        let record = JobRecord::from(&sample_job());
        assert_eq!(record.sourcecode.as_deref(), Some("aW50IG1haW4oKSB7fQo="));
        assert!(record.processed);
        assert!(!record.done);
        assert_eq!(record.team, "t3: Null Pointers");
    }

    #[test]
    fn test_summary_record_omits_sourcecode() {
        let record = JobRecord::from(&sample_job().into_summary());
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("sourcecode").is_none());
    }

    #[test]
    fn test_record_accepts_decimal_string_time() {
        let record: JobRecord = serde_json::from_value(json!({
            "id": 5,
            "time": "1700000000.123456789",
            "lang": "",
            "team": "u2: alice",
            "filename": "notes.txt",
            "room": null,
            "processed": true,
            "done": false,
            "sourcecode": "aGVsbG8="
        }))
        .unwrap();

        let job = PrintJob::try_from(record).unwrap();
        assert!((job.submitted_at - 1700000000.123456789).abs() < 1e-6);
        assert_eq!(job.language, "plain");
        assert_eq!(job.payload.as_deref(), Some(&b"hello"[..]));
        assert_eq!(job.room, None);
    }

    #[test]
    fn test_invalid_base64_is_malformed() {
        let mut record = JobRecord::from(&sample_job());
        record.sourcecode = Some("!!not base64!!".to_string());
        let err = PrintJob::try_from(record).unwrap_err();
        assert!(matches!(err, DaemonError::MalformedResponse(_)));
    }

    #[test]
    fn test_status_from_flags() {
        let mut job = sample_job();
        assert_eq!(job.status(), JobStatus::Printing);
        job.done = true;
        assert_eq!(job.status(), JobStatus::Done);
        job.claimed = false;
        job.done = false;
        assert_eq!(job.status(), JobStatus::Pending);
    }
}
