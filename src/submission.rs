use crate::errors::{DaemonError, Result};
use crate::job::{now_timestamp, NewPrintJob, PrintJob, Requester};
use crate::store::JobStore;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use tracing::{debug, info};

/// Default upload cap in kB.
pub const DEFAULT_SIZE_LIMIT_KB: u64 = 256;

static FILENAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9+_.-]*$").expect("valid filename regex"));

/// Where the bytes of a submission come from.
#[derive(Debug, Clone)]
pub enum PrintSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

impl PrintSource {
    /// Decode a base64 upload. An undecodable upload is reported like an
    /// unreadable file.
    pub fn from_base64(filename: &str, encoded: &str) -> Result<Self> {
        STANDARD
            .decode(encoded.trim())
            .map(PrintSource::Bytes)
            .map_err(|e| {
                debug!("Upload of '{}' is not valid base64: {}", filename, e);
                unreadable(filename)
            })
    }
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub filename: String,
    pub language: String,
    pub requester: Requester,
    pub source: PrintSource,
    /// Defaults to now
    pub submitted_at: Option<f64>,
}

/// An accepted submission.
#[derive(Debug, Clone)]
pub struct Submitted {
    pub job: PrintJob,
    pub message: String,
}

fn unreadable(name: &str) -> DaemonError {
    DaemonError::Submission(format!("File '{}' not found (or not readable).", name))
}

pub fn is_valid_filename(filename: &str) -> bool {
    FILENAME_RE.is_match(filename)
}

/// Validate a print submission and store it as a new unclaimed job.
///
/// Rejections carry a human-readable message and never create a job.
pub async fn submit_print(
    store: &dyn JobStore,
    request: SubmitRequest,
    size_limit_kb: u64,
) -> Result<Submitted> {
    let payload = match request.source {
        PrintSource::Bytes(bytes) => bytes,
        PrintSource::Path(path) => tokio::fs::read(&path)
            .await
            .map_err(|_| unreadable(&path.display().to_string()))?,
    };

    if !is_valid_filename(&request.filename) {
        return Err(DaemonError::Submission(format!(
            "Illegal filename '{}'.",
            request.filename
        )));
    }

    if payload.len() as u64 > size_limit_kb * 1024 {
        return Err(DaemonError::Submission(format!(
            "Print file is larger than {} kB.",
            size_limit_kb
        )));
    }

    debug!("Submission of '{}' verified", request.filename);

    let job = store
        .insert(NewPrintJob {
            submitted_at: request.submitted_at.unwrap_or_else(now_timestamp),
            requester: request.requester.label(),
            room: request.requester.room().map(str::to_string),
            filename: request.filename,
            language: request.language,
            payload,
        })
        .await?;

    info!(
        job_id = job.id,
        requester = %job.requester,
        "Accepted print job '{}'",
        job.filename
    );

    Ok(Submitted {
        message: format!("Printing {} saved, please wait...", job.id),
        job,
    })
}
