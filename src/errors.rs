use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Print job not found: {0}")]
    JobNotFound(i64),

    #[error("{0}")]
    Submission(String),

    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("Print job failed: {0}")]
    PrintJob(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DaemonError {
    /// Errors the daemon cannot recover from by polling again.
    ///
    /// Everything else talking to an endpoint is logged, marks the
    /// endpoint as errored and the poll loop carries on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DaemonError::MalformedResponse(_) | DaemonError::Config(_))
    }

    /// Errors worth retrying against the same endpoint.
    pub fn is_transient(&self) -> bool {
        matches!(self, DaemonError::Network(_))
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
