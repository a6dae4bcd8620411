use crate::errors::{DaemonError, Result};
use crate::submission::DEFAULT_SIZE_LIMIT_KB;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One print server the daemon polls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    /// Base URL of the printing API, e.g. `http://judge.local/api`
    pub url: String,
    pub username: String,
    pub password: String,
    /// Overrides the daemon-wide `auto_done` for this endpoint
    #[serde(default)]
    pub auto_done: Option<bool>,
}

/// Renderer invocation (`enscript` by default).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub program: String,
    /// Page range passed to the renderer
    pub pages: String,
    pub font: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            program: "enscript".to_string(),
            pages: "0-10".to_string(),
            font: "Courier9".to_string(),
        }
    }
}

/// Print queue probe (`lpq` by default).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueProbeConfig {
    pub program: String,
    /// Text in the probe output meaning the queue is empty (case-insensitive)
    pub empty_marker: String,
}

impl Default for QueueProbeConfig {
    fn default() -> Self {
        Self {
            program: "lpq".to_string(),
            empty_marker: "no entries".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default = "default_true")]
    pub auto_done: bool,
    #[serde(default = "default_true")]
    pub wait_for_queue: bool,
    #[serde(default = "default_interval_secs")]
    pub idle_interval_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub queue_poll_interval_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub request_timeout_secs: u64,
    /// Printer destination name, system default when unset
    #[serde(default)]
    pub printer: Option<String>,
    /// Directory for temporary print files, system temp dir when unset
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub queue_probe: QueueProbeConfig,
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    5
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            auto_done: true,
            wait_for_queue: true,
            idle_interval_secs: default_interval_secs(),
            queue_poll_interval_secs: default_interval_secs(),
            request_timeout_secs: default_interval_secs(),
            printer: None,
            spool_dir: None,
            render: RenderConfig::default(),
            queue_probe: QueueProbeConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(DaemonError::Config("no endpoints configured".into()));
        }

        for (key, value) in [
            ("idle_interval_secs", self.idle_interval_secs),
            ("queue_poll_interval_secs", self.queue_poll_interval_secs),
            ("request_timeout_secs", self.request_timeout_secs),
        ] {
            if value == 0 {
                return Err(DaemonError::Config(format!("{} must be positive", key)));
            }
        }

        let mut names = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.trim().is_empty() {
                return Err(DaemonError::Config("endpoint name must not be empty".into()));
            }
            if !names.insert(endpoint.name.as_str()) {
                return Err(DaemonError::Config(format!(
                    "duplicate endpoint name '{}'",
                    endpoint.name
                )));
            }
            validate_url(&endpoint.name, &endpoint.url)?;
        }

        Ok(())
    }

    /// Whether jobs from `endpoint` are acknowledged after printing.
    pub fn auto_done_for(&self, endpoint: &EndpointConfig) -> bool {
        endpoint.auto_done.unwrap_or(self.auto_done)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_secs(self.queue_poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn validate_url(name: &str, url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| DaemonError::Config(format!("endpoint '{}' has invalid url '{}': {}", name, url, e)))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(DaemonError::Config(format!(
            "endpoint '{}' uses unsupported scheme '{}'",
            name, other
        ))),
    }
}

/// An account allowed to use the print server API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiUser {
    pub username: String,
    /// Hex SHA-256 of the password
    pub password_sha256: String,
    /// May purge completed jobs; implies `operator`
    #[serde(default)]
    pub admin: bool,
    /// May claim, download and manage jobs (print daemons and jury)
    #[serde(default)]
    pub operator: bool,
    /// Team the user prints for; users without one print as themselves
    #[serde(default)]
    pub team: Option<TeamConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub room: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// SQLite database file, platform data dir when unset
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default = "default_size_limit_kb")]
    pub source_size_limit_kb: u64,
    #[serde(default)]
    pub users: Vec<ApiUser>,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_size_limit_kb() -> u64 {
    DEFAULT_SIZE_LIMIT_KB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            database: None,
            source_size_limit_kb: default_size_limit_kb(),
            users: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_size_limit_kb == 0 {
            return Err(DaemonError::Config("source_size_limit_kb must be positive".into()));
        }
        if self.users.is_empty() {
            return Err(DaemonError::Config("no API users configured".into()));
        }
        for user in &self.users {
            if user.password_sha256.len() != 64 || hex::decode(&user.password_sha256).is_err() {
                return Err(DaemonError::Config(format!(
                    "user '{}' password_sha256 must be 64 hex characters",
                    user.username
                )));
            }
        }
        self.listen
            .parse::<std::net::SocketAddr>()
            .map_err(|e| DaemonError::Config(format!("invalid listen address '{}': {}", self.listen, e)))?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(default_database_path)
    }
}

pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("printd"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("print-jobs.db")
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| DaemonError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&raw)
        .map_err(|e| DaemonError::Config(format!("invalid config {}: {}", path.display(), e)))
}
