use crate::config::{QueueProbeConfig, RenderConfig};
use crate::errors::{DaemonError, Result};
use crate::job::PrintJob;
use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Job language id to renderer highlighting language.
///
/// `None` (and any language not listed) prints without highlighting.
pub const LANGUAGE_HINTS: &[(&str, Option<&str>)] = &[
    ("adb", Some("ada")),
    ("awk", Some("awk")),
    ("bash", Some("sh")),
    ("c", Some("c")),
    ("csharp", Some("c")),
    ("cpp", Some("cpp")),
    ("f95", Some("f90")),
    ("hs", Some("haskell")),
    ("java", Some("java")),
    ("js", Some("javascript")),
    ("kt", Some("kt")),
    ("lua", Some("lua")),
    ("pas", Some("pascal")),
    ("pl", Some("perl")),
    ("sh", Some("sh")),
    ("plg", Some("prolog")),
    ("py", Some("python")),
    ("py2", Some("python")),
    ("py3", Some("python")),
    ("r", Some("r")),
    ("rb", Some("ruby")),
    ("scala", Some("scala")),
    ("swift", Some("swift")),
    ("plain", None),
];

pub fn highlight_for(language: &str) -> Option<&'static str> {
    LANGUAGE_HINTS
        .iter()
        .find(|(id, _)| *id == language)
        .and_then(|(_, hint)| *hint)
}

/// Page header: requester, room when known, filename and page counter.
pub fn page_header(requester: &str, room: Option<&str>, filename: &str) -> String {
    let location = room
        .filter(|r| !r.is_empty())
        .map(|r| format!(" [{}]", r))
        .unwrap_or_default();
    format!(
        "Team: {}{} File: {}||Page $% of $=",
        requester, location, filename
    )
}

/// What the renderer is asked to print.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub path: PathBuf,
    pub filename: String,
    pub highlight: Option<&'static str>,
    pub header: String,
}

/// Opaque printing capability.
#[async_trait]
pub trait PrintBackend: Send + Sync {
    /// Render the file at `request.path` to the printer.
    async fn render(&self, request: &RenderRequest) -> Result<()>;

    /// Whether the device queue has drained.
    async fn queue_is_empty(&self) -> Result<bool>;
}

/// Prints through external commands (`enscript` and `lpq` by default).
///
/// Arguments are passed as argv, never through a shell.
pub struct CommandBackend {
    render: RenderConfig,
    probe: QueueProbeConfig,
    printer: Option<String>,
}

impl CommandBackend {
    pub fn new(render: RenderConfig, probe: QueueProbeConfig, printer: Option<String>) -> Self {
        Self {
            render,
            probe,
            printer: printer.filter(|p| !p.is_empty()),
        }
    }

    pub fn render_args(&self, request: &RenderRequest) -> Vec<String> {
        let mut args = vec!["-C".to_string()];
        if let Some(lang) = request.highlight {
            args.push(format!("-E{}", lang));
        }
        if let Some(printer) = &self.printer {
            args.push("-d".to_string());
            args.push(printer.clone());
        }
        args.extend([
            "-b".to_string(),
            request.header.clone(),
            "-a".to_string(),
            self.render.pages.clone(),
            "-f".to_string(),
            self.render.font.clone(),
            request.path.display().to_string(),
        ]);
        args
    }

    pub fn probe_args(&self) -> Vec<String> {
        match &self.printer {
            Some(printer) => vec!["-P".to_string(), printer.clone()],
            None => Vec::new(),
        }
    }
}

/// True when any line of the probe output contains `marker` (case-insensitive).
pub fn output_reports_empty(output: &str, marker: &str) -> bool {
    let marker = marker.to_lowercase();
    output
        .lines()
        .any(|line| line.to_lowercase().contains(&marker))
}

#[async_trait]
impl PrintBackend for CommandBackend {
    async fn render(&self, request: &RenderRequest) -> Result<()> {
        let args = self.render_args(request);
        debug!("Running {} {:?}", self.render.program, args);

        let output = Command::new(&self.render.program)
            .args(&args)
            .env("LANG", "en_US")
            .output()
            .await
            .map_err(|e| {
                DaemonError::PrintJob(format!("cannot run {}: {}", self.render.program, e))
            })?;

        for line in String::from_utf8_lossy(&output.stdout)
            .lines()
            .chain(String::from_utf8_lossy(&output.stderr).lines())
        {
            info!("{}: {}", self.render.program, line);
        }

        if !output.status.success() {
            return Err(DaemonError::PrintJob(format!(
                "{} exited with {}",
                self.render.program, output.status
            )));
        }
        Ok(())
    }

    async fn queue_is_empty(&self) -> Result<bool> {
        let output = Command::new(&self.probe.program)
            .args(self.probe_args())
            .output()
            .await
            .map_err(|e| DaemonError::PrintJob(format!("cannot run {}: {}", self.probe.program, e)))?;

        if !output.status.success() {
            return Err(DaemonError::PrintJob(format!(
                "{} exited with {}",
                self.probe.program, output.status
            )));
        }

        Ok(output_reports_empty(
            &String::from_utf8_lossy(&output.stdout),
            &self.probe.empty_marker,
        ))
    }
}

/// How a print attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintOutcome {
    /// Rendered and, if requested, the queue drained
    Printed,
    Failed(String),
    /// Rendered, but shutdown was requested while waiting for the queue.
    /// The submitted physical job is not retracted.
    Interrupted,
}

/// Hands claimed jobs to a `PrintBackend`.
pub struct Dispatcher {
    backend: Arc<dyn PrintBackend>,
    spool_dir: Option<PathBuf>,
    wait_for_queue: bool,
    queue_poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn PrintBackend>,
        spool_dir: Option<PathBuf>,
        wait_for_queue: bool,
        queue_poll_interval: Duration,
    ) -> Self {
        Self {
            backend,
            spool_dir,
            wait_for_queue,
            queue_poll_interval,
        }
    }

    /// Print one claimed job. Never fails: problems become `PrintOutcome::Failed`.
    ///
    /// The payload is written to a temporary file that lives exactly as long
    /// as this call.
    pub async fn dispatch(&self, job: &PrintJob, cancel: &CancellationToken) -> PrintOutcome {
        let spool = match self.spool(job) {
            Ok(file) => file,
            Err(e) => {
                warn!("Cannot spool print job {}: {}", job.id, e);
                return PrintOutcome::Failed(e.to_string());
            }
        };

        let request = RenderRequest {
            path: spool.path().to_path_buf(),
            filename: job.filename.clone(),
            highlight: highlight_for(&job.language),
            header: page_header(&job.requester, job.room.as_deref(), &job.filename),
        };

        if let Err(e) = self.backend.render(&request).await {
            warn!("Printing job {} failed, please check the printer: {}", job.id, e);
            return PrintOutcome::Failed(e.to_string());
        }

        if self.wait_for_queue && !self.wait_until_drained(cancel).await {
            info!("Stopped waiting for the print queue of job {}", job.id);
            return PrintOutcome::Interrupted;
        }

        PrintOutcome::Printed
    }

    fn spool(&self, job: &PrintJob) -> std::io::Result<tempfile::NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        let prefix = format!("printd_p{}_", job.id);
        builder.prefix(&prefix);

        let mut file = match &self.spool_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(job.payload.as_deref().unwrap_or_default())?;
        file.flush()?;
        Ok(file)
    }

    /// Poll the queue until it is empty. Returns false when cancelled.
    async fn wait_until_drained(&self, cancel: &CancellationToken) -> bool {
        loop {
            match self.backend.queue_is_empty().await {
                Ok(true) => return true,
                Ok(false) => info!("Printing queue not empty, waiting..."),
                Err(e) => {
                    warn!("Print queue probe failed, not waiting for it: {}", e);
                    return true;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.queue_poll_interval) => {}
            }
        }
    }
}
