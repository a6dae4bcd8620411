use crate::client::EndpointClient;
use crate::config::DaemonConfig;
use crate::endpoint_pool::{Endpoint, EndpointPool, PollOutcome};
use crate::errors::{DaemonError, Result};
use crate::job::{JobId, PrintJob};
use crate::printer::{CommandBackend, Dispatcher, PrintBackend, PrintOutcome};
use crate::sentry_init;
use crate::source::JobSource;
use crate::telemetry::{TelemetryCollector, TelemetryEvent};
use backon::{ExponentialBuilder, Retryable};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Attempts for one acknowledgement, on top of the first try.
const ACK_RETRIES: usize = 3;

/// The daemon's poll / print / acknowledge loop.
///
/// One cooperative loop: poll the next endpoint in the round, print what it
/// hands out, acknowledge it, repeat. Shutdown is checked at the top of the
/// loop, during the idle sleep, during the queue wait and after each print.
pub struct JobPoller {
    pool: EndpointPool,
    dispatcher: Dispatcher,
    telemetry: Arc<TelemetryCollector>,
    idle_interval: Duration,
    ack_min_delay: Duration,
}

impl JobPoller {
    pub fn new(
        pool: EndpointPool,
        dispatcher: Dispatcher,
        telemetry: Arc<TelemetryCollector>,
        idle_interval: Duration,
    ) -> Self {
        Self {
            pool,
            dispatcher,
            telemetry,
            idle_interval,
            ack_min_delay: Duration::from_millis(500),
        }
    }

    /// Build the daemon from configuration: one HTTP session per endpoint and
    /// the command print backend.
    pub fn from_config(config: &DaemonConfig, telemetry: Arc<TelemetryCollector>) -> Result<Self> {
        config.validate()?;

        let mut endpoints = Vec::with_capacity(config.endpoints.len());
        for endpoint in &config.endpoints {
            let client = EndpointClient::new(endpoint, config.request_timeout())?;
            endpoints.push(Endpoint::new(
                endpoint.name.clone(),
                Arc::new(client),
                config.auto_done_for(endpoint),
            ));
        }

        let backend: Arc<dyn PrintBackend> = Arc::new(CommandBackend::new(
            config.render.clone(),
            config.queue_probe.clone(),
            config.printer.clone(),
        ));
        let dispatcher = Dispatcher::new(
            backend,
            config.spool_dir.clone(),
            config.wait_for_queue,
            config.queue_poll_interval(),
        );

        Ok(Self::new(
            EndpointPool::new(endpoints)?,
            dispatcher,
            telemetry,
            config.idle_interval(),
        ))
    }

    /// Base delay between acknowledgement retries.
    pub fn with_ack_min_delay(mut self, delay: Duration) -> Self {
        self.ack_min_delay = delay;
        self
    }

    /// Run until `cancel` fires (`Ok`) or a fatal error occurs (`Err`).
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!(
            "Print daemon started, polling {} endpoint(s) every {}s when idle",
            self.pool.len(),
            self.idle_interval.as_secs()
        );

        let result = self.poll_loop(&cancel).await;

        if let Err(e) = &result {
            error!("error: {}", e);
        }
        self.telemetry.log_summary().await;
        self.pool.close();
        result
    }

    async fn poll_loop(&mut self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if self.pool.should_sleep() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.idle_interval) => {}
                }
            }

            if cancel.is_cancelled() {
                info!("Received signal, exiting.");
                return Ok(());
            }

            let index = self.pool.next();
            let name = self.pool.get(index).name.clone();
            let source = self.pool.get(index).source.clone();
            let auto_done = self.pool.get(index).auto_done;

            // Not raced against the token: a claimed job must reach the printer
            let polled = source.next_job().await;

            let job = match polled {
                Ok(Some(job)) => {
                    self.record(index, &name, PollOutcome::Work).await;
                    job
                }
                Ok(None) => {
                    self.record(index, &name, PollOutcome::NoWork).await;
                    continue;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Endpoint {}: {}", name, e);
                    self.record(index, &name, PollOutcome::Error).await;
                    self.telemetry
                        .record_event(TelemetryEvent::EndpointError {
                            endpoint: name,
                            error: e.to_string(),
                        })
                        .await;
                    continue;
                }
            };

            self.print(&name, &job, cancel).await;

            if auto_done {
                self.acknowledge(&name, source.as_ref(), job.id).await;
            }

            if cancel.is_cancelled() {
                info!("Received signal, exiting.");
                return Ok(());
            }
        }
    }

    async fn record(&mut self, index: usize, name: &str, outcome: PollOutcome) {
        if self.pool.record(index, outcome) {
            self.telemetry
                .record_event(TelemetryEvent::EndpointReconnected {
                    endpoint: name.to_string(),
                })
                .await;
        }
    }

    async fn print(&self, endpoint: &str, job: &PrintJob, cancel: &CancellationToken) {
        info!("Printing request p{} (endpoint {})...", job.id, endpoint);
        let started = Instant::now();

        let event = match self.dispatcher.dispatch(job, cancel).await {
            PrintOutcome::Printed => {
                debug!("Print job {} finished in {:?}", job.id, started.elapsed());
                TelemetryEvent::JobPrinted {
                    endpoint: endpoint.to_string(),
                    job_id: job.id,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
            PrintOutcome::Failed(error) => {
                sentry_init::capture_print_failure(endpoint, job.id, &error);
                TelemetryEvent::JobFailed {
                    endpoint: endpoint.to_string(),
                    job_id: job.id,
                    error,
                }
            }
            PrintOutcome::Interrupted => TelemetryEvent::JobInterrupted {
                endpoint: endpoint.to_string(),
                job_id: job.id,
            },
        };
        self.telemetry.record_event(event).await;
    }

    /// Mark a job done, retrying transient failures. Never fatal.
    async fn acknowledge(&self, endpoint: &str, source: &dyn JobSource, id: JobId) {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.ack_min_delay)
            .with_max_delay(self.ack_min_delay * 8)
            .with_max_times(ACK_RETRIES);

        let result = (move || async move { source.acknowledge(id).await })
            .retry(backoff)
            .when(|e: &DaemonError| e.is_transient())
            .notify(|e: &DaemonError, delay: Duration| {
                debug!("Acknowledging job {} failed ({}), retrying in {:?}", id, e, delay);
            })
            .await;

        let event = match result {
            Ok(()) => {
                debug!("Print job {} marked done on endpoint {}", id, endpoint);
                TelemetryEvent::JobAcknowledged {
                    endpoint: endpoint.to_string(),
                    job_id: id,
                }
            }
            Err(DaemonError::JobNotFound(_)) => {
                warn!("Print job {} no longer exists on endpoint {}", id, endpoint);
                TelemetryEvent::AcknowledgeFailed {
                    endpoint: endpoint.to_string(),
                    job_id: id,
                    error: "not found".to_string(),
                }
            }
            Err(e) => {
                warn!("Could not mark print job {} done on endpoint {}: {}", id, endpoint, e);
                TelemetryEvent::AcknowledgeFailed {
                    endpoint: endpoint.to_string(),
                    job_id: id,
                    error: e.to_string(),
                }
            }
        };
        self.telemetry.record_event(event).await;
    }
}
