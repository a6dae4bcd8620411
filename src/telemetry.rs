use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Telemetry event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// Print job rendered (and the queue drained, if waited for)
    JobPrinted {
        endpoint: String,
        job_id: i64,
        duration_ms: u64,
    },
    /// Renderer failed
    JobFailed {
        endpoint: String,
        job_id: i64,
        error: String,
    },
    /// Shutdown arrived while waiting for the print queue
    JobInterrupted { endpoint: String, job_id: i64 },
    /// Job marked done on its endpoint
    JobAcknowledged { endpoint: String, job_id: i64 },
    /// Acknowledgement did not go through
    AcknowledgeFailed {
        endpoint: String,
        job_id: i64,
        error: String,
    },
    /// A poll against an endpoint failed
    EndpointError { endpoint: String, error: String },
    /// A previously failing endpoint answered again
    EndpointReconnected { endpoint: String },
}

/// Counters for one daemon run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryMetrics {
    pub jobs_printed: u64,
    pub jobs_failed: u64,
    pub jobs_interrupted: u64,
    pub jobs_acknowledged: u64,
    pub acknowledge_failures: u64,
    pub endpoint_errors: u64,
    pub reconnects: u64,
    /// Average print duration (milliseconds)
    pub avg_print_duration_ms: u64,
    /// Success rate (0.0 - 1.0)
    pub success_rate: f64,
    pub last_update_ts: u64,
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self {
            jobs_printed: 0,
            jobs_failed: 0,
            jobs_interrupted: 0,
            jobs_acknowledged: 0,
            acknowledge_failures: 0,
            endpoint_errors: 0,
            reconnects: 0,
            avg_print_duration_ms: 0,
            success_rate: 1.0,
            last_update_ts: unix_now(),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Telemetry collector for aggregating metrics
pub struct TelemetryCollector {
    metrics: Arc<RwLock<TelemetryMetrics>>,
    total_print_ms: Arc<RwLock<u64>>,
}

impl TelemetryCollector {
    pub fn new() -> Self {
        debug!("Initializing telemetry collector");
        Self {
            metrics: Arc::new(RwLock::new(TelemetryMetrics::default())),
            total_print_ms: Arc::new(RwLock::new(0)),
        }
    }

    /// Record telemetry event
    pub async fn record_event(&self, event: TelemetryEvent) {
        let mut metrics = self.metrics.write().await;

        match &event {
            TelemetryEvent::JobPrinted { duration_ms, .. } => {
                metrics.jobs_printed += 1;
                let mut total = self.total_print_ms.write().await;
                *total += duration_ms;
                metrics.avg_print_duration_ms = *total / metrics.jobs_printed;
            }
            TelemetryEvent::JobFailed { .. } => metrics.jobs_failed += 1,
            TelemetryEvent::JobInterrupted { .. } => metrics.jobs_interrupted += 1,
            TelemetryEvent::JobAcknowledged { .. } => metrics.jobs_acknowledged += 1,
            TelemetryEvent::AcknowledgeFailed { .. } => metrics.acknowledge_failures += 1,
            TelemetryEvent::EndpointError { .. } => metrics.endpoint_errors += 1,
            TelemetryEvent::EndpointReconnected { .. } => metrics.reconnects += 1,
        }

        let attempts = metrics.jobs_printed + metrics.jobs_failed;
        if attempts > 0 {
            metrics.success_rate = metrics.jobs_printed as f64 / attempts as f64;
        }
        metrics.last_update_ts = unix_now();
        debug!("Telemetry event: {:?}", event);
    }

    pub async fn get_metrics(&self) -> TelemetryMetrics {
        self.metrics.read().await.clone()
    }

    /// Log the counters, used once at shutdown.
    pub async fn log_summary(&self) {
        let metrics = self.get_metrics().await;
        info!(
            "Session summary - Jobs: {} printed, {} failed, {} interrupted, {} acknowledged | Success: {:.1}% | Avg duration: {}ms | Endpoint errors: {}, reconnects: {}",
            metrics.jobs_printed,
            metrics.jobs_failed,
            metrics.jobs_interrupted,
            metrics.jobs_acknowledged,
            metrics.success_rate * 100.0,
            metrics.avg_print_duration_ms,
            metrics.endpoint_errors,
            metrics.reconnects,
        );
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printed(job_id: i64, duration_ms: u64) -> TelemetryEvent {
        TelemetryEvent::JobPrinted {
            endpoint: "main".to_string(),
            job_id,
            duration_ms,
        }
    }

    #[tokio::test]
    async fn test_record_job_printed() {
        let collector = TelemetryCollector::new();
        collector.record_event(printed(1, 150)).await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.jobs_printed, 1);
        assert_eq!(metrics.avg_print_duration_ms, 150);
        assert_eq!(metrics.success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_success_rate_calculation() {
        let collector = TelemetryCollector::new();

        // 3 printed, 1 failed = 75% success rate
        for i in 0..3 {
            collector.record_event(printed(i, 100)).await;
        }
        collector
            .record_event(TelemetryEvent::JobFailed {
                endpoint: "main".to_string(),
                job_id: 9,
                error: "enscript exited with 1".to_string(),
            })
            .await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.jobs_printed, 3);
        assert_eq!(metrics.jobs_failed, 1);
        assert!((metrics.success_rate - 0.75).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_endpoint_counters() {
        let collector = TelemetryCollector::new();
        collector
            .record_event(TelemetryEvent::EndpointError {
                endpoint: "backup".to_string(),
                error: "connection refused".to_string(),
            })
            .await;
        collector
            .record_event(TelemetryEvent::EndpointReconnected {
                endpoint: "backup".to_string(),
            })
            .await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.endpoint_errors, 1);
        assert_eq!(metrics.reconnects, 1);
        // Endpoint trouble does not count against print success
        assert_eq!(metrics.success_rate, 1.0);
    }
}
