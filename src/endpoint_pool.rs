use crate::errors::{DaemonError, Result};
use crate::source::JobSource;
use std::sync::Arc;
use tracing::info;

/// Result of one poll against an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Work,
    NoWork,
    Error,
}

/// A print server the daemon polls, with its transient poll state.
pub struct Endpoint {
    pub name: String,
    pub source: Arc<dyn JobSource>,
    /// Acknowledge jobs from this endpoint after printing
    pub auto_done: bool,
    idle: bool,
    errored: bool,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, source: Arc<dyn JobSource>, auto_done: bool) -> Self {
        Self {
            name: name.into(),
            source,
            auto_done,
            idle: false,
            errored: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    pub fn is_errored(&self) -> bool {
        self.errored
    }
}

/// Round-robin over a fixed set of endpoints.
pub struct EndpointPool {
    endpoints: Vec<Endpoint>,
    cursor: usize,
}

impl EndpointPool {
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(DaemonError::Config("endpoint pool needs at least one endpoint".into()));
        }
        Ok(Self {
            endpoints,
            cursor: 0,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Sleep only when every endpoint is idle and the round is about to
    /// start over at the first endpoint.
    pub fn should_sleep(&self) -> bool {
        self.cursor == 0 && self.endpoints.iter().all(|e| e.idle)
    }

    /// Index of the endpoint to poll now; advances the round.
    pub fn next(&mut self) -> usize {
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.endpoints.len();
        index
    }

    pub fn get(&self, index: usize) -> &Endpoint {
        &self.endpoints[index]
    }

    /// Update the poll state of endpoint `index`.
    ///
    /// Returns true when the endpoint just recovered from an error.
    pub fn record(&mut self, index: usize, outcome: PollOutcome) -> bool {
        let endpoint = &mut self.endpoints[index];

        match outcome {
            PollOutcome::Error => {
                endpoint.errored = true;
                endpoint.idle = true;
                false
            }
            PollOutcome::Work | PollOutcome::NoWork => {
                let reconnected = endpoint.errored;
                if reconnected {
                    endpoint.errored = false;
                    endpoint.idle = false;
                    info!("Reconnected to endpoint {}.", endpoint.name);
                }

                match outcome {
                    PollOutcome::Work => endpoint.idle = false,
                    _ => {
                        if !endpoint.idle {
                            info!(
                                "No print jobs in queue (endpoint {}), waiting...",
                                endpoint.name
                            );
                            endpoint.idle = true;
                        }
                    }
                }
                reconnected
            }
        }
    }

    /// Release every endpoint (drops the HTTP sessions).
    pub fn close(self) {
        for endpoint in &self.endpoints {
            info!("Closing endpoint {}", endpoint.name);
        }
    }
}
