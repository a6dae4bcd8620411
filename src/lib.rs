//! printd: a print queue server and the cooperative daemon that drains it.
//!
//! The server stores submitted files and hands each one out exactly once.
//! Daemons poll one or more servers, render jobs to a printer and mark them
//! done.

pub mod api;
pub mod auth;
pub mod claim;
pub mod client;
pub mod config;
pub mod endpoint_pool;
pub mod errors;
pub mod job;
pub mod job_poller;
pub mod logging;
pub mod memory_store;
pub mod printer;
pub mod sentry_init;
pub mod shutdown;
pub mod source;
pub mod sqlite_store;
pub mod status;
pub mod store;
pub mod submission;
pub mod telemetry;

pub use errors::{DaemonError, Result};
