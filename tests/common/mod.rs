// Common test utilities and fixtures

use async_trait::async_trait;
use printd::api::{create_router, ApiState};
use printd::auth::{hash_password, UserDirectory};
use printd::config::{ApiUser, EndpointConfig, TeamConfig};
use printd::printer::{PrintBackend, RenderRequest};
use printd::store::JobStore;
use printd::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub const OPERATOR: (&str, &str) = ("printer", "printer-pw");
pub const TEAM: (&str, &str) = ("team1", "team-pw");

/// Operator account plus one team account in room L2
pub fn test_users() -> Vec<ApiUser> {
    vec![
        ApiUser {
            username: OPERATOR.0.to_string(),
            password_sha256: hash_password(OPERATOR.1),
            admin: false,
            operator: true,
            team: None,
        },
        ApiUser {
            username: TEAM.0.to_string(),
            password_sha256: hash_password(TEAM.1),
            admin: false,
            operator: false,
            team: Some(TeamConfig {
                id: 1,
                name: "Rustaceans".to_string(),
                room: Some("L2".to_string()),
            }),
        },
    ]
}

/// Print server running in-process on an ephemeral port
#[allow(dead_code)]
pub struct TestServer {
    /// Base URL of the printing API (`http://127.0.0.1:<port>/api`)
    pub api_url: String,
    pub store: Arc<dyn JobStore>,
    cancel: CancellationToken,
}

impl TestServer {
    pub async fn start(store: Arc<dyn JobStore>) -> Self {
        let state = ApiState {
            store: store.clone(),
            users: Arc::new(UserDirectory::new(&test_users())),
            size_limit_kb: 64,
            start_time: Instant::now(),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener address");
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();

        tokio::spawn(async move {
            axum::serve(listener, create_router(state))
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .expect("test server");
        });

        Self {
            api_url: format!("http://{}/api", addr),
            store,
            cancel,
        }
    }

    pub fn endpoint(&self, name: &str, credentials: (&str, &str)) -> EndpointConfig {
        EndpointConfig {
            name: name.to_string(),
            url: self.api_url.clone(),
            username: credentials.0.to_string(),
            password: credentials.1.to_string(),
            auto_done: None,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One render call as seen by the backend
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct RenderedJob {
    pub filename: String,
    pub header: String,
    pub highlight: Option<&'static str>,
    pub contents: Vec<u8>,
}

/// Print backend that keeps what it was asked to render
#[derive(Default)]
pub struct RecordingBackend {
    pub rendered: Mutex<Vec<RenderedJob>>,
}

#[allow(dead_code)]
impl RecordingBackend {
    pub async fn count(&self) -> usize {
        self.rendered.lock().await.len()
    }

    pub async fn filenames(&self) -> Vec<String> {
        self.rendered
            .lock()
            .await
            .iter()
            .map(|job| job.filename.clone())
            .collect()
    }
}

#[async_trait]
impl PrintBackend for RecordingBackend {
    async fn render(&self, request: &RenderRequest) -> Result<()> {
        // The spool file is gone once dispatch returns
        let contents = tokio::fs::read(&request.path).await?;
        self.rendered.lock().await.push(RenderedJob {
            filename: request.filename.clone(),
            header: request.header.clone(),
            highlight: request.highlight,
            contents,
        });
        Ok(())
    }

    async fn queue_is_empty(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Poll `condition` until it holds, failing the test after `timeout`.
pub async fn wait_for<F, Fut>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(timeout, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
