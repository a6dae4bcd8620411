use crate::api::{ErrorResponse, SubmitPrintRequest, SubmitPrintResponse};
use crate::config::EndpointConfig;
use crate::errors::{DaemonError, Result};
use crate::job::{JobId, JobRecord, PrintJob};
use crate::source::JobSource;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};

/// HTTP session with one print server endpoint.
///
/// Every request carries the endpoint's Basic credentials and is bounded by
/// the configured timeout.
pub struct EndpointClient {
    client: Client,
    name: String,
    base_url: String,
    username: String,
    password: String,
}

impl EndpointClient {
    pub fn new(endpoint: &EndpointConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("printd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DaemonError::Config(format!("cannot build HTTP client: {}", e)))?;

        let base_url = endpoint.url.trim_end_matches('/').to_string();

        info!("Initialized endpoint '{}' at {}", endpoint.name, base_url);

        Ok(Self {
            client,
            name: endpoint.name.clone(),
            base_url,
            username: endpoint.username.clone(),
            password: endpoint.password.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(StatusCode, Vec<u8>)> {
        let url = format!("{}/{}", self.base_url, path);

        let mut request = self
            .client
            .request(method.clone(), &url)
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            DaemonError::Network(format!("{} {} failed: {}", method, url, e))
        })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DaemonError::Network(format!("reading response of {} failed: {}", url, e)))?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(DaemonError::Auth(format!(
                "Authentication failed (error 401) while contacting {}. Check the credentials of endpoint '{}'.",
                url, self.name
            )));
        }
        if status == StatusCode::FORBIDDEN {
            return Err(DaemonError::Forbidden(format!(
                "endpoint '{}' refused {} for user '{}'",
                self.name, url, self.username
            )));
        }

        Ok((status, bytes.to_vec()))
    }

    fn status_error(&self, method: &str, path: &str, status: StatusCode, body: &[u8]) -> DaemonError {
        DaemonError::Network(format!(
            "{} {}/{}: http status code: {}, response: {}",
            method,
            self.base_url,
            path,
            status.as_u16(),
            String::from_utf8_lossy(body)
        ))
    }

    /// Claim the next print job on this endpoint.
    pub async fn next_print(&self) -> Result<Option<PrintJob>> {
        let path = "printing/next-printing";
        let (status, body) = self.request(Method::POST, path, None).await?;
        if !status.is_success() {
            return Err(self.status_error("POST", path, status, &body));
        }

        let record = match decode_next_printing(&body)? {
            Some(record) => record,
            None => return Ok(None),
        };
        if record.sourcecode.is_none() {
            return Err(DaemonError::MalformedResponse(format!(
                "print job {} from endpoint '{}' has no payload",
                record.id, self.name
            )));
        }

        let job = PrintJob::try_from(record)?;
        debug!("Endpoint '{}' handed out print job {}", self.name, job.id);
        Ok(Some(job))
    }

    /// Mark a job done on this endpoint.
    pub async fn set_done(&self, id: JobId) -> Result<JobRecord> {
        let path = format!("printing/set-done/{}", id);
        let (status, body) = self.request(Method::POST, &path, None).await?;

        if status == StatusCode::NOT_FOUND {
            return Err(DaemonError::JobNotFound(id));
        }
        if !status.is_success() {
            return Err(self.status_error("POST", &path, status, &body));
        }

        serde_json::from_slice(&body).map_err(|e| {
            DaemonError::MalformedResponse(format!(
                "set-done response for job {} from endpoint '{}': {}",
                id, self.name, e
            ))
        })
    }

    /// Submit a new print to this endpoint's server.
    pub async fn submit(&self, request: &SubmitPrintRequest) -> Result<SubmitPrintResponse> {
        let body = serde_json::to_value(request)?;
        let (status, body) = self.request(Method::POST, "prints", Some(body)).await?;

        if status == StatusCode::BAD_REQUEST || status == StatusCode::PAYLOAD_TOO_LARGE {
            let message = serde_json::from_slice::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            return Err(DaemonError::Submission(message));
        }
        if !status.is_success() {
            return Err(self.status_error("POST", "prints", status, &body));
        }

        serde_json::from_slice(&body)
            .map_err(|e| DaemonError::MalformedResponse(format!("submit response: {}", e)))
    }
}

/// Decode a next-printing body. `null`, `""` and an empty body mean no work.
fn decode_next_printing(body: &[u8]) -> Result<Option<JobRecord>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| DaemonError::MalformedResponse(format!("next-printing body is not JSON: {}", e)))?;

    match &value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) if s.is_empty() => Ok(None),
        _ => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| DaemonError::MalformedResponse(format!("next-printing record: {}", e))),
    }
}

#[async_trait]
impl JobSource for EndpointClient {
    async fn next_job(&self) -> Result<Option<PrintJob>> {
        self.next_print().await
    }

    async fn acknowledge(&self, id: JobId) -> Result<()> {
        let record = self.set_done(id).await?;
        if !record.done {
            warn!(
                "Endpoint '{}' acknowledged job {} but does not report it done",
                self.name, id
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{basic_auth, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoint(url: &str) -> EndpointConfig {
        EndpointConfig {
            name: "main".to_string(),
            url: url.to_string(),
            username: "printer".to_string(),
            password: "s3cret".to_string(),
            auto_done: None,
        }
    }

    async fn client_for(server: &MockServer) -> EndpointClient {
        EndpointClient::new(&endpoint(&format!("{}/api/", server.uri())), Duration::from_secs(2))
            .unwrap()
    }

    fn record() -> serde_json::Value {
        json!({
            "id": 7,
            "time": "1700000000.500",
            "lang": "py3",
            "team": "t2: Lambdas",
            "filename": "a.py",
            "room": "R1",
            "processed": true,
            "done": false,
            "sourcecode": "cHJpbnQoMSkK"
        })
    }

    #[test]
    fn test_trailing_slash_removed() {
        let client =
            EndpointClient::new(&endpoint("http://judge/api/"), Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "http://judge/api");
        assert_eq!(client.name(), "main");
    }

    #[test]
    fn test_no_work_bodies() {
        assert!(decode_next_printing(b"").unwrap().is_none());
        assert!(decode_next_printing(b"  \n").unwrap().is_none());
        assert!(decode_next_printing(b"null").unwrap().is_none());
        assert!(decode_next_printing(b"\"\"").unwrap().is_none());
    }

    #[test]
    fn test_garbage_body_is_malformed() {
        let err = decode_next_printing(b"<html>oops</html>").unwrap_err();
        assert!(err.is_fatal());
        let err = decode_next_printing(b"{\"id\": \"x\"}").unwrap_err();
        assert!(matches!(err, DaemonError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_next_print_decodes_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/printing/next-printing"))
            .and(basic_auth("printer", "s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(record()))
            .mount(&server)
            .await;

        let job = client_for(&server).await.next_print().await.unwrap().unwrap();
        assert_eq!(job.id, 7);
        assert_eq!(job.requester, "t2: Lambdas");
        assert_eq!(job.room.as_deref(), Some("R1"));
        assert_eq!(job.payload.as_deref(), Some(&b"print(1)\n"[..]));
    }

    #[tokio::test]
    async fn test_next_print_empty_string_is_no_work() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/printing/next-printing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("")))
            .mount(&server)
            .await;

        assert!(client_for(&server).await.next_print().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client_for(&server).await.next_print().await.unwrap_err();
        assert!(matches!(err, DaemonError::Auth(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client_for(&server).await.next_print().await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_set_done_unknown_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/printing/set-done/99"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server).await.acknowledge(99).await.unwrap_err();
        assert!(matches!(err, DaemonError::JobNotFound(99)));
    }

    #[tokio::test]
    async fn test_set_done_returns_record() {
        let server = MockServer::start().await;
        let mut done = record();
        done["done"] = json!(true);
        done.as_object_mut().unwrap().remove("sourcecode");
        Mock::given(method("POST"))
            .and(path("/api/printing/set-done/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(done))
            .expect(1)
            .mount(&server)
            .await;

        let record = client_for(&server).await.set_done(7).await.unwrap();
        assert!(record.done);
        assert!(record.sourcecode.is_none());
    }

    #[tokio::test]
    async fn test_submit_rejection_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/prints"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"error": "Illegal filename '.x'.", "details": null})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .submit(&SubmitPrintRequest {
                filename: ".x".to_string(),
                language: None,
                content: "eA==".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Illegal filename '.x'.");
    }
}
