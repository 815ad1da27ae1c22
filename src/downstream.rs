//! Downstream contract and the reqwest-backed HTTP client.
//!
//! A downstream answers with a status code and a body. Anything outside 2xx becomes a
//! [`DownstreamError`] that still carries the raw response, so the façade can forward it verbatim.

use crate::error::{Classify, FailureKind};
use crate::timeout::{TimedOut, TimeoutPolicy};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use std::time::Duration;

/// One outbound request, relative to the downstream's base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamCall {
    pub method: Method,
    pub path: String,
    pub content_type: Option<String>,
    pub body: Option<Bytes>,
}

impl DownstreamCall {
    pub fn get(path: impl Into<String>) -> Self {
        Self { method: Method::GET, path: path.into(), content_type: None, body: None }
    }

    pub fn post_json(path: impl Into<String>, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            content_type: Some("application/json".to_string()),
            body: Some(body),
        }
    }
}

/// Raw downstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Failure of a single downstream attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownstreamError {
    /// 4xx: the request itself is wrong.
    #[error("downstream rejected the request with status {status}")]
    Client { status: u16, content_type: Option<String>, body: Bytes },
    /// 5xx or any other non-success status.
    #[error("downstream failed with status {status}")]
    Server { status: u16, content_type: Option<String>, body: Bytes },
    #[error("downstream timed out after {elapsed:?} (limit {timeout:?})")]
    Timeout { elapsed: Duration, timeout: Duration },
    #[error("downstream connection failed: {0}")]
    Connection(String),
}

impl DownstreamError {
    /// Sort a non-success response into `Client` or `Server`.
    pub fn from_response(response: DownstreamResponse) -> Self {
        let DownstreamResponse { status, content_type, body } = response;
        if (400..500).contains(&status) {
            DownstreamError::Client { status, content_type, body }
        } else {
            DownstreamError::Server { status, content_type, body }
        }
    }

    /// The downstream's own response, when there was one.
    pub fn response(&self) -> Option<DownstreamResponse> {
        match self {
            DownstreamError::Client { status, content_type, body }
            | DownstreamError::Server { status, content_type, body } => Some(DownstreamResponse {
                status: *status,
                content_type: content_type.clone(),
                body: body.clone(),
            }),
            DownstreamError::Timeout { .. } | DownstreamError::Connection(_) => None,
        }
    }
}

impl Classify for DownstreamError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            DownstreamError::Client { .. } => FailureKind::Client,
            _ => FailureKind::Transient,
        }
    }
}

impl From<TimedOut> for DownstreamError {
    fn from(t: TimedOut) -> Self {
        DownstreamError::Timeout { elapsed: t.elapsed, timeout: t.timeout }
    }
}

/// Something that can carry a call to a downstream service.
#[async_trait]
pub trait Downstream: Send + Sync + std::fmt::Debug {
    /// Target name used for breaker lookup.
    fn name(&self) -> &str;

    /// Perform one physical attempt.
    async fn send(&self, call: &DownstreamCall) -> Result<DownstreamResponse, DownstreamError>;
}

/// HTTP downstream reached through `reqwest`; every attempt is bounded by a [`TimeoutPolicy`].
#[derive(Debug, Clone)]
pub struct HttpDownstream {
    name: String,
    base_url: String,
    client: reqwest::Client,
    timeout: TimeoutPolicy,
}

impl HttpDownstream {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        timeout: TimeoutPolicy,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self::with_client(name, base_url, timeout, client))
    }

    pub fn with_client(
        name: impl Into<String>,
        base_url: impl Into<String>,
        timeout: TimeoutPolicy,
        client: reqwest::Client,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn attempt(&self, call: &DownstreamCall) -> Result<DownstreamResponse, DownstreamError> {
        let url = format!("{}{}", self.base_url, call.path);
        let mut request = self.client.request(call.method.clone(), &url);
        if let Some(content_type) = &call.content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        if let Some(body) = &call.body {
            request = request.body(body.clone());
        }

        let response =
            request.send().await.map_err(|e| DownstreamError::Connection(e.to_string()))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await.map_err(|e| DownstreamError::Connection(e.to_string()))?;

        let response = DownstreamResponse { status, content_type, body };
        if (200..300).contains(&status) {
            Ok(response)
        } else {
            Err(DownstreamError::from_response(response))
        }
    }
}

#[async_trait]
impl Downstream for HttpDownstream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, call: &DownstreamCall) -> Result<DownstreamResponse, DownstreamError> {
        let result = self.timeout.execute(|| self.attempt(call)).await;
        if let Err(error) = &result {
            tracing::debug!(target_name = %self.name, path = %call.path, %error, "downstream attempt failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn downstream(server: &MockServer, timeout: Duration) -> HttpDownstream {
        HttpDownstream::new("user-service", server.uri(), TimeoutPolicy::new(timeout).unwrap())
            .expect("client builds")
    }

    #[tokio::test]
    async fn forwards_success_with_body_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({"email": "a@b.c"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let client = downstream(&server, Duration::from_secs(5));
        let call = DownstreamCall::post_json("/users", Bytes::from_static(br#"{"email":"a@b.c"}"#));
        let response = client.send(&call).await.expect("success");

        assert_eq!(response.status, 201);
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
        assert_eq!(serde_json::from_slice::<serde_json::Value>(&response.body).unwrap()["id"], 1);
    }

    #[tokio::test]
    async fn classifies_client_and_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such user"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = downstream(&server, Duration::from_secs(5));

        let missing = client.send(&DownstreamCall::get("/missing")).await.unwrap_err();
        assert!(missing.is_client_error());
        assert_eq!(missing.response().map(|r| r.body), Some(Bytes::from_static(b"no such user")));

        let broken = client.send(&DownstreamCall::get("/broken")).await.unwrap_err();
        assert!(matches!(broken, DownstreamError::Server { status: 503, .. }));
        assert_eq!(broken.failure_kind(), FailureKind::Transient);
    }

    #[tokio::test]
    async fn slow_downstream_becomes_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = downstream(&server, Duration::from_millis(50));
        let error = client.send(&DownstreamCall::get("/users")).await.unwrap_err();

        assert!(matches!(error, DownstreamError::Timeout { timeout, .. } if timeout == Duration::from_millis(50)));
        assert!(!error.is_client_error());
        assert!(error.response().is_none());
    }

    #[tokio::test]
    async fn unreachable_downstream_is_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            HttpDownstream::new("gone", format!("http://{addr}"), TimeoutPolicy::default()).unwrap();
        let error = client.send(&DownstreamCall::get("/users")).await.unwrap_err();

        assert!(matches!(error, DownstreamError::Connection(_)));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client =
            HttpDownstream::new("svc", "http://localhost:3001/", TimeoutPolicy::default()).unwrap();
        assert_eq!(client.base_url(), "http://localhost:3001");
        assert_eq!(client.name(), "svc");
    }
}
