mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use breakwater::{
    server, BreakerRegistry, CircuitBreakerConfig, Dispatcher, HttpDownstream, ManualClock,
    RecordingSleeper, RetryConfig, RetryEngine, TimeoutPolicy,
};
use common::EPOCH_MS;
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    app: Router,
    downstream: MockServer,
    clock: ManualClock,
    sleeper: RecordingSleeper,
}

async fn harness(max_retries: u32) -> Harness {
    let downstream = MockServer::start().await;
    let clock = ManualClock::starting_at(EPOCH_MS);
    let sleeper = RecordingSleeper::new();

    let client = HttpDownstream::new(
        "user-service",
        downstream.uri(),
        TimeoutPolicy::new(Duration::from_millis(200)).unwrap(),
    )
    .unwrap();
    let retry_config =
        RetryConfig::new(max_retries, Duration::from_millis(1000), Duration::from_millis(10_000), 2.0, 0.0)
            .unwrap();
    let dispatcher = Dispatcher::builder(BreakerRegistry::new().with_clock(clock.clone()))
        .downstream(client, CircuitBreakerConfig::new(5, Duration::from_millis(60_000), 3).unwrap())
        .retry(RetryEngine::new().with_sleeper(sleeper.clone()), retry_config)
        .build()
        .unwrap();

    Harness { app: server::router(dispatcher), downstream, clock, sleeper }
}

impl Harness {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Option<String>, Vec<u8>) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|value| value.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, body.to_vec())
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let (status, _, body) = self.send(Request::get(uri).body(Body::empty()).unwrap()).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post(&self, uri: &str) -> (StatusCode, Value) {
        let (status, _, body) = self.send(Request::post(uri).body(Body::empty()).unwrap()).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn hits(&self) -> usize {
        self.downstream.received_requests().await.map(|r| r.len()).unwrap_or(0)
    }
}

fn register_request(payload: &Value) -> Request<Body> {
    Request::post("/api/users/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

#[tokio::test]
async fn registration_success_is_forwarded_verbatim() {
    let h = harness(3).await;
    Mock::given(method("POST"))
        .and(path("/users"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({"id": "u-1", "email": "ada@example.com"})),
        )
        .expect(1)
        .mount(&h.downstream)
        .await;

    let (status, content_type, body) =
        h.send(register_request(&json!({"email": "ada@example.com"}))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap()["id"], "u-1");
}

#[tokio::test]
async fn downstream_404_is_not_retried_and_keeps_status_and_body() {
    let h = harness(3).await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_raw(r#"{"error":"no users here"}"#, "application/problem+json"),
        )
        .expect(1)
        .mount(&h.downstream)
        .await;

    let (status, content_type, body) =
        h.send(Request::get("/api/users").body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(content_type.as_deref(), Some("application/problem+json"));
    assert_eq!(body, br#"{"error":"no users here"}"#.to_vec());
    assert!(h.sleeper.delays().is_empty());

    let (_, health) = h.get("/health").await;
    assert_eq!(health["circuitBreakers"]["user-service"]["failureCount"], 0);
}

#[tokio::test]
async fn server_errors_are_retried_then_forwarded() {
    let h = harness(3).await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(4)
        .mount(&h.downstream)
        .await;

    let (status, _, body) = h.send(Request::get("/api/users").body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, b"boom".to_vec());
    assert_eq!(
        h.sleeper.delays(),
        vec![Duration::from_millis(1000), Duration::from_millis(2000), Duration::from_millis(4000)]
    );
}

#[tokio::test]
async fn open_breaker_answers_503_without_contacting_downstream() {
    let h = harness(0).await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&h.downstream)
        .await;

    for _ in 0..5 {
        let (status, _, _) = h.send(Request::get("/api/users").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
    assert_eq!(h.hits().await, 5);

    let (status, body) = h.get("/api/users").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Service unavailable");
    assert_eq!(body["code"], "CIRCUIT_OPEN");
    assert_eq!(body["circuitBreaker"]["state"], "OPEN");
    assert_eq!(body["circuitBreaker"]["failureCount"], 5);
    assert_eq!(body["circuitBreaker"]["nextAttemptTime"], EPOCH_MS + 60_000);
    assert_eq!(h.hits().await, 5, "rejected call must not reach the downstream");
}

#[tokio::test]
async fn breaker_recovers_through_half_open_probes() {
    let h = harness(0).await;
    {
        let _failing = Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(500))
            .mount_as_scoped(&h.downstream)
            .await;
        for _ in 0..5 {
            let _ = h.send(Request::get("/api/users").body(Body::empty()).unwrap()).await;
        }
    }
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&h.downstream)
        .await;

    h.clock.advance(Duration::from_millis(60_000));
    let (status, _) = h.get("/api/users").await;
    assert_eq!(status, StatusCode::OK);
    let (_, breakers) = h.get("/api/circuit-breaker/status").await;
    assert_eq!(breakers["circuitBreakers"]["user-service"]["state"], "HALF_OPEN");

    h.get("/api/users").await;
    h.get("/api/users").await;
    let (_, breakers) = h.get("/api/circuit-breaker/status").await;
    assert_eq!(
        breakers["circuitBreakers"]["user-service"],
        json!({"state": "CLOSED", "failureCount": 0, "successCount": 0, "nextAttemptTime": null})
    );
}

#[tokio::test]
async fn hung_downstream_becomes_internal_error() {
    let h = harness(1).await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&h.downstream)
        .await;

    let (status, body) = h.get("/api/users").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal error");
    assert!(body["message"].as_str().unwrap().contains("timed out"));
    assert_eq!(h.sleeper.delays().len(), 1, "timeouts are retried");
}

#[tokio::test]
async fn health_and_reset_endpoints() {
    let h = harness(0).await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&h.downstream)
        .await;
    for _ in 0..5 {
        let _ = h.send(Request::get("/api/users").body(Body::empty()).unwrap()).await;
    }

    let (status, health) = h.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["circuitBreakers"]["user-service"]["state"], "OPEN");

    let (status, reset) = h.post("/api/circuit-breaker/user-service/reset").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reset["target"], "user-service");
    assert_eq!(reset["circuitBreaker"]["state"], "CLOSED");

    let (status, missing) = h.post("/api/circuit-breaker/billing/reset").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(missing["message"], "circuit breaker 'billing' not found");

    let (status, all) = h.post("/api/circuit-breaker/reset").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["circuitBreakers"]["user-service"]["failureCount"], 0);
}
