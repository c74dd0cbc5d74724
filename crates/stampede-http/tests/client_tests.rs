// HTTP client tests against an in-process axum server

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use stampede_core::{names, HttpConfig, MetricCollector, MetricKey};
use stampede_http::{HttpClient, RequestSpec, RetryPolicy, SeedSource};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn spawn_server() -> String {
    let flaky_calls = Arc::new(AtomicU32::new(0));

    let app = Router::new()
        .route("/ok", get(|| async { "hello" }))
        .route(
            "/echo",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                Json(json!({"auth": auth, "body": body}))
            }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                "late"
            }),
        )
        .route(
            "/flaky",
            get(|State(calls): State<Arc<AtomicU32>>| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::OK
                }
            }),
        )
        .route("/bad-request", get(|| async { StatusCode::BAD_REQUEST }))
        .route(
            "/members/bom",
            get(|| async { "\u{feff}[{\"id\":1,\"name\":\"kim\"},{\"id\":2,\"name\":\"lee\"}]" }),
        )
        .route(
            "/members/nested",
            get(|| async { Json(json!({"resultData": [{"id": 3, "name": "park"}]})) }),
        )
        .route("/members/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route("/members/garbage", get(|| async { "<html>oops</html>" }))
        .route(
            "/members/search",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let name = params.get("memberName").cloned().unwrap_or_default();
                Json(json!([{"id": 9, "name": name}]))
            }),
        )
        .with_state(flaky_calls);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base_url: &str) -> HttpClient {
    HttpClient::new(&HttpConfig {
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .unwrap()
}

#[derive(Debug, Deserialize, PartialEq)]
struct Member {
    id: u32,
    name: String,
}

#[tokio::test]
async fn test_request_records_tagged_samples() {
    let base = spawn_server().await;
    let collector = MetricCollector::new();

    let response = client(&base)
        .send(&collector, RequestSpec::get("/ok").name("Home"))
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body, "hello");
    assert!(response.error.is_none());

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.get(names::HTTP_REQS).unwrap().count(), 1);
    assert_eq!(snapshot.get(names::HTTP_REQ_FAILED).unwrap().rate(), Some(0.0));

    let selector: MetricKey = "http_req_duration{name:Home,method:GET,status:200}".parse().unwrap();
    assert_eq!(snapshot.select(&selector).unwrap().count(), 1);
}

#[tokio::test]
async fn test_json_body_and_bearer_token() {
    let base = spawn_server().await;
    let collector = MetricCollector::new();

    let response = client(&base)
        .send(
            &collector,
            RequestSpec::post("/echo")
                .name("Echo")
                .bearer("token-123")
                .json(json!({"id": "user@loadtest.com"})),
        )
        .await;

    let body = response.json().unwrap();
    assert_eq!(body["auth"], "Bearer token-123");
    assert_eq!(body["body"]["id"], "user@loadtest.com");
}

#[tokio::test]
async fn test_client_error_status_counts_as_failed() {
    let base = spawn_server().await;
    let collector = MetricCollector::new();

    let response = client(&base).send(&collector, RequestSpec::get("/bad-request")).await;

    assert_eq!(response.status, 400);
    assert!(response.is_failure());
    assert!(response.error.is_none());
    assert_eq!(collector.snapshot().get(names::HTTP_REQ_FAILED).unwrap().rate(), Some(1.0));
}

#[tokio::test]
async fn test_timeout_yields_status_zero() {
    let base = spawn_server().await;
    let collector = MetricCollector::new();

    let response = client(&base)
        .send(
            &collector,
            RequestSpec::get("/slow").timeout(Duration::from_millis(200)),
        )
        .await;

    assert_eq!(response.status, 0);
    assert_eq!(response.error.as_deref(), Some("request timed out"));
    assert!(response.duration < Duration::from_secs(2));

    let selector: MetricKey = "http_req_failed{status:0}".parse().unwrap();
    assert_eq!(collector.snapshot().select(&selector).unwrap().rate(), Some(1.0));
}

#[tokio::test]
async fn test_connection_refused_yields_status_zero() {
    // Bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let collector = MetricCollector::new();
    let response = client(&format!("http://{}", addr))
        .send(&collector, RequestSpec::get("/ok"))
        .await;

    assert_eq!(response.status, 0);
    assert!(response.error.is_some());
    assert_eq!(collector.snapshot().get(names::HTTP_REQS).unwrap().count(), 1);
}

#[tokio::test]
async fn test_retry_until_success_records_every_attempt() {
    let base = spawn_server().await;
    let collector = MetricCollector::new();
    let policy = RetryPolicy {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        ..RetryPolicy::exponential(5)
    };

    let response = client(&base)
        .send_with_retry(&collector, RequestSpec::get("/flaky").name("Flaky"), &policy)
        .await;

    assert_eq!(response.status, 200);
    let snapshot = collector.snapshot();
    assert_eq!(snapshot.get(names::HTTP_REQS).unwrap().count(), 3);
    let unavailable: MetricKey = "http_reqs{status:503}".parse().unwrap();
    assert_eq!(snapshot.select(&unavailable).unwrap().count(), 2);
}

#[tokio::test]
async fn test_retry_is_bounded() {
    let base = spawn_server().await;
    let collector = MetricCollector::new();
    let policy = RetryPolicy {
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(5),
        ..RetryPolicy::exponential(2)
    };

    let response = client(&base)
        .send_with_retry(&collector, RequestSpec::get("/flaky"), &policy)
        .await;

    assert_eq!(response.status, 503);
    assert_eq!(collector.snapshot().get(names::HTTP_REQS).unwrap().count(), 2);
}

#[tokio::test]
async fn test_no_retry_on_client_errors() {
    let base = spawn_server().await;
    let collector = MetricCollector::new();

    let response = client(&base)
        .send_with_retry(&collector, RequestSpec::get("/bad-request"), &RetryPolicy::exponential(4))
        .await;

    assert_eq!(response.status, 400);
    assert_eq!(collector.snapshot().get(names::HTTP_REQS).unwrap().count(), 1);
}

#[tokio::test]
async fn test_seed_source_accepts_bom_and_nested_lists() {
    let base = spawn_server().await;
    let collector = MetricCollector::new();
    let seed = SeedSource::new(&client("http://localhost:1"), &base, Duration::from_secs(5)).unwrap();

    let members: Vec<Member> = seed
        .fetch_list(&collector, RequestSpec::get("/members/bom").name("Setup_GetMembers"))
        .await;
    assert_eq!(members.len(), 2);
    assert_eq!(members[0], Member { id: 1, name: "kim".into() });

    let nested: Vec<Member> = seed.fetch_list(&collector, RequestSpec::get("/members/nested")).await;
    assert_eq!(nested, vec![Member { id: 3, name: "park".into() }]);
}

#[tokio::test]
async fn test_seed_source_failures_yield_empty_list() {
    let base = spawn_server().await;
    let collector = MetricCollector::new();
    let seed = SeedSource::new(&client(&base), &base, Duration::from_millis(200)).unwrap();

    let broken: Vec<Member> = seed.fetch_list(&collector, RequestSpec::get("/members/broken")).await;
    assert!(broken.is_empty());

    let garbage: Vec<Member> = seed.fetch_list(&collector, RequestSpec::get("/members/garbage")).await;
    assert!(garbage.is_empty());

    // Seed timeout applies when the request sets none
    let slow: Vec<Member> = seed.fetch_list(&collector, RequestSpec::get("/slow")).await;
    assert!(slow.is_empty());
}

#[tokio::test]
async fn test_seed_query_parameters_are_encoded() {
    let base = spawn_server().await;
    let collector = MetricCollector::new();
    let seed = SeedSource::new(&client(&base), &base, Duration::from_secs(5)).unwrap();

    let found: Vec<Member> = seed
        .fetch_list(
            &collector,
            RequestSpec::get("/members/search").query("memberName", "김 민수&co"),
        )
        .await;

    assert_eq!(found, vec![Member { id: 9, name: "김 민수&co".into() }]);
}
