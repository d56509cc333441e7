//! Router tests driven through `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use pidash_api::auth::hash_password;
use pidash_api::router;
use pidash_core::{
    ConnectivityCheck, LocalDatabase, LocalFileSource, MetricKind, ProviderError, Snapshot,
    SnapshotProvider,
};
use pidash_service::{AppContext, Collaborators, DashboardConfig};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tower::ServiceExt;

// ── Fakes ────────────────────────────────────────────────────────────

struct FakeRemote(AtomicBool);

impl SnapshotProvider for FakeRemote {
    fn name(&self) -> &str {
        "fake"
    }

    fn fetch(&self, metric: MetricKind) -> Result<Snapshot, ProviderError> {
        if self.0.load(Ordering::SeqCst) {
            Ok(Snapshot::new(metric.placeholder_fields(), None))
        } else {
            Err(ProviderError::Unavailable("down".into()))
        }
    }
}

impl ConnectivityCheck for FakeRemote {
    fn is_reachable(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Empty;

impl LocalFileSource for Empty {
    fn read_latest(&self, _metric: MetricKind) -> Result<Option<Snapshot>, ProviderError> {
        Ok(None)
    }

    fn newest_modified(&self) -> Option<SystemTime> {
        None
    }

    fn file_count(&self) -> usize {
        0
    }
}

impl LocalDatabase for Empty {
    fn query_latest(&self, _metric: MetricKind) -> Result<Option<Snapshot>, ProviderError> {
        Ok(None)
    }

    fn is_available(&self) -> bool {
        false
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn app_with(config: DashboardConfig, remote_up: bool) -> Router {
    let remote = Arc::new(FakeRemote(AtomicBool::new(remote_up)));
    let ctx = AppContext::with_collaborators(
        config,
        Collaborators {
            remote: remote.clone(),
            connectivity: remote,
            files: Arc::new(Empty),
            database: Arc::new(Empty),
        },
    );
    router(Arc::new(ctx))
}

fn app(remote_up: bool) -> Router {
    app_with(DashboardConfig::default(), remote_up)
}

fn auth_config(password: &str) -> DashboardConfig {
    let mut config = DashboardConfig::default();
    config.server.auth_enabled = true;
    config.server.username = "admin".into();
    config.server.password_hash = hash_password(password);
    config
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn basic(user: &str, pass: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ── Metrics ──────────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_open() {
    let response = app_with(auth_config("pw"), false)
        .oneshot(get("/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["auth_enabled"], true);
}

#[tokio::test]
async fn metric_endpoint_is_200_when_everything_is_down() {
    let response = app(false).oneshot(get("/api/portfolio")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data_source"], "synthesized");
    assert!(body["warning"].is_string());
    assert_eq!(body["total_balance"], 0.0);
}

#[tokio::test]
async fn live_remote_is_tagged() {
    let response = app(true).oneshot(get("/api/equity-curve")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["data_source"], "remote_snapshot");
    assert!(body["equity_curve"].is_array());
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn generic_metric_route_accepts_both_spellings() {
    let app = app(false);
    for uri in ["/api/metrics/ml-model", "/api/metrics/ml_model"] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["metric"], "ml_model");
    }
}

#[tokio::test]
async fn unknown_metric_is_404_json() {
    let response = app(false).oneshot(get("/api/metrics/bot-status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["status"], 404);
    assert!(body["error"].as_str().unwrap().contains("bot-status"));
}

#[tokio::test]
async fn unknown_route_is_404() {
    let response = app(false).oneshot(get("/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_reports_sources() {
    let response = app(true).oneshot(get("/api/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["remote_reachable"], true);
    assert_eq!(body["fallback_needed"], false);
    assert_eq!(body["database_available"], false);
    assert!(body["providers"]["remote_snapshot"].is_object());
    assert!(body["cache"]["max_size"].is_number());
    assert!(body["uptime_secs"].is_number());
}

#[tokio::test]
async fn cache_clear_by_pattern() {
    let app = app(true);
    app.clone().oneshot(get("/api/portfolio")).await.unwrap();
    app.clone().oneshot(get("/api/ml-model")).await.unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/cache/clear?pattern=live:")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["removed"], 2);
    assert_eq!(body["cache"]["size"], 2, "last-good copies survive");
}

// ── Auth ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_credentials_are_challenged() {
    let response = app_with(auth_config("pw"), false)
        .oneshot(get("/api/portfolio"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    assert_eq!(json_body(response).await["status"], 401);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let request = Request::builder()
        .uri("/api/portfolio")
        .header(header::AUTHORIZATION, basic("admin", "guess"))
        .body(Body::empty())
        .unwrap();
    let response = app_with(auth_config("pw"), false)
        .oneshot(request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn correct_credentials_pass() {
    let request = Request::builder()
        .uri("/api/portfolio")
        .header(header::AUTHORIZATION, basic("admin", "pw"))
        .body(Body::empty())
        .unwrap();
    let response = app_with(auth_config("pw"), false)
        .oneshot(request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_without_configured_hash_rejects_everyone() {
    let mut config = auth_config("pw");
    config.server.password_hash.clear();
    let request = Request::builder()
        .uri("/api/portfolio")
        .header(header::AUTHORIZATION, basic("admin", ""))
        .body(Body::empty())
        .unwrap();
    let response = app_with(config, false).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ── Rate limiting ────────────────────────────────────────────────────

#[tokio::test]
async fn burst_exhaustion_returns_429_per_ip() {
    let mut config = DashboardConfig::default();
    config.server.rate_limit_per_minute = 2;
    config.server.rate_limit_burst = 2;
    let app = app_with(config, false);

    let from = |ip: &str| {
        Request::builder()
            .uri("/health")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    };

    for _ in 0..2 {
        let response = app.clone().oneshot(from("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let limited = app.clone().oneshot(from("10.0.0.1")).await.unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().contains_key(header::RETRY_AFTER));

    let other = app.clone().oneshot(from("10.0.0.2")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}
