//! PiDash API: the REST surface over `pidash-service`.
//!
//! - Metric endpoints always answer 200 with a provenance-tagged payload
//! - `/api/*` sits behind optional HTTP Basic auth
//! - Every route is rate limited per client IP
//! - A background task sweeps expired cache entries and idle rate limiters

pub mod auth;
pub mod error;
pub mod rate_limit;
pub mod routes;

use anyhow::Context as _;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use pidash_core::{MetricPayload, TieredCache};
use pidash_service::AppContext;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::auth::AuthState;
use crate::rate_limit::RateLimitState;

pub use error::ApiError;

/// Build the application router around a shared context.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let limits = rate_limits(&ctx);
    router_with_limits(ctx, limits)
}

fn rate_limits(ctx: &AppContext) -> RateLimitState {
    let server = &ctx.config.server;
    RateLimitState::new(server.rate_limit_per_minute, server.rate_limit_burst)
}

fn router_with_limits(ctx: Arc<AppContext>, limits: RateLimitState) -> Router {
    let auth = Arc::new(AuthState::from_config(&ctx.config.server));

    let api = Router::new()
        .route("/api/trading-performance", get(routes::trading_performance))
        .route("/api/portfolio", get(routes::portfolio))
        .route("/api/equity-curve", get(routes::equity_curve))
        .route("/api/ml-model", get(routes::ml_model))
        .route("/api/metrics/:metric", get(routes::metric))
        .route("/api/status", get(routes::status))
        .route("/api/cache/clear", post(routes::clear_cache))
        .route_layer(middleware::from_fn_with_state(auth, auth::basic_auth));

    Router::new()
        .route("/health", get(routes::health))
        .merge(api)
        .fallback(routes::not_found)
        .layer(middleware::from_fn_with_state(limits, rate_limit::limit_by_ip))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Serve until Ctrl-C.
pub async fn serve(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let server = ctx.config.server.clone();
    let listener = tokio::net::TcpListener::bind((server.host.as_str(), server.port))
        .await
        .with_context(|| format!("binding {}:{}", server.host, server.port))?;
    info!(
        addr = %listener.local_addr()?,
        auth = server.auth_enabled,
        "dashboard listening"
    );

    let limits = rate_limits(&ctx);
    let sweeper = spawn_sweeper(
        Arc::clone(&ctx.cache),
        limits.clone(),
        Duration::from_secs(server.cleanup_interval_secs),
    );

    let app =
        router_with_limits(ctx, limits).into_make_service_with_connect_info::<SocketAddr>();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error");

    sweeper.abort();
    info!("dashboard stopped");
    result
}

fn spawn_sweeper(
    cache: Arc<TieredCache<MetricPayload>>,
    limits: RateLimitState,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = cache.cleanup_expired();
            let idle_clients = limits.prune_idle();
            debug!(
                removed,
                size = cache.len(),
                idle_clients,
                clients = limits.tracked_clients(),
                "periodic sweep"
            );
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
