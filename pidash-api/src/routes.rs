//! Route handlers.
//!
//! Resolver calls do blocking I/O (TCP probe, HTTP, file and SQLite reads),
//! so they run on the blocking pool via `spawn_blocking`.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use pidash_core::{CacheStats, MetricKind, MetricPayload};
use pidash_service::{AppContext, FallbackStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

use crate::error::ApiError;

type Ctx = State<Arc<AppContext>>;

pub async fn health(State(ctx): Ctx) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
        "auth_enabled": ctx.config.server.auth_enabled,
    }))
}

async fn resolve(ctx: Arc<AppContext>, metric: MetricKind) -> Json<MetricPayload> {
    let payload = match tokio::task::spawn_blocking(move || ctx.resolver.resolve(metric)).await {
        Ok(payload) => payload,
        Err(e) => {
            error!(%metric, error = %e, "resolver task failed");
            MetricPayload::synthesized(
                metric,
                "Internal error while loading data; showing placeholder values",
            )
        }
    };
    Json(payload)
}

pub async fn trading_performance(State(ctx): Ctx) -> Json<MetricPayload> {
    resolve(ctx, MetricKind::TradingPerformance).await
}

pub async fn portfolio(State(ctx): Ctx) -> Json<MetricPayload> {
    resolve(ctx, MetricKind::Portfolio).await
}

pub async fn equity_curve(State(ctx): Ctx) -> Json<MetricPayload> {
    resolve(ctx, MetricKind::EquityCurve).await
}

pub async fn ml_model(State(ctx): Ctx) -> Json<MetricPayload> {
    resolve(ctx, MetricKind::MlModel).await
}

/// `/api/metrics/{metric}`, accepting kebab or snake case names.
pub async fn metric(
    State(ctx): Ctx,
    Path(name): Path<String>,
) -> Result<Json<MetricPayload>, ApiError> {
    let metric: MetricKind = name.parse().map_err(ApiError::NotFound)?;
    Ok(resolve(ctx, metric).await)
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub fallback: FallbackStatus,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
}

pub async fn status(State(ctx): Ctx) -> Result<Json<StatusResponse>, ApiError> {
    let worker = Arc::clone(&ctx);
    let fallback = tokio::task::spawn_blocking(move || worker.resolver.status())
        .await
        .map_err(|e| ApiError::Internal(format!("status task failed: {e}")))?;
    Ok(Json(StatusResponse {
        fallback,
        started_at: ctx.started_at,
        uptime_secs: ctx.uptime().num_seconds(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ClearParams {
    pub pattern: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed: usize,
    pub expired_removed: usize,
    pub cache: CacheStats,
}

/// Drop cache entries containing `pattern`, or everything without one.
pub async fn clear_cache(
    State(ctx): Ctx,
    Query(params): Query<ClearParams>,
) -> Json<ClearResponse> {
    let removed = match params.pattern.as_deref().filter(|p| !p.is_empty()) {
        Some(pattern) => ctx.cache.delete_matching(pattern),
        None => {
            let size = ctx.cache.len();
            ctx.cache.clear();
            size
        }
    };
    let expired_removed = ctx.cache.cleanup_expired();
    info!(pattern = ?params.pattern, removed, expired_removed, "cache cleared");

    Json(ClearResponse {
        removed,
        expired_removed,
        cache: ctx.cache.stats(),
    })
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound("no such endpoint".into())
}
