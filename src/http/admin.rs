//! 运维路由
//!
//! - `GET /cache/metrics` 聚合指标
//! - `GET /cache/health` 健康检查，存储不可达时返回 503
//! - `POST /cache/flush` 清空全部缓存并重置指标
//! - `POST /cache/invalidate` 按标签失效，请求体 `{"tags": [...]}`
//! - `GET /cache/metrics/prometheus` Prometheus 文本格式（monitoring 特性）

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::guard::CacheGuard;

/// 失效请求体
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    #[serde(default)]
    pub tags: Vec<String>,
}

/// 失效响应体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvalidateResponse {
    pub tags: Vec<String>,
    pub removed: u64,
    pub failed: u64,
}

/// 构建运维路由
pub fn router(guard: Arc<CacheGuard>) -> Router {
    let router = Router::new()
        .route("/cache/metrics", get(metrics))
        .route("/cache/health", get(health))
        .route("/cache/flush", post(flush))
        .route("/cache/invalidate", post(invalidate));

    #[cfg(feature = "monitoring")]
    let router = router.route("/cache/metrics/prometheus", get(prometheus));

    router.with_state(guard)
}

async fn metrics(State(guard): State<Arc<CacheGuard>>) -> Response {
    Json(guard.metrics().await).into_response()
}

async fn health(State(guard): State<Arc<CacheGuard>>) -> Response {
    let report = guard.health_check().await;
    let status = if report.connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

async fn flush(State(guard): State<Arc<CacheGuard>>) -> Response {
    match guard.flush_all().await {
        Ok(()) => {
            info!("通过运维接口清空缓存");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            error!("清空缓存失败: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn invalidate(
    State(guard): State<Arc<CacheGuard>>,
    Json(request): Json<InvalidateRequest>,
) -> Response {
    if request.tags.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "tags 不能为空" })),
        )
            .into_response();
    }

    let outcome = guard.invalidate_tags(&request.tags).await;
    info!(
        "通过运维接口失效标签: tags={:?}, removed={}, failed={}",
        request.tags, outcome.removed, outcome.failed
    );

    Json(InvalidateResponse {
        tags: request.tags,
        removed: outcome.removed,
        failed: outcome.failed,
    })
    .into_response()
}

#[cfg(feature = "monitoring")]
async fn prometheus(State(guard): State<Arc<CacheGuard>>) -> Response {
    match guard.recorder().exporter() {
        Some(exporter) => (
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            exporter.gather(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
