//! 写操作后的标签失效中间件
//!
//! 处理函数返回 2xx 后按配置的标签失效，失效完成后才返回响应，
//! 客户端随后的读请求不会读到旧数据。失败只记录日志，不影响响应。

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::guard::CacheGuard;

/// 路由级失效设置
#[derive(Clone)]
pub struct InvalidationState {
    guard: Arc<CacheGuard>,
    tags: Arc<Vec<String>>,
}

impl InvalidationState {
    pub fn new<I, S>(guard: Arc<CacheGuard>, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            guard,
            tags: Arc::new(tags.into_iter().map(Into::into).collect()),
        }
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

fn is_mutation(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// 成功的写请求之后失效标签
pub async fn invalidate_on_success(
    State(state): State<InvalidationState>,
    request: Request,
    next: Next,
) -> Response {
    let mutation = is_mutation(request.method());
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    if !mutation || !response.status().is_success() || state.tags.is_empty() {
        return response;
    }

    let outcome = state.guard.invalidate_tags(state.tags.as_slice()).await;
    if outcome.is_complete() {
        info!(
            "写操作后失效缓存: path={}, tags={:?}, removed={}",
            path, state.tags, outcome.removed
        );
    } else {
        warn!(
            "写操作后失效缓存不完整: path={}, tags={:?}, removed={}, failed={}",
            path, state.tags, outcome.removed, outcome.failed
        );
    }

    response
}
