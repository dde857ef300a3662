//! HTTP 响应缓存中间件
//!
//! 对 GET 请求按 [`derive_cache_key`] 推导的键走 `get_or_set`，
//! 下游处理函数就是取数函数：
//!
//! - 命中：回放状态码、白名单响应头和响应体，附加 `X-Cache: HIT`、
//!   `X-Cache-Time`（毫秒）、`X-Cache-Age`（秒），不调用处理函数
//! - 未命中：调用处理函数，只缓存 2xx 响应，附加 `X-Cache: MISS`
//! - 流式响应（`text/event-stream`、大小未知或超过上限）不缓存，原样返回并附加 `X-Cache: BYPASS`
//!
//! HEAD 请求只查缓存，命中时回放响应头，未命中时直接交给处理函数。
//! 其他方法直接放行。
//!
//! ```rust,ignore
//! let cache = ResponseCacheState::new(guard.clone()).tags(["patients", "search"]);
//! let app = Router::new().route(
//!     "/patients/search",
//!     get(search_patients).layer(middleware::from_fn_with_state(cache, response_cache)),
//! );
//! ```

use axum::{
    body::{Body, Bytes, HttpBody as _},
    extract::{FromRequestParts, RawPathParams, Request, State},
    http::{header::CONTENT_TYPE, request::Parts, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use super::key::derive_cache_key;
use crate::constants::{HEADER_X_CACHE, HEADER_X_CACHE_AGE, HEADER_X_CACHE_TIME};
use crate::guard::CacheGuard;
use crate::orchestrator::CacheOptions;

/// 缓存中的响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    /// 白名单内的响应头
    pub headers: Vec<(String, String)>,
    #[serde(with = "base64_body")]
    pub body: Bytes,
    /// 捕获时间（Unix 毫秒）
    pub cached_at: i64,
}

mod base64_body {
    use axum::body::Bytes;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// 不缓存的原因
///
/// 作为取数函数的错误类型在单飞中共享；等待者收到它时自己调用处理函数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bypass {
    /// 非 2xx 响应
    Status(u16),
    /// 流式或过大的响应体
    Streaming,
    /// 读取响应体失败
    BodyError,
    /// 处理函数已被取走
    HandlerUnavailable,
}

impl Bypass {
    fn label(&self) -> &'static str {
        match self {
            Bypass::Status(_) => "MISS",
            _ => "BYPASS",
        }
    }
}

/// 路由级缓存设置
#[derive(Clone)]
pub struct ResponseCacheState {
    guard: Arc<CacheGuard>,
    ttl: Option<Duration>,
    tags: Option<Vec<String>>,
    query_whitelist: Option<Vec<String>>,
}

impl ResponseCacheState {
    pub fn new(guard: Arc<CacheGuard>) -> Self {
        Self {
            guard,
            ttl: None,
            tags: None,
            query_whitelist: None,
        }
    }

    /// 覆盖TTL
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// 覆盖标签
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// 覆盖查询参数白名单
    pub fn query_whitelist<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query_whitelist = Some(names.into_iter().map(Into::into).collect());
        self
    }

    fn options(&self) -> CacheOptions {
        CacheOptions {
            ttl: self.ttl,
            tags: self.tags.clone(),
        }
    }

    async fn cache_key(&self, parts: &mut Parts) -> String {
        // 中间件挂在整个 Router 上时路由参数尚未匹配，此时为空
        let route_params: Vec<(String, String)> =
            match RawPathParams::from_request_parts(parts, &()).await {
                Ok(params) => params
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect(),
                Err(_) => Vec::new(),
            };

        let http = self.guard.http_config();
        let whitelist = self
            .query_whitelist
            .as_deref()
            .unwrap_or(http.query_whitelist.as_slice());

        derive_cache_key(
            &http.key_prefix,
            parts.uri.path(),
            route_params,
            parts.uri.query(),
            whitelist,
        )
    }
}

/// 响应缓存中间件
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache(
    State(state): State<ResponseCacheState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();

    if method != Method::GET && method != Method::HEAD {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    let key = state.cache_key(&mut parts).await;
    let request = Request::from_parts(parts, body);

    if method == Method::HEAD {
        return serve_head(&state, &key, request, next, start).await;
    }

    let http = state.guard.http_config();
    let header_whitelist = http.header_whitelist.clone();
    let max_body_bytes = http.max_body_bytes;

    // 处理函数只能调用一次：放进槽里，由真正取数的一方取走
    let slot = Arc::new(Mutex::new(Some((request, next))));
    let leader_response: Arc<Mutex<Option<Response>>> = Arc::new(Mutex::new(None));

    let fetch_slot = slot.clone();
    let captured = leader_response.clone();
    let result: Result<CachedResponse, Bypass> = state
        .guard
        .get_or_set(
            &key,
            move || async move {
                let taken = fetch_slot.lock().take();
                let Some((request, next)) = taken else {
                    return Err(Bypass::HandlerUnavailable);
                };

                let response = next.run(request).await;
                let (outcome, response) = capture(response, &header_whitelist, max_body_bytes).await;
                *captured.lock() = Some(response);
                outcome
            },
            state.options(),
        )
        .await;

    let own_response = leader_response.lock().take();
    match (result, own_response) {
        (Ok(_), Some(response)) => {
            debug!(cache = "http", outcome = "miss", key = %key, "handler response cached");
            mark(response, "MISS", start)
        }
        (Ok(cached), None) => {
            debug!(cache = "http", outcome = "hit", key = %key, "serving cached response");
            replay(cached, &state.guard.http_config().header_whitelist, start)
        }
        (Err(bypass), Some(response)) => {
            debug!(cache = "http", outcome = "bypass", key = %key, reason = ?bypass, "response not cached");
            mark(response, bypass.label(), start)
        }
        (Err(bypass), None) => {
            // 共享的加载未产生可缓存的响应，由本请求自己调用处理函数
            let taken = slot.lock().take();
            match taken {
                Some((request, next)) => {
                    debug!(cache = "http", outcome = "bypass", key = %key, reason = ?bypass, "running handler after shared load");
                    let response = next.run(request).await;
                    mark(response, bypass.label(), start)
                }
                None => {
                    warn!(key = %key, "handler unavailable for cached route");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
    }
}

async fn serve_head(
    state: &ResponseCacheState,
    key: &str,
    request: Request,
    next: Next,
    start: Instant,
) -> Response {
    match state
        .guard
        .orchestrator()
        .peek::<CachedResponse>(key)
        .await
    {
        Some(cached) => {
            let mut response = replay(cached, &state.guard.http_config().header_whitelist, start);
            *response.body_mut() = Body::empty();
            response
        }
        None => mark(next.run(request).await, "MISS", start),
    }
}

/// 判断并捕获响应
///
/// 返回捕获结果和应交还给客户端的响应（响应体已读取时重新装回）。
pub(crate) async fn capture(
    response: Response,
    header_whitelist: &[String],
    max_body_bytes: usize,
) -> (Result<CachedResponse, Bypass>, Response) {
    let status = response.status();
    if !status.is_success() {
        return (Err(Bypass::Status(status.as_u16())), response);
    }

    if is_streaming(&response, max_body_bytes) {
        return (Err(Bypass::Streaming), response);
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("读取响应体失败: {}", e);
            return (
                Err(Bypass::BodyError),
                StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            );
        }
    };

    let headers = parts
        .headers
        .iter()
        .filter(|(name, _)| is_whitelisted(name.as_str(), header_whitelist))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();

    let cached = CachedResponse {
        status: status.as_u16(),
        headers,
        body: bytes.clone(),
        cached_at: Utc::now().timestamp_millis(),
    };

    (Ok(cached), Response::from_parts(parts, Body::from(bytes)))
}

fn is_streaming(response: &Response, max_body_bytes: usize) -> bool {
    let event_stream = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"));
    if event_stream {
        return true;
    }

    match response.body().size_hint().upper() {
        Some(upper) => upper > max_body_bytes as u64,
        None => true,
    }
}

fn is_whitelisted(name: &str, whitelist: &[String]) -> bool {
    whitelist
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(name))
}

/// 回放缓存的响应
fn replay(cached: CachedResponse, header_whitelist: &[String], start: Instant) -> Response {
    let age_secs = (Utc::now().timestamp_millis() - cached.cached_at).max(0) / 1000;

    let mut builder = Response::builder().status(cached.status);
    for (name, value) in &cached.headers {
        if !is_whitelisted(name, header_whitelist) {
            continue;
        }
        if let Ok(value) = HeaderValue::from_str(value) {
            builder = builder.header(name.as_str(), value);
        }
    }

    let response = builder
        .body(Body::from(cached.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());

    let mut response = mark(response, "HIT", start);
    response.headers_mut().insert(
        HeaderName::from_static(HEADER_X_CACHE_AGE),
        HeaderValue::from(age_secs),
    );
    response
}

/// 附加诊断头
fn mark(mut response: Response, label: &'static str, start: Instant) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static(HEADER_X_CACHE),
        HeaderValue::from_static(label),
    );

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    if let Ok(value) = HeaderValue::from_str(&format!("{:.2}", elapsed_ms)) {
        headers.insert(HeaderName::from_static(HEADER_X_CACHE_TIME), value);
    }
    response
}
