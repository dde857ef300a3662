//! HTTP 中间件集成测试
//!
//! 使用 tower::ServiceExt::oneshot 直接驱动 Router

use crate::common::{create_guard, Patient};
use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use cacheguard::http::{
    admin, invalidate_on_success, response_cache, InvalidationState, ResponseCacheState,
};
use cacheguard::{CacheGuard, CacheStore, MemoryStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct App {
    guard: Arc<CacheGuard>,
    router: Router,
    search_calls: Arc<AtomicUsize>,
    create_calls: Arc<AtomicUsize>,
}

async fn app() -> App {
    let guard = Arc::new(create_guard(Arc::new(MemoryStore::new())).await);
    let search_calls = Arc::new(AtomicUsize::new(0));
    let create_calls = Arc::new(AtomicUsize::new(0));

    let cache = ResponseCacheState::new(guard.clone()).tags(["patients", "search"]);
    let invalidation = InvalidationState::new(guard.clone(), ["patients"]);

    let search = {
        let calls = search_calls.clone();
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            (
                [("cache-control", "max-age=60"), ("x-request-id", "abc")],
                Json(vec![Patient::new(1, "Ana Garcia")]),
            )
        }
    };

    let create = {
        let calls = create_calls.clone();
        move |Json(patient): Json<Patient>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            if patient.name.is_empty() {
                return StatusCode::BAD_REQUEST.into_response();
            }
            (StatusCode::CREATED, Json(patient)).into_response()
        }
    };

    let reads = Router::new()
        .route("/patients/search", get(search))
        .route(
            "/patients/{id}",
            get(|axum::extract::Path(id): axum::extract::Path<u64>| async move {
                Json(Patient::new(id, "by id"))
            }),
        )
        .route(
            "/patients/missing",
            get(|| async { (StatusCode::NOT_FOUND, "no such patient") }),
        )
        .route(
            "/events",
            get(|| async {
                ([(CONTENT_TYPE, "text/event-stream")], "data: ping\n\n")
            }),
        )
        .route_layer(middleware::from_fn_with_state(cache, response_cache));

    let writes = Router::new()
        .route("/patients", axum::routing::post(create))
        .route_layer(middleware::from_fn_with_state(
            invalidation,
            invalidate_on_success,
        ));

    App {
        router: reads.merge(writes),
        guard,
        search_calls,
        create_calls,
    }
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_patient(name: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/patients")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::to_vec(&Patient::new(9, name)).unwrap(),
        ))
        .unwrap()
}

fn x_cache(response: &Response) -> &str {
    response
        .headers()
        .get("x-cache")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

async fn body_of(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

/// 第一次 MISS，第二次 HIT 且不调用处理函数
#[tokio::test]
async fn test_get_is_cached() {
    let app = app().await;

    let first = app
        .router
        .clone()
        .oneshot(get_request("/patients/search?search=garcia"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(x_cache(&first), "MISS");
    assert!(first.headers().contains_key("x-cache-time"));
    let first_body = body_of(first).await;

    let second = app
        .router
        .clone()
        .oneshot(get_request("/patients/search?search=garcia"))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(x_cache(&second), "HIT");
    assert!(second.headers().contains_key("x-cache-time"));
    assert_eq!(second.headers()["x-cache-age"], "0");
    assert_eq!(second.headers()["content-type"], "application/json");
    assert_eq!(second.headers()["cache-control"], "max-age=60");
    // 不在白名单中的响应头不回放
    assert!(!second.headers().contains_key("x-request-id"));
    assert_eq!(body_of(second).await, first_body);

    assert_eq!(app.search_calls.load(Ordering::SeqCst), 1);
    assert!(app
        .guard
        .store()
        .exists("api:/patients/search::search=garcia")
        .await
        .unwrap());
}

/// 白名单外的查询参数不影响缓存键，白名单内的参数区分缓存
#[tokio::test]
async fn test_query_whitelist_in_key() {
    let app = app().await;

    for uri in [
        "/patients/search?search=garcia&_ts=1",
        "/patients/search?_ts=2&search=garcia",
    ] {
        app.router.clone().oneshot(get_request(uri)).await.unwrap();
    }
    assert_eq!(app.search_calls.load(Ordering::SeqCst), 1);

    app.router
        .clone()
        .oneshot(get_request("/patients/search?search=ruiz"))
        .await
        .unwrap();
    assert_eq!(app.search_calls.load(Ordering::SeqCst), 2);
}

/// 路由参数参与缓存键
#[tokio::test]
async fn test_route_params_in_key() {
    let app = app().await;

    let response = app
        .router
        .clone()
        .oneshot(get_request("/patients/7"))
        .await
        .unwrap();
    assert_eq!(x_cache(&response), "MISS");

    assert!(app
        .guard
        .store()
        .exists("api:/patients/7:id=7:")
        .await
        .unwrap());
}

/// 非 2xx 响应不缓存
#[tokio::test]
async fn test_error_responses_are_not_cached() {
    let app = app().await;

    for _ in 0..2 {
        let response = app
            .router
            .clone()
            .oneshot(get_request("/patients/missing"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(x_cache(&response), "MISS");
        assert_eq!(body_of(response).await, b"no such patient");
    }

    assert!(!app
        .guard
        .store()
        .exists("api:/patients/missing::")
        .await
        .unwrap());
}

/// 事件流原样透传
#[tokio::test]
async fn test_event_stream_bypasses_cache() {
    let app = app().await;

    for _ in 0..2 {
        let response = app
            .router
            .clone()
            .oneshot(get_request("/events"))
            .await
            .unwrap();
        assert_eq!(x_cache(&response), "BYPASS");
        assert_eq!(body_of(response).await, b"data: ping\n\n");
    }
}

/// HEAD 读取 GET 写入的缓存，但不写入
#[tokio::test]
async fn test_head_uses_get_entry() {
    let app = app().await;
    let head = || {
        Request::builder()
            .method(Method::HEAD)
            .uri("/patients/search?search=garcia")
            .body(Body::empty())
            .unwrap()
    };

    let response = app.router.clone().oneshot(head()).await.unwrap();
    assert_eq!(x_cache(&response), "MISS");
    assert!(!app
        .guard
        .store()
        .exists("api:/patients/search::search=garcia")
        .await
        .unwrap());

    app.router
        .clone()
        .oneshot(get_request("/patients/search?search=garcia"))
        .await
        .unwrap();

    let response = app.router.clone().oneshot(head()).await.unwrap();
    assert_eq!(x_cache(&response), "HIT");
    assert!(body_of(response).await.is_empty());

    // HEAD 未命中不计入指标
    let metrics = app.guard.metrics().await;
    assert_eq!(metrics.misses, 1);
    assert_eq!(metrics.hits, 1);
}

/// 同一个请求并发到达时只调用一次处理函数
#[tokio::test]
async fn test_concurrent_requests_coalesce() {
    let app = app().await;

    let requests = (0..10).map(|_| {
        app.router
            .clone()
            .oneshot(get_request("/patients/search?search=garcia&page=1"))
    });
    let responses = futures::future::join_all(requests).await;

    let mut misses = 0;
    for response in responses {
        let response = response.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        if x_cache(&response) == "MISS" {
            misses += 1;
        }
        let patients: Vec<Patient> = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(patients[0].name, "Ana Garcia");
    }

    assert_eq!(misses, 1);
    assert_eq!(app.search_calls.load(Ordering::SeqCst), 1);
}

/// 写请求成功后失效标签，失败时不失效
#[tokio::test]
async fn test_successful_write_invalidates_tags() {
    let app = app().await;
    let uri = "/patients/search?search=garcia";

    app.router.clone().oneshot(get_request(uri)).await.unwrap();

    // 失败的写请求不失效
    let response = app.router.clone().oneshot(post_patient("")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = app.router.clone().oneshot(get_request(uri)).await.unwrap();
    assert_eq!(x_cache(&response), "HIT");

    let response = app
        .router
        .clone()
        .oneshot(post_patient("Nuevo Paciente"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(app.create_calls.load(Ordering::SeqCst), 2);

    let response = app.router.clone().oneshot(get_request(uri)).await.unwrap();
    assert_eq!(x_cache(&response), "MISS");
    assert_eq!(app.search_calls.load(Ordering::SeqCst), 2);
}

async fn admin_call(router: &Router, method: Method, uri: &str, body: Body) -> Response {
    router
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(CONTENT_TYPE, "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_admin_routes() {
    let app = app().await;
    let admin = admin::router(app.guard.clone());

    app.router
        .clone()
        .oneshot(get_request("/patients/search?search=garcia"))
        .await
        .unwrap();

    let response = admin_call(&admin, Method::GET, "/cache/metrics", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let metrics: serde_json::Value = serde_json::from_slice(&body_of(response).await).unwrap();
    assert_eq!(metrics["misses"], 1);
    assert_eq!(metrics["store_available"], true);

    let response = admin_call(&admin, Method::GET, "/cache/health", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body_of(response).await).unwrap();
    assert_eq!(health["connected"], true);

    let response = admin_call(
        &admin,
        Method::POST,
        "/cache/invalidate",
        Body::from(r#"{"tags":[]}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = admin_call(
        &admin,
        Method::POST,
        "/cache/invalidate",
        Body::from(r#"{"tags":["search","unknown"]}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome: admin::InvalidateResponse =
        serde_json::from_slice(&body_of(response).await).unwrap();
    assert_eq!(outcome.removed, 1);
    assert_eq!(outcome.failed, 0);

    let response = admin_call(&admin, Method::POST, "/cache/flush", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.guard.metrics().await.recorded_operations, 0);
}
