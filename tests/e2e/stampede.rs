//! 缓存击穿场景
//!
//! 热点键过期后大量并发请求同时到达，数据库只被查询一次。

use crate::common::{create_guard, Patient};
use cacheguard::{CacheOptions, MemoryStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hot_key_expiry_stampede() {
    let guard = Arc::new(create_guard(Arc::new(MemoryStore::new())).await);
    let db_queries = Arc::new(AtomicUsize::new(0));
    let key = "appointments:today:2026-10-19";

    let load = |guard: Arc<cacheguard::CacheGuard>, db_queries: Arc<AtomicUsize>| async move {
        guard
            .get_or_set(
                key,
                || async move {
                    db_queries.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, String>(vec![Patient::new(1, "Ana"), Patient::new(2, "Luis")])
                },
                CacheOptions::new().ttl(Duration::from_millis(300)),
            )
            .await
    };

    // 第一波：冷启动
    let handles: Vec<_> = (0..100)
        .map(|_| tokio::spawn(load(guard.clone(), db_queries.clone())))
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().len(), 2);
    }
    assert_eq!(db_queries.load(Ordering::SeqCst), 1);

    // 等待过期后第二波
    tokio::time::sleep(Duration::from_millis(400)).await;
    let handles: Vec<_> = (0..100)
        .map(|_| tokio::spawn(load(guard.clone(), db_queries.clone())))
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().len(), 2);
    }
    assert_eq!(db_queries.load(Ordering::SeqCst), 2);
    assert_eq!(guard.orchestrator().in_flight(), 0);

    let metrics = guard.metrics().await;
    assert_eq!(metrics.total_requests, 200);
    assert_eq!(metrics.misses, 2);
}

/// 取数失败时所有等待者收到同一个错误，随后的请求重新取数
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_load_is_shared_then_retried() {
    let guard = Arc::new(create_guard(Arc::new(MemoryStore::new())).await);
    let attempts = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let guard = guard.clone();
            let attempts = attempts.clone();
            tokio::spawn(async move {
                guard
                    .get_or_set(
                        "billing:stats:today",
                        || async move {
                            attempts.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Err::<f64, _>("reporting db timeout".to_string())
                        },
                        CacheOptions::default(),
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(
            handle.await.unwrap(),
            Err("reporting db timeout".to_string())
        );
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    let value: Result<f64, String> = guard
        .get_or_set(
            "billing:stats:today",
            || async { Ok(1250.5) },
            CacheOptions::default(),
        )
        .await;
    assert_eq!(value, Ok(1250.5));
}
