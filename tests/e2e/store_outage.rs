//! 存储故障场景
//!
//! 存储中途不可用时业务请求照常完成，恢复后缓存重新生效。

use crate::common::{create_guard, FlakyStore, Patient};
use cacheguard::{CacheGuard, CacheOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

async fn read_patient(guard: &CacheGuard, db_queries: &AtomicUsize) -> Result<Patient, String> {
    guard
        .get_or_set(
            "patients:42",
            || async {
                db_queries.fetch_add(1, Ordering::SeqCst);
                Ok(Patient::new(42, "Ana Garcia"))
            },
            CacheOptions::default(),
        )
        .await
}

#[tokio::test]
async fn test_outage_and_recovery() {
    let store = Arc::new(FlakyStore::new());
    let guard = create_guard(store.clone()).await;
    let db_queries = AtomicUsize::new(0);
    let read = || read_patient(&guard, &db_queries);

    // 正常：一次取数后命中
    read().await.unwrap();
    read().await.unwrap();
    assert_eq!(db_queries.load(Ordering::SeqCst), 1);

    // 故障：每次都直连数据源，业务不受影响
    store.set_down(true);
    assert_eq!(read().await.unwrap().name, "Ana Garcia");
    assert_eq!(read().await.unwrap().name, "Ana Garcia");
    assert_eq!(db_queries.load(Ordering::SeqCst), 3);

    let health = guard.health_check().await;
    assert!(!health.connected);
    assert!(health.error.is_some());
    assert!(guard.flush_all().await.is_err());

    // 故障期间的失效计为失败
    let outcome = guard.invalidate_tags(&["patients"]).await;
    assert!(!outcome.is_complete());

    // 恢复：故障前写入的条目仍在，继续命中
    store.set_down(false);
    read().await.unwrap();
    assert_eq!(db_queries.load(Ordering::SeqCst), 3);
    assert!(guard.health_check().await.connected);

    let metrics = guard.metrics().await;
    assert!(metrics.store_errors > 0);
    assert!(metrics.store_available);
}
