//! 预热集成测试

use crate::common::{create_guard, FlakyStore, Patient};
use cacheguard::{CacheOptions, MemoryStore, WarmupController, WarmupEntry};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn clinic_warmup() -> WarmupController {
    WarmupController::new()
        .entry(WarmupEntry::new("doctors:all", || async {
            Ok::<_, String>(vec!["Dr. Ruiz", "Dr. Vega"])
        }))
        .entry(WarmupEntry::new("services:all", || async {
            Ok::<_, String>(vec!["consulta", "limpieza"])
        }))
        .entry(
            WarmupEntry::new("patients:1", || async {
                Ok::<_, String>(Patient::new(1, "Ana Garcia"))
            })
            .tags(["patients", "vip"]),
        )
}

/// 预热后的键直接命中
#[tokio::test]
async fn test_warmed_keys_are_hits() {
    let guard = create_guard(Arc::new(MemoryStore::new())).await;
    let summary = guard.warm_up(&clinic_warmup()).await;
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 0);

    let calls = AtomicUsize::new(0);
    let patient: Result<Patient, String> = guard
        .get_or_set(
            "patients:1",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Patient::new(1, "other"))
            },
            CacheOptions::default(),
        )
        .await;
    assert_eq!(patient.unwrap().name, "Ana Garcia");
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // 预热写入的标签可用于失效
    let outcome = guard.invalidate_tags(&["vip"]).await;
    assert_eq!(outcome.removed, 1);
}

/// 存储不可用时预热仍然完成（取数成功，写缓存失败只记日志）
#[tokio::test]
async fn test_warmup_with_store_down() {
    let store = Arc::new(FlakyStore::new());
    let guard = create_guard(store.clone()).await;
    store.set_down(true);

    let summary = guard.warm_up(&clinic_warmup()).await;
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 0);
}

/// 周期预热在句柄丢弃前持续运行
#[tokio::test(start_paused = true)]
async fn test_spawned_warmup_runs_immediately() {
    let guard = create_guard(Arc::new(MemoryStore::new())).await;
    let task = guard.spawn_warmup(Arc::new(clinic_warmup()), Duration::from_secs(300));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(task.is_running());
    assert_eq!(guard.metrics().await.sets, 3);

    drop(task);
}
