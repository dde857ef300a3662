//! 标签索引集成测试

use crate::common::{create_orchestrator, FlakyStore, Patient};
use cacheguard::{CacheOptions, CacheStore, MemoryStore};
use std::sync::Arc;
use std::time::Duration;

async fn seed_patients(orchestrator: &cacheguard::CacheOrchestrator, ids: &[u64]) {
    for id in ids {
        orchestrator
            .set(
                &format!("patients:{}", id),
                &Patient::new(*id, "seed"),
                CacheOptions::default(),
            )
            .await;
    }
}

/// 按标签失效只删除带该标签的键
#[tokio::test]
async fn test_invalidate_by_entity_family() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = create_orchestrator(store.clone());

    seed_patients(&orchestrator, &[1, 2, 3]).await;
    orchestrator
        .set("doctors:all", &vec!["Dr. Ruiz"], CacheOptions::default())
        .await;

    let outcome = orchestrator.invalidate_tags(&["patients"]).await;
    assert_eq!(outcome.removed, 3);
    assert!(outcome.is_complete());

    for id in 1..=3 {
        assert!(!store.exists(&format!("patients:{}", id)).await.unwrap());
    }
    assert!(store.exists("doctors:all").await.unwrap());
    assert!(orchestrator
        .tag_index()
        .members("patients")
        .await
        .unwrap()
        .is_empty());
}

/// 分组标签跨实体族失效
#[tokio::test]
async fn test_grouping_tag_spans_families() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = create_orchestrator(store.clone());

    seed_patients(&orchestrator, &[1]).await;
    orchestrator
        .set("doctors:all", &vec!["Dr. Ruiz"], CacheOptions::default())
        .await;
    orchestrator
        .set("billing:stats:today", &12.5, CacheOptions::default())
        .await;

    let outcome = orchestrator.invalidate_tags(&["master_data"]).await;
    assert_eq!(outcome.removed, 2);
    assert!(store.exists("billing:stats:today").await.unwrap());
}

/// 同一个键被多个标签引用时只计一次删除
#[tokio::test]
async fn test_overlapping_tags_count_once() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = create_orchestrator(store.clone());
    seed_patients(&orchestrator, &[1, 2]).await;

    let outcome = orchestrator
        .invalidate_tags(&["patients", "master_data"])
        .await;
    assert_eq!(outcome.removed, 2);
    assert_eq!(outcome.failed, 0);
}

/// 未知标签不报错
#[tokio::test]
async fn test_unknown_tag_is_noop() {
    let orchestrator = create_orchestrator(Arc::new(MemoryStore::new()));
    let outcome = orchestrator.invalidate_tags(&["nope"]).await;
    assert_eq!(outcome.removed, 0);
    assert!(outcome.is_complete());
}

/// 删除失败的键计入 failed
#[tokio::test]
async fn test_delete_failures_are_counted() {
    let store = Arc::new(FlakyStore::new());
    let orchestrator = create_orchestrator(store.clone());
    seed_patients(&orchestrator, &[1, 2, 3]).await;

    store.set_fail_deletes(true);
    let outcome = orchestrator.invalidate_tags(&["patients"]).await;
    assert_eq!(outcome.removed, 0);
    assert_eq!(outcome.failed, 3);
    assert!(!outcome.is_complete());

    // 恢复后再次失效可以完成
    store.set_fail_deletes(false);
    let outcome = orchestrator.invalidate_tags(&["patients"]).await;
    assert_eq!(outcome.removed, 3);
}

/// 成员列表读取失败时计为一次失败，继续处理其余标签
#[tokio::test]
async fn test_unreadable_tag_does_not_stop_others() {
    let store = Arc::new(FlakyStore::new());
    let orchestrator = create_orchestrator(store.clone());
    seed_patients(&orchestrator, &[1]).await;

    store.set_down(true);
    let outcome = orchestrator.invalidate_tags(&["patients", "doctors"]).await;
    assert_eq!(outcome.removed, 0);
    assert_eq!(outcome.failed, 2);
}

/// 清理任务移除已过期的成员并注销空标签
#[tokio::test(start_paused = true)]
async fn test_sweep_prunes_expired_members() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = create_orchestrator(store.clone());

    orchestrator
        .set(
            "patients:1",
            &Patient::new(1, "short"),
            CacheOptions::new().ttl(Duration::from_secs(10)).tags(["short"]),
        )
        .await;
    orchestrator
        .set(
            "patients:2",
            &Patient::new(2, "long"),
            CacheOptions::new().ttl(Duration::from_secs(3600)).tags(["long"]),
        )
        .await;

    tokio::time::advance(Duration::from_secs(11)).await;

    let report = orchestrator.tag_index().sweep().await.unwrap();
    assert_eq!(report.tags, 2);
    assert_eq!(report.pruned, 1);
    assert!(orchestrator
        .tag_index()
        .members("short")
        .await
        .unwrap()
        .is_empty());

    // 第二轮清理注销已经为空的标签
    let report = orchestrator.tag_index().sweep().await.unwrap();
    assert_eq!(report.retired_tags, 1);
    assert_eq!(orchestrator.tag_index().tags().await.unwrap(), vec!["long"]);
}

/// 清理读到空成员后有新的登记，标签仍留在登记表中
#[tokio::test]
async fn test_sweep_keeps_tag_registered_during_concurrent_tag() {
    let store = Arc::new(FlakyStore::new());
    let orchestrator = create_orchestrator(store.clone());
    let tag_index = orchestrator.tag_index();

    // 标签已登记但成员集合为空
    tag_index.tag("patients", "patients:1").await.unwrap();
    tag_index.invalidate("patients").await.unwrap();
    assert_eq!(tag_index.tags().await.unwrap(), vec!["patients"]);

    store
        .inner()
        .set("patients:2", "{}", Duration::from_secs(60))
        .await
        .unwrap();
    store.after_next_members_of(
        "tag:patients",
        vec![("tag:patients", "patients:2"), ("tag-registry", "patients")],
    );

    let report = tag_index.sweep().await.unwrap();
    assert_eq!(report.tags, 1);
    assert_eq!(report.retired_tags, 0);
    assert_eq!(tag_index.tags().await.unwrap(), vec!["patients"]);
    assert_eq!(tag_index.members("patients").await.unwrap(), vec!["patients:2"]);

    // 后续清理仍会检查该标签
    let report = tag_index.sweep().await.unwrap();
    assert_eq!(report.tags, 1);
    assert_eq!(report.members, 1);
    assert_eq!(report.pruned, 0);
}
