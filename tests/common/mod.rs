//! 测试通用工具模块
//!
//! 提供测试中常用的工具函数和辅助结构。

#![allow(dead_code)]

use async_trait::async_trait;
use cacheguard::{
    CacheConfig, CacheGuard, CacheOrchestrator, CacheStore, MemoryStore, MetricsRecorder,
    StorageError, StoreInfo, StrategyResolver,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 测试用的患者记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: u64,
    pub name: String,
}

impl Patient {
    pub fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

/// 可以随时切换为不可用的存储
///
/// 包装 [`MemoryStore`]，`set_down(true)` 后所有操作返回连接错误。
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
    /// 只让删除失败
    fail_deletes: AtomicBool,
    /// 下一次读取先取快照，再延迟返回
    get_delay: Mutex<Option<Duration>>,
    /// 读取指定集合后立即写入的 (集合, 成员)，模拟并发登记
    after_members_of: Mutex<Option<(String, Vec<(String, String)>)>>,
    pub calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn delay_next_get(&self, delay: Duration) {
        *self.get_delay.lock() = Some(delay);
    }

    pub fn after_next_members_of(&self, set_key: &str, writes: Vec<(&str, &str)>) {
        let writes = writes
            .into_iter()
            .map(|(set, member)| (set.to_string(), member.to_string()))
            .collect();
        *self.after_members_of.lock() = Some((set_key.to_string(), writes));
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn check(&self) -> Result<(), StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(StorageError::ConnectionError("store is down".to_string()));
        }
        Ok(())
    }

    fn check_delete(&self) -> Result<(), StorageError> {
        self.check()?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::TimeoutError("delete timed out".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        let snapshot = self.inner.get(key).await;
        let delay = self.get_delay.lock().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        snapshot
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<u64, StorageError> {
        self.check_delete()?;
        self.inner.delete(key).await
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<u64, StorageError> {
        self.check_delete()?;
        self.inner.delete_keys(keys).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.check()?;
        self.inner.exists(key).await
    }

    async fn add_to_set(&self, set_key: &str, member: &str) -> Result<(), StorageError> {
        self.check()?;
        self.inner.add_to_set(set_key, member).await
    }

    async fn members_of(&self, set_key: &str) -> Result<Vec<String>, StorageError> {
        self.check()?;
        let snapshot = self.inner.members_of(set_key).await;

        let writes = {
            let mut pending = self.after_members_of.lock();
            match pending.as_ref() {
                Some((key, _)) if key == set_key => pending.take().map(|(_, writes)| writes),
                _ => None,
            }
        };
        for (set, member) in writes.unwrap_or_default() {
            self.inner.add_to_set(&set, &member).await?;
        }

        snapshot
    }

    async fn remove_from_set(
        &self,
        set_key: &str,
        members: &[String],
    ) -> Result<u64, StorageError> {
        self.check()?;
        self.inner.remove_from_set(set_key, members).await
    }

    async fn ping(&self) -> Result<Duration, StorageError> {
        self.check()?;
        self.inner.ping().await
    }

    async fn info(&self) -> Result<StoreInfo, StorageError> {
        self.check()?;
        self.inner.info().await
    }

    async fn flush(&self) -> Result<(), StorageError> {
        self.check()?;
        self.inner.flush().await
    }
}

/// 使用默认策略表的编排器
pub fn create_orchestrator(store: Arc<dyn CacheStore>) -> CacheOrchestrator {
    CacheOrchestrator::new(
        store,
        Arc::new(StrategyResolver::with_defaults()),
        Arc::new(MetricsRecorder::default()),
    )
}

/// 使用默认策略表、不启动标签清理任务的配置
pub fn test_config() -> CacheConfig {
    CacheConfig::default()
        .use_default_strategies(true)
        .tag_sweep_interval(Duration::ZERO)
}

/// 基于给定存储的 CacheGuard
pub async fn create_guard(store: Arc<dyn CacheStore>) -> CacheGuard {
    CacheGuard::builder()
        .config(test_config())
        .store(store)
        .build()
        .await
        .expect("build guard")
}
