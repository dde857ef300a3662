//! 存储抽象层
//!
//! 定义缓存存储接口和内存实现。
//!
//! 所有操作都可能失败，失败以 [`StorageError`] 返回，绝不静默地当作"不存在"。
//! 如何处理失败由调用方决定：编排器在读路径上把失败视为未命中，
//! 在写路径上只记录日志。

use crate::constants::MAX_KEY_LENGTH;
use crate::error::StorageError;
use ahash::AHashSet as HashSet;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// 存储统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    /// 已用内存（字节）
    pub memory_bytes: u64,
    /// 键数量
    pub key_count: u64,
}

/// 缓存存储接口
///
/// 普通键值和集合共享同一个键空间，与 Redis 一致。
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// 获取值
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// 设置值（TTL必须大于0）
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError>;

    /// 删除值，返回实际删除的数量
    async fn delete(&self, key: &str) -> Result<u64, StorageError>;

    /// 批量删除，返回实际删除的数量
    async fn delete_keys(&self, keys: &[String]) -> Result<u64, StorageError>;

    /// 键是否存在
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// 向集合添加成员（幂等）
    async fn add_to_set(&self, set_key: &str, member: &str) -> Result<(), StorageError>;

    /// 获取集合成员
    async fn members_of(&self, set_key: &str) -> Result<Vec<String>, StorageError>;

    /// 从集合移除成员，返回实际移除的数量
    async fn remove_from_set(&self, set_key: &str, members: &[String])
        -> Result<u64, StorageError>;

    /// 探活，返回往返延迟
    async fn ping(&self) -> Result<Duration, StorageError>;

    /// 内存与键数量
    async fn info(&self) -> Result<StoreInfo, StorageError>;

    /// 清空所有键
    async fn flush(&self) -> Result<(), StorageError>;
}

/// 校验键
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::QueryError("键不能为空".to_string()));
    }

    if key.len() > MAX_KEY_LENGTH {
        return Err(StorageError::QueryError(format!(
            "键长度超过限制: {} > {}",
            key.len(),
            MAX_KEY_LENGTH
        )));
    }

    Ok(())
}

/// 内存条目
#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// 内存存储实现
///
/// 过期采用惰性删除：读到过期条目时移除。时间取自 `tokio::time::Instant`，
/// 测试中可以暂停并推进时钟。
pub struct MemoryStore {
    data: DashMap<String, MemoryEntry>,
    sets: DashMap<String, HashSet<String>>,
}

impl MemoryStore {
    /// 创建新的内存存储
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            sets: DashMap::new(),
        }
    }

    /// 清理所有已过期的条目，返回清理数量
    pub fn purge_expired(&self) -> u64 {
        let now = Instant::now();
        let mut count = 0;
        self.data.retain(|_, entry| {
            if entry.is_expired(now) {
                count += 1;
                false
            } else {
                true
            }
        });
        count
    }

    /// 剩余TTL
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.data
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.expires_at - now)
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let expired = match self.data.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        // 读锁已释放，再移除过期条目
        if expired {
            self.data.remove_if(key, |_, entry| entry.is_expired(now));
        }
        None
    }

    fn remove_key(&self, key: &str) -> u64 {
        let now = Instant::now();
        let mut removed = 0;
        if let Some((_, entry)) = self.data.remove(key) {
            if !entry.is_expired(now) {
                removed += 1;
            }
        }
        if self.sets.remove(key).is_some() {
            removed += 1;
        }
        removed
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        validate_key(key)?;
        if ttl.is_zero() {
            return Err(StorageError::QueryError(format!("TTL必须大于0: {}", key)));
        }

        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| StorageError::QueryError(format!("TTL过大: {}, {:?}", key, ttl)))?;

        self.data.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64, StorageError> {
        Ok(self.remove_key(key))
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<u64, StorageError> {
        Ok(keys.iter().map(|key| self.remove_key(key)).sum())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.live_value(key).is_some() || self.sets.contains_key(key))
    }

    async fn add_to_set(&self, set_key: &str, member: &str) -> Result<(), StorageError> {
        validate_key(set_key)?;
        self.sets
            .entry(set_key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn members_of(&self, set_key: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .sets
            .get(set_key)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove_from_set(
        &self,
        set_key: &str,
        members: &[String],
    ) -> Result<u64, StorageError> {
        let mut removed = 0;
        if let Some(mut set) = self.sets.get_mut(set_key) {
            for member in members {
                if set.remove(member) {
                    removed += 1;
                }
            }
        }
        // 与 Redis 一致：空集合即不存在
        self.sets.remove_if(set_key, |_, set| set.is_empty());
        Ok(removed)
    }

    async fn ping(&self) -> Result<Duration, StorageError> {
        let start = std::time::Instant::now();
        let _ = self.data.len();
        Ok(start.elapsed())
    }

    async fn info(&self) -> Result<StoreInfo, StorageError> {
        let now = Instant::now();
        let mut memory_bytes = 0u64;
        let mut key_count = 0u64;

        for entry in self.data.iter() {
            if entry.is_expired(now) {
                continue;
            }
            key_count += 1;
            memory_bytes += (entry.key().len() + entry.value.len()) as u64;
        }

        for set in self.sets.iter() {
            key_count += 1;
            memory_bytes += set.key().len() as u64;
            memory_bytes += set.iter().map(|m| m.len() as u64).sum::<u64>();
        }

        Ok(StoreInfo {
            memory_bytes,
            key_count,
        })
    }

    async fn flush(&self) -> Result<(), StorageError> {
        self.data.clear();
        self.sets.clear();
        Ok(())
    }
}
