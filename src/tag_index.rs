//! 标签索引
//!
//! 维护 标签 → 键集合 的多对多关系，用于按标签批量失效。
//!
//! 成员集合存放在存储中（`tag:{name}`），所有用过的标签名登记在
//! `tag-registry` 集合里，供 [`TagIndex::sweep`] 清理。
//!
//! # 一致性
//!
//! 失效不是原子的：先读取成员快照，再批量删除。快照之后、删除之前
//! 被 `tag()` 加入的键可能会留存到下次失效或TTL过期。

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::constants::{TAG_KEY_PREFIX, TAG_REGISTRY_KEY};
use crate::error::{CacheGuardError, StorageError};
use crate::metrics::{CacheOperation, MetricsRecorder, OperationKind, OperationSource};
use crate::storage::CacheStore;

/// 失效结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationOutcome {
    /// 实际删除的键数
    pub removed: u64,
    /// 删除失败的键数
    pub failed: u64,
}

impl InvalidationOutcome {
    /// 是否全部成功
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

impl std::ops::Add for InvalidationOutcome {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            removed: self.removed + other.removed,
            failed: self.failed + other.failed,
        }
    }
}

impl std::ops::AddAssign for InvalidationOutcome {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

/// 清理结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// 检查的标签数
    pub tags: u64,
    /// 检查的成员数
    pub members: u64,
    /// 移除的失效成员数
    pub pruned: u64,
    /// 从登记表移除的空标签数
    pub retired_tags: u64,
}

/// 标签索引
#[derive(Clone)]
pub struct TagIndex {
    store: Arc<dyn CacheStore>,
    metrics: Arc<MetricsRecorder>,
}

impl TagIndex {
    /// 创建标签索引
    pub fn new(store: Arc<dyn CacheStore>, metrics: Arc<MetricsRecorder>) -> Self {
        Self { store, metrics }
    }

    /// 标签对应的集合键
    pub fn tag_key(tag: &str) -> String {
        format!("{}{}", TAG_KEY_PREFIX, tag)
    }

    /// 将键加入标签（幂等）
    pub async fn tag(&self, tag: &str, key: &str) -> Result<(), StorageError> {
        if tag.is_empty() {
            return Err(StorageError::QueryError("标签不能为空".to_string()));
        }

        let start = Instant::now();
        let tag_key = Self::tag_key(tag);
        // 先加成员再登记标签，清理任务据此复查
        self.store.add_to_set(&tag_key, key).await?;
        self.store.add_to_set(TAG_REGISTRY_KEY, tag).await?;

        self.metrics.record(CacheOperation::new(
            tag_key,
            OperationKind::Set,
            start.elapsed(),
            false,
            key.len(),
            OperationSource::TagIndex,
        ));
        trace!("标签登记: tag={}, key={}", tag, key);
        Ok(())
    }

    /// 标签当前的成员
    pub async fn members(&self, tag: &str) -> Result<Vec<String>, StorageError> {
        self.store.members_of(&Self::tag_key(tag)).await
    }

    /// 所有登记过的标签
    pub async fn tags(&self) -> Result<Vec<String>, StorageError> {
        self.store.members_of(TAG_REGISTRY_KEY).await
    }

    /// 失效标签下的所有键
    ///
    /// 批量删除失败时退化为逐个删除，失败的键计入 `failed` 而不是报错。
    /// 只有成员列表本身读取失败时才返回错误。
    pub async fn invalidate(&self, tag: &str) -> Result<InvalidationOutcome, CacheGuardError> {
        let start = Instant::now();
        let tag_key = Self::tag_key(tag);

        let members = self.store.members_of(&tag_key).await.map_err(|e| {
            self.metrics.record_store_error();
            warn!("读取标签成员失败: tag={}, error={}", tag, e);
            CacheGuardError::StorageError(e)
        })?;

        if members.is_empty() {
            debug!("标签无成员: tag={}", tag);
            return Ok(InvalidationOutcome::default());
        }

        let outcome = match self.store.delete_keys(&members).await {
            Ok(removed) => InvalidationOutcome { removed, failed: 0 },
            Err(e) => {
                warn!(
                    "批量删除失败，改为逐个删除: tag={}, keys={}, error={}",
                    tag,
                    members.len(),
                    e
                );
                self.metrics.record_store_error();
                self.delete_one_by_one(&members).await
            }
        };

        // 成员集合删除失败不影响结果，残留成员在下次失效或清理时处理
        if let Err(e) = self.store.delete(&tag_key).await {
            warn!("删除标签集合失败: tag={}, error={}", tag, e);
            self.metrics.record_store_error();
        }

        self.metrics.record(CacheOperation::new(
            tag_key,
            OperationKind::Delete,
            start.elapsed(),
            false,
            outcome.removed as usize,
            OperationSource::Store,
        ));

        info!(
            "标签失效: tag={}, removed={}, failed={}, elapsed={:?}",
            tag,
            outcome.removed,
            outcome.failed,
            start.elapsed()
        );

        Ok(outcome)
    }

    async fn delete_one_by_one(&self, keys: &[String]) -> InvalidationOutcome {
        let mut outcome = InvalidationOutcome::default();
        for key in keys {
            match self.store.delete(key).await {
                Ok(removed) => outcome.removed += removed,
                Err(e) => {
                    debug!("跳过删除失败的键: key={}, error={}", key, e);
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }

    /// 失效多个标签，汇总结果
    ///
    /// 某个标签的成员无法读取时记录日志并计为一次失败，继续处理其余标签。
    pub async fn invalidate_many<S: AsRef<str>>(&self, tags: &[S]) -> InvalidationOutcome {
        let mut total = InvalidationOutcome::default();
        for tag in tags {
            match self.invalidate(tag.as_ref()).await {
                Ok(outcome) => total += outcome,
                Err(e) => {
                    warn!("标签失效失败: tag={}, error={}", tag.as_ref(), e);
                    total.failed += 1;
                }
            }
        }
        total
    }

    /// 清理标签集合中已不存在的键
    pub async fn sweep(&self) -> Result<SweepReport, CacheGuardError> {
        let start = Instant::now();
        let mut report = SweepReport::default();

        for tag in self.tags().await? {
            report.tags += 1;
            let tag_key = Self::tag_key(&tag);
            let members = self.store.members_of(&tag_key).await?;
            if members.is_empty() {
                let retired = self
                    .store
                    .remove_from_set(TAG_REGISTRY_KEY, std::slice::from_ref(&tag))
                    .await?;
                // 读取成员之后可能有新的登记
                if !self.store.members_of(&tag_key).await?.is_empty() {
                    self.store.add_to_set(TAG_REGISTRY_KEY, &tag).await?;
                    debug!("标签在清理期间重新登记: tag={}", tag);
                    continue;
                }
                report.retired_tags += retired;
                continue;
            }
            report.members += members.len() as u64;

            let mut dead = Vec::new();
            for member in members {
                match self.store.exists(&member).await {
                    Ok(false) => dead.push(member),
                    Ok(true) => {}
                    Err(e) => {
                        debug!("检查成员失败，保留: key={}, error={}", member, e);
                    }
                }
            }

            if !dead.is_empty() {
                report.pruned += self.store.remove_from_set(&tag_key, &dead).await?;
            }
        }

        debug!(
            "标签清理完成: tags={}, members={}, pruned={}, elapsed={:?}",
            report.tags,
            report.members,
            report.pruned,
            start.elapsed()
        );

        Ok(report)
    }
}
