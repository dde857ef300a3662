//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 缓存操作指标
//!
//! 每次编排器或标签索引调用都会追加一条 [`CacheOperation`]，
//! 保存在容量固定的环形缓冲区中，写满后丢弃最旧的记录。
//! 聚合指标（命中率、平均耗时）基于缓冲区内的记录计算，并合并存储的实时信息。

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

#[cfg(feature = "monitoring")]
use std::sync::Arc;

use crate::constants::DEFAULT_METRICS_CAPACITY;
use crate::storage::CacheStore;

/// 操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Get,
    Set,
    Delete,
}

/// 结果来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationSource {
    /// 直接来自存储
    Store,
    /// 等待同一个键的进行中加载
    Coalesced,
    /// 调用了取数函数
    Fetch,
    /// 标签索引维护
    TagIndex,
}

/// 单次缓存操作记录（创建后不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheOperation {
    pub key: String,
    pub kind: OperationKind,
    /// 执行时间（毫秒）
    pub duration_ms: f64,
    pub hit: bool,
    /// 负载大小（字节）
    pub size: usize,
    pub timestamp: DateTime<Utc>,
    pub source: OperationSource,
}

impl CacheOperation {
    /// 创建操作记录
    pub fn new(
        key: impl Into<String>,
        kind: OperationKind,
        duration: Duration,
        hit: bool,
        size: usize,
        source: OperationSource,
    ) -> Self {
        Self {
            key: key.into(),
            kind,
            duration_ms: duration.as_secs_f64() * 1000.0,
            hit,
            size,
            timestamp: Utc::now(),
            source,
        }
    }

    /// 命中记录
    pub fn hit(key: impl Into<String>, duration: Duration, size: usize) -> Self {
        Self::new(key, OperationKind::Get, duration, true, size, OperationSource::Store)
    }

    /// 未命中记录
    pub fn miss(key: impl Into<String>, duration: Duration, size: usize) -> Self {
        Self::new(key, OperationKind::Get, duration, false, size, OperationSource::Fetch)
    }

    /// 是否计入读请求
    fn is_read(&self) -> bool {
        self.kind == OperationKind::Get
    }
}

/// 聚合指标
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    /// 命中率（百分比，无请求时为0）
    pub hit_rate: f64,
    /// 命中平均耗时（毫秒）
    pub avg_hit_time_ms: f64,
    /// 未命中平均耗时（毫秒）
    pub avg_miss_time_ms: f64,
    /// 合并单飞的次数
    pub coalesced: u64,
    pub sets: u64,
    pub deletes: u64,
    /// 标签登记次数
    pub tag_registrations: u64,
    /// 自上次重置以来的存储故障次数
    pub store_errors: u64,
    /// 缓冲区中的记录数
    pub recorded_operations: usize,
    /// 存储已用内存（字节）
    pub memory_bytes: u64,
    /// 存储键数量
    pub key_count: u64,
    /// 存储信息是否可用
    pub store_available: bool,
}

/// 指标记录器
pub struct MetricsRecorder {
    operations: Mutex<VecDeque<CacheOperation>>,
    capacity: usize,
    store_errors: AtomicU64,
    #[cfg(feature = "monitoring")]
    exporter: Option<Arc<crate::telemetry::Metrics>>,
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_METRICS_CAPACITY)
    }
}

impl MetricsRecorder {
    /// 创建记录器（容量至少为1）
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            operations: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            store_errors: AtomicU64::new(0),
            #[cfg(feature = "monitoring")]
            exporter: None,
        }
    }

    /// 同时转发到 Prometheus 指标
    #[cfg(feature = "monitoring")]
    pub fn with_exporter(mut self, exporter: Arc<crate::telemetry::Metrics>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Prometheus 指标
    #[cfg(feature = "monitoring")]
    pub fn exporter(&self) -> Option<&Arc<crate::telemetry::Metrics>> {
        self.exporter.as_ref()
    }

    /// 追加一条记录
    pub fn record(&self, operation: CacheOperation) {
        #[cfg(feature = "monitoring")]
        if let Some(exporter) = &self.exporter {
            exporter.record_operation(&operation);
        }

        let mut operations = self.operations.lock();
        if operations.len() >= self.capacity {
            operations.pop_front();
        }
        operations.push_back(operation);
    }

    /// 记录一次存储故障
    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "monitoring")]
        if let Some(exporter) = &self.exporter {
            exporter.record_error();
        }
    }

    /// 缓冲区快照（从旧到新）
    pub fn operations(&self) -> Vec<CacheOperation> {
        self.operations.lock().iter().cloned().collect()
    }

    /// 最近的 n 条记录（从旧到新）
    pub fn recent(&self, n: usize) -> Vec<CacheOperation> {
        let operations = self.operations.lock();
        let skip = operations.len().saturating_sub(n);
        operations.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.operations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 清空记录
    pub fn reset(&self) {
        self.operations.lock().clear();
        self.store_errors.store(0, Ordering::Relaxed);
    }

    /// 基于缓冲区计算聚合指标（不含存储信息）
    pub fn aggregate(&self) -> CacheMetrics {
        let operations = self.operations.lock();

        let mut metrics = CacheMetrics {
            recorded_operations: operations.len(),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            ..Default::default()
        };
        let mut hit_time = 0.0;
        let mut miss_time = 0.0;

        for op in operations.iter() {
            match (op.kind, op.source) {
                (OperationKind::Set, OperationSource::TagIndex) => metrics.tag_registrations += 1,
                (OperationKind::Set, _) => metrics.sets += 1,
                (OperationKind::Delete, _) => metrics.deletes += 1,
                (OperationKind::Get, _) => {}
            }

            if !op.is_read() {
                continue;
            }

            if op.hit {
                metrics.hits += 1;
                hit_time += op.duration_ms;
                if op.source == OperationSource::Coalesced {
                    metrics.coalesced += 1;
                }
            } else {
                metrics.misses += 1;
                miss_time += op.duration_ms;
            }
        }

        metrics.total_requests = metrics.hits + metrics.misses;
        if metrics.total_requests > 0 {
            metrics.hit_rate = metrics.hits as f64 / metrics.total_requests as f64 * 100.0;
        }
        if metrics.hits > 0 {
            metrics.avg_hit_time_ms = hit_time / metrics.hits as f64;
        }
        if metrics.misses > 0 {
            metrics.avg_miss_time_ms = miss_time / metrics.misses as f64;
        }

        metrics
    }

    /// 聚合指标并合并存储的实时信息
    ///
    /// 存储不可用时只返回缓冲区指标，`store_available` 为 false。
    pub async fn collect(&self, store: &dyn CacheStore) -> CacheMetrics {
        let info = match store.info().await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("获取存储信息失败: {}", e);
                self.record_store_error();
                None
            }
        };

        let mut metrics = self.aggregate();
        if let Some(info) = info {
            metrics.memory_bytes = info.memory_bytes;
            metrics.key_count = info.key_count;
            metrics.store_available = true;

            #[cfg(feature = "monitoring")]
            if let Some(exporter) = &self.exporter {
                exporter.update_store_info(&info);
            }
        }

        metrics
    }
}
