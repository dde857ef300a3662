//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 缓存编排器
//!
//! 提供读穿透的 [`CacheOrchestrator::get_or_set`]：
//!
//! 1. 读存储，命中则反序列化返回
//! 2. 未命中时调用取数函数（同一个键的并发未命中只调用一次）
//! 3. 按 显式选项 > 策略 > 默认值 确定TTL和标签
//! 4. 序列化写入存储并登记标签
//! 5. 记录操作指标
//!
//! # 错误策略
//!
//! - 读存储失败视为未命中（fail-open）
//! - 存储中的值无法反序列化视为未命中，重新取数后覆盖
//! - 取数函数的错误原样返回，不写缓存
//! - 写缓存或登记标签失败只记录日志，取到的值照常返回
//!
//! # 使用示例
//!
//! ```rust,ignore
//! let patient: Patient = orchestrator
//!     .get_or_set(
//!         "patients:42",
//!         || async { db.find_patient(42).await },
//!         CacheOptions::default(),
//!     )
//!     .await?;
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::constants::MAX_TTL_SECS;
use crate::error::StorageError;
use crate::metrics::{CacheOperation, MetricsRecorder, OperationKind, OperationSource};
use crate::single_flight::{FlightRole, SingleFlight};
use crate::storage::CacheStore;
use crate::strategy::StrategyResolver;
use crate::tag_index::{InvalidationOutcome, TagIndex};

/// 单次调用的缓存选项
///
/// 每个字段单独覆盖策略：只给出 `ttl` 时标签仍取自策略。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    pub ttl: Option<Duration>,
    pub tags: Option<Vec<String>>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
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
}

/// 取数结果及其序列化大小
#[derive(Clone)]
struct Fetched<T> {
    value: T,
    size: usize,
    /// 领取加载后复查时已在缓存中
    cached: bool,
}

/// 一次读缓存的结果
enum Lookup<T> {
    Hit(T, usize),
    Miss,
    /// 存储不可用
    Unavailable,
}

/// 缓存编排器
pub struct CacheOrchestrator {
    store: Arc<dyn CacheStore>,
    tag_index: TagIndex,
    resolver: Arc<StrategyResolver>,
    metrics: Arc<MetricsRecorder>,
    flights: SingleFlight,
}

impl CacheOrchestrator {
    /// 创建编排器
    pub fn new(
        store: Arc<dyn CacheStore>,
        resolver: Arc<StrategyResolver>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let tag_index = TagIndex::new(store.clone(), metrics.clone());
        Self {
            store,
            tag_index,
            resolver,
            metrics,
            flights: SingleFlight::new(),
        }
    }

    /// 读穿透
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        options: CacheOptions,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();

        // 存储不可用时不再复查
        let recheck = match self.lookup::<T>(key).await {
            Lookup::Hit(value, size) => {
                self.metrics
                    .record(CacheOperation::hit(key, start.elapsed(), size));
                trace!("缓存命中: key={}, elapsed={:?}", key, start.elapsed());
                return Ok(value);
            }
            Lookup::Miss => true,
            Lookup::Unavailable => false,
        };

        let options = &options;
        let (result, role) = self
            .flights
            .run(key, move || async move {
                // 前一个加载者可能在本次未命中之后刚写入
                if recheck {
                    if let Lookup::Hit(value, size) = self.lookup::<T>(key).await {
                        return Ok(Fetched {
                            value,
                            size,
                            cached: true,
                        });
                    }
                }

                let fetch_start = Instant::now();
                let value = match fetcher().await {
                    Ok(value) => value,
                    Err(e) => return Err(e),
                };
                let fetch_time = fetch_start.elapsed();

                let size = self.populate(key, &value, options).await;
                debug!(
                    "缓存未命中: key={}, fetch={:?}, total={:?}",
                    key,
                    fetch_time,
                    start.elapsed()
                );
                Ok(Fetched {
                    value,
                    size,
                    cached: false,
                })
            })
            .await;

        match (result, role) {
            (Ok(fetched), FlightRole::Leader) if fetched.cached => {
                self.metrics
                    .record(CacheOperation::hit(key, start.elapsed(), fetched.size));
                trace!("复查命中: key={}, elapsed={:?}", key, start.elapsed());
                Ok(fetched.value)
            }
            (Ok(fetched), FlightRole::Leader) => {
                self.metrics
                    .record(CacheOperation::miss(key, start.elapsed(), fetched.size));
                Ok(fetched.value)
            }
            (Ok(fetched), FlightRole::Follower) => {
                self.metrics.record(CacheOperation::new(
                    key,
                    OperationKind::Get,
                    start.elapsed(),
                    true,
                    fetched.size,
                    OperationSource::Coalesced,
                ));
                trace!("合并单飞: key={}, elapsed={:?}", key, start.elapsed());
                Ok(fetched.value)
            }
            (Err(e), role) => {
                if role == FlightRole::Leader {
                    self.metrics
                        .record(CacheOperation::miss(key, start.elapsed(), 0));
                }
                debug!("取数失败，不写缓存: key={}", key);
                Err(e)
            }
        }
    }

    /// 只读缓存（cache-aside 场景）
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let start = Instant::now();
        match self.lookup::<T>(key).await {
            Lookup::Hit(value, size) => {
                self.metrics
                    .record(CacheOperation::hit(key, start.elapsed(), size));
                Some(value)
            }
            Lookup::Miss | Lookup::Unavailable => {
                self.metrics.record(CacheOperation::new(
                    key,
                    OperationKind::Get,
                    start.elapsed(),
                    false,
                    0,
                    OperationSource::Store,
                ));
                None
            }
        }
    }

    /// 只读缓存，未命中不计入指标
    ///
    /// 用于不会触发取数的读取（如 HEAD），避免拉低命中率。
    pub async fn peek<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let start = Instant::now();
        match self.lookup::<T>(key).await {
            Lookup::Hit(value, size) => {
                self.metrics
                    .record(CacheOperation::hit(key, start.elapsed(), size));
                Some(value)
            }
            Lookup::Miss | Lookup::Unavailable => None,
        }
    }

    /// 显式写缓存（cache-aside 场景），返回写入的字节数
    ///
    /// 与 `get_or_set` 的填充一致：失败只记录日志。
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, options: CacheOptions) -> usize {
        self.populate(key, value, &options).await
    }

    /// 删除单个键
    pub async fn invalidate(&self, key: &str) -> Result<u64, StorageError> {
        let start = Instant::now();
        let removed = self.store.delete(key).await.map_err(|e| {
            self.metrics.record_store_error();
            e
        })?;

        self.metrics.record(CacheOperation::new(
            key,
            OperationKind::Delete,
            start.elapsed(),
            false,
            removed as usize,
            OperationSource::Store,
        ));
        debug!("删除缓存键: key={}, removed={}", key, removed);
        Ok(removed)
    }

    /// 按标签失效
    pub async fn invalidate_tags<S: AsRef<str>>(&self, tags: &[S]) -> InvalidationOutcome {
        self.tag_index.invalidate_many(tags).await
    }

    /// 读取并反序列化；任何失败都视为未命中
    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Lookup<T> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Lookup::Miss,
            Err(e) => {
                warn!("读缓存失败，按未命中处理: key={}, error={}", key, e);
                self.metrics.record_store_error();
                return Lookup::Unavailable;
            }
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) => Lookup::Hit(value, raw.len()),
            Err(e) => {
                warn!("缓存值无法解析，重新取数: key={}, error={}", key, e);
                Lookup::Miss
            }
        }
    }

    /// 写缓存并登记标签，返回序列化大小
    async fn populate<T: Serialize>(&self, key: &str, value: &T, options: &CacheOptions) -> usize {
        let start = Instant::now();
        let policy = self.resolver.resolve(key);
        let ttl = options.ttl.unwrap_or(policy.ttl);
        let tags = options.tags.as_ref().unwrap_or(&policy.tags);

        let serialized = match serde_json::to_string(value) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!("序列化失败，跳过写缓存: key={}, error={}", key, e);
                return 0;
            }
        };
        let size = serialized.len();

        if ttl > Duration::from_secs(MAX_TTL_SECS) {
            warn!("TTL超出上限，跳过写缓存: key={}, ttl={:?}", key, ttl);
            return size;
        }

        if let Err(e) = self.store.set(key, &serialized, ttl).await {
            warn!("写缓存失败: key={}, error={}", key, e);
            self.metrics.record_store_error();
            return size;
        }

        for tag in tags {
            if let Err(e) = self.tag_index.tag(tag, key).await {
                warn!("登记标签失败: tag={}, key={}, error={}", tag, key, e);
                self.metrics.record_store_error();
            }
        }

        self.metrics.record(CacheOperation::new(
            key,
            OperationKind::Set,
            start.elapsed(),
            false,
            size,
            OperationSource::Fetch,
        ));
        trace!(
            "写入缓存: key={}, ttl={:?}, tags={:?}, size={}",
            key,
            ttl,
            tags,
            size
        );

        size
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn tag_index(&self) -> &TagIndex {
        &self.tag_index
    }

    pub fn resolver(&self) -> &StrategyResolver {
        &self.resolver
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    /// 正在进行的加载数
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }
}
