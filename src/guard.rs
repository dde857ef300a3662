//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! CacheGuard 组合根
//!
//! 负责按配置构建存储、策略解析器、指标记录器、标签索引和编排器，
//! 并提供运维操作（清空、健康检查、按标签失效、指标）。
//! 所有组件都由这里显式创建并以 `Arc` 共享，没有全局单例。
//!
//! # 使用示例
//!
//! ```rust,ignore
//! use cacheguard::{CacheConfig, CacheGuard, CacheOptions};
//!
//! let guard = CacheGuard::builder()
//!     .config(CacheConfig::default().use_default_strategies(true))
//!     .build()
//!     .await?;
//!
//! let doctors: Vec<Doctor> = guard
//!     .get_or_set("doctors:all", || async { repo.doctors().await }, CacheOptions::default())
//!     .await?;
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{CacheConfig, HttpCacheConfig, StoreBackend};
use crate::error::CacheGuardError;
use crate::metrics::{CacheMetrics, MetricsRecorder};
use crate::orchestrator::{CacheOptions, CacheOrchestrator};
use crate::storage::{CacheStore, MemoryStore};
use crate::strategy::StrategyResolver;
use crate::tag_index::{InvalidationOutcome, TagIndex};
use crate::warmup::{WarmupController, WarmupSummary, WarmupTask};

/// 健康检查结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// 存储是否可达
    pub connected: bool,
    /// PING 往返延迟（毫秒）
    pub ping_ms: Option<f64>,
    pub memory_bytes: u64,
    pub key_count: u64,
    /// 不可达时的错误信息
    pub error: Option<String>,
}

/// 构建器
#[derive(Default)]
pub struct CacheGuardBuilder {
    config: CacheConfig,
    store: Option<Arc<dyn CacheStore>>,
    resolver: Option<StrategyResolver>,
    #[cfg(feature = "monitoring")]
    exporter: Option<Arc<crate::telemetry::Metrics>>,
}

impl CacheGuardBuilder {
    /// 设置配置
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// 使用已有的存储（忽略配置中的存储设置）
    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 使用已有的策略解析器（忽略配置中的策略）
    pub fn resolver(mut self, resolver: StrategyResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// 转发指标到 Prometheus
    #[cfg(feature = "monitoring")]
    pub fn exporter(mut self, exporter: Arc<crate::telemetry::Metrics>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// 构建
    pub async fn build(self) -> Result<CacheGuard, CacheGuardError> {
        self.config
            .validate()
            .map_err(CacheGuardError::ConfigError)?;

        let store = match self.store {
            Some(store) => store,
            None => open_store(&self.config).await?,
        };

        let resolver = match self.resolver {
            Some(resolver) => resolver,
            None => self.config.build_resolver()?,
        };

        let recorder = MetricsRecorder::new(self.config.metrics_capacity);
        #[cfg(feature = "monitoring")]
        let recorder = match self.exporter {
            Some(exporter) => recorder.with_exporter(exporter),
            None => recorder,
        };

        let orchestrator = Arc::new(CacheOrchestrator::new(
            store,
            Arc::new(resolver),
            Arc::new(recorder),
        ));

        let sweep_task = match self.config.tag_sweep_interval_secs {
            0 => None,
            secs => Some(spawn_sweep(
                orchestrator.tag_index().clone(),
                Duration::from_secs(secs),
            )),
        };

        info!(
            "CacheGuard 已创建: backend={:?}, strategies={}, default_ttl={}s",
            self.config.store.backend,
            orchestrator.resolver().len(),
            self.config.default_ttl_secs
        );

        Ok(CacheGuard {
            config: self.config,
            orchestrator,
            sweep_task,
        })
    }
}

async fn open_store(config: &CacheConfig) -> Result<Arc<dyn CacheStore>, CacheGuardError> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            let redis_config = crate::redis_storage::RedisConfig::from(&config.store);
            let store = crate::redis_storage::RedisStore::new(redis_config).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => Err(CacheGuardError::ConfigError(
            "Redis 后端需要启用 redis 特性".to_string(),
        )),
    }
}

fn spawn_sweep(tag_index: TagIndex, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // 第一次 tick 立即返回，跳过
        ticker.tick().await;
        loop {
            ticker.tick().await;
            debug!("执行标签清理任务");
            if let Err(e) = tag_index.sweep().await {
                warn!("标签清理失败: {}", e);
            }
        }
    })
}

/// 缓存层入口
pub struct CacheGuard {
    config: CacheConfig,
    orchestrator: Arc<CacheOrchestrator>,
    sweep_task: Option<JoinHandle<()>>,
}

impl CacheGuard {
    pub fn builder() -> CacheGuardBuilder {
        CacheGuardBuilder::default()
    }

    /// 使用内存存储和给定配置创建
    pub async fn in_memory(config: CacheConfig) -> Result<Self, CacheGuardError> {
        Self::builder()
            .config(config)
            .store(Arc::new(MemoryStore::new()))
            .build()
            .await
    }

    /// 读穿透，见 [`CacheOrchestrator::get_or_set`]
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
        self.orchestrator.get_or_set(key, fetcher, options).await
    }

    /// 清空所有键并重置指标
    pub async fn flush_all(&self) -> Result<(), CacheGuardError> {
        warn!("清空全部缓存");
        self.orchestrator.store().flush().await.map_err(|e| {
            self.orchestrator.metrics().record_store_error();
            CacheGuardError::StorageError(e)
        })?;
        self.orchestrator.metrics().reset();
        Ok(())
    }

    /// 健康检查（不会失败，不可达时 `connected` 为 false）
    pub async fn health_check(&self) -> HealthReport {
        let store = self.orchestrator.store();

        let latency = match store.ping().await {
            Ok(latency) => latency,
            Err(e) => {
                warn!("缓存存储不可达: {}", e);
                self.orchestrator.metrics().record_store_error();
                return HealthReport {
                    connected: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        };

        let mut report = HealthReport {
            connected: true,
            ping_ms: Some(latency.as_secs_f64() * 1000.0),
            ..Default::default()
        };

        match store.info().await {
            Ok(info) => {
                report.memory_bytes = info.memory_bytes;
                report.key_count = info.key_count;
            }
            Err(e) => {
                warn!("获取存储信息失败: {}", e);
                report.error = Some(e.to_string());
            }
        }

        report
    }

    /// 按多个标签失效，返回汇总结果
    pub async fn invalidate_tags<S: AsRef<str>>(&self, tags: &[S]) -> InvalidationOutcome {
        self.orchestrator.invalidate_tags(tags).await
    }

    /// 聚合指标（含存储实时信息）
    pub async fn metrics(&self) -> CacheMetrics {
        self.orchestrator
            .metrics()
            .collect(self.orchestrator.store().as_ref())
            .await
    }

    /// 执行一次预热
    pub async fn warm_up(&self, controller: &WarmupController) -> WarmupSummary {
        controller.run(&self.orchestrator).await
    }

    /// 启动周期预热
    pub fn spawn_warmup(&self, controller: Arc<WarmupController>, interval: Duration) -> WarmupTask {
        controller.spawn_periodic(self.orchestrator.clone(), interval)
    }

    pub fn orchestrator(&self) -> &Arc<CacheOrchestrator> {
        &self.orchestrator
    }

    pub fn tag_index(&self) -> &TagIndex {
        self.orchestrator.tag_index()
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        self.orchestrator.store()
    }

    pub fn recorder(&self) -> &Arc<MetricsRecorder> {
        self.orchestrator.metrics()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn http_config(&self) -> &HttpCacheConfig {
        &self.config.http
    }
}

impl Drop for CacheGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.sweep_task.take() {
            handle.abort();
        }
    }
}
