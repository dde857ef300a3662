//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! CacheGuard - 读穿透缓存层
//!
//! 在数据访问层之前放一层缓存：读取时先查缓存，未命中时调用取数函数并回填。
//!
//! # API 分层
//!
//! ## Prelude（快速上手）
//!
//! 使用 `use cacheguard::prelude::*;` 导入常用类型。
//!
//! ## 核心 API
//!
//! - [`CacheGuard`] - 组合根，构建全部组件并提供运维操作
//! - [`CacheOrchestrator`] - 读穿透 `get_or_set`
//! - [`StrategyResolver`] - 按键前缀解析TTL和标签
//! - [`TagIndex`] - 标签登记与批量失效
//! - [`MetricsRecorder`] - 操作记录与命中率统计
//! - [`WarmupController`] - 启动预热与周期预热
//!
//! ## 存储
//!
//! - [`MemoryStore`] - 进程内存储
//! - `RedisStore` - Redis 存储（需要 `redis` 特性）
//!
//! ## HTTP（需要 `http` 特性）
//!
//! axum 中间件：响应缓存、写后失效，以及运维路由。
//!
//! # 示例
//!
//! ```rust
//! use cacheguard::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let guard = CacheGuard::in_memory(CacheConfig::default().use_default_strategies(true))
//!         .await
//!         .unwrap();
//!
//!     let doctors: Result<Vec<String>, String> = guard
//!         .get_or_set(
//!             "doctors:all",
//!             || async { Ok(vec!["Dr. Ruiz".to_string()]) },
//!             CacheOptions::default(),
//!         )
//!         .await;
//!     assert_eq!(doctors.unwrap().len(), 1);
//! }
//! ```
//!
//! # 特性
//!
//! - **单飞加载**：同一个键的并发未命中只调用一次取数函数
//! - **标签失效**：写操作后按实体族批量删除相关键
//! - **失败开放**：存储不可用时直接调用取数函数，业务不受影响
//! - **可观测性**：tracing 日志，可选 Prometheus 指标

pub mod prelude;

pub mod config;
pub mod constants;
pub mod error;
pub mod guard;
#[cfg(feature = "http")]
pub mod http;
pub mod metrics;
pub mod orchestrator;
#[cfg(feature = "redis")]
pub mod redis_storage;
pub mod single_flight;
pub mod storage;
pub mod strategy;
pub mod tag_index;
#[cfg(any(feature = "telemetry", feature = "monitoring"))]
pub mod telemetry;
pub mod warmup;

// 重新导出常用类型
pub use config::{CacheConfig, HttpCacheConfig, StoreBackend, StoreConfig};
pub use error::{CacheGuardError, StorageError};
pub use guard::{CacheGuard, CacheGuardBuilder, HealthReport};
pub use metrics::{CacheMetrics, CacheOperation, MetricsRecorder, OperationKind, OperationSource};
pub use orchestrator::{CacheOptions, CacheOrchestrator};
#[cfg(feature = "redis")]
pub use redis_storage::{RedisConfig, RedisStore};
pub use single_flight::{FlightRole, SingleFlight};
pub use storage::{CacheStore, MemoryStore, StoreInfo};
pub use strategy::{CacheStrategy, PopulationMode, Priority, ResolvedPolicy, StrategyResolver};
pub use tag_index::{InvalidationOutcome, SweepReport, TagIndex};
pub use warmup::{WarmupController, WarmupEntry, WarmupSummary, WarmupTask};
