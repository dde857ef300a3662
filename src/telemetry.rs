//! 监控和追踪模块
//!
//! - `telemetry` 特性：基于 `tracing-subscriber` 初始化日志输出
//! - `monitoring` 特性：Prometheus 缓存指标
//!
//! # 示例
//!
//! ```rust,ignore
//! use cacheguard::telemetry::{init_tracing, Metrics};
//!
//! init_tracing("cacheguard=debug,info").unwrap();
//!
//! let metrics = Metrics::new().unwrap();
//! println!("{}", metrics.gather());
//! ```

#[cfg(feature = "monitoring")]
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
#[cfg(feature = "monitoring")]
use tracing::error;

#[cfg(feature = "monitoring")]
use crate::metrics::{CacheOperation, OperationKind, OperationSource};
#[cfg(feature = "monitoring")]
use crate::storage::StoreInfo;

/// 初始化全局 tracing 订阅者
///
/// 优先读取 `RUST_LOG`，未设置时使用 `default_directives`。
/// 已经初始化过时返回错误。
#[cfg(feature = "telemetry")]
pub fn init_tracing(default_directives: &str) -> Result<(), String> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| format!("failed to install tracing subscriber: {}", e))
}

/// 延迟直方图的桶（秒）
#[cfg(feature = "monitoring")]
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// 缓存监控指标
#[cfg(feature = "monitoring")]
#[derive(Clone)]
pub struct Metrics {
    /// 命中数（含合并单飞）
    pub hits_total: Counter,
    /// 未命中数
    pub misses_total: Counter,
    /// 合并单飞数
    pub coalesced_total: Counter,
    /// 写入数
    pub sets_total: Counter,
    /// 失效删除的键数
    pub invalidated_keys_total: Counter,
    /// 存储故障数
    pub errors_total: Counter,
    /// 读请求耗时分布
    pub get_duration: Histogram,
    /// 存储已用内存
    pub store_memory_bytes: Gauge,
    /// 存储键数量
    pub store_keys: Gauge,
    registry: Registry,
}

#[cfg(feature = "monitoring")]
impl Metrics {
    /// 创建并注册所有指标
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let hits_total = counter(&registry, "cacheguard_hits_total", "Total number of cache hits")?;
        let misses_total =
            counter(&registry, "cacheguard_misses_total", "Total number of cache misses")?;
        let coalesced_total = counter(
            &registry,
            "cacheguard_coalesced_total",
            "Total number of reads served by an in-flight load",
        )?;
        let sets_total = counter(&registry, "cacheguard_sets_total", "Total number of cache writes")?;
        let invalidated_keys_total = counter(
            &registry,
            "cacheguard_invalidated_keys_total",
            "Total number of keys removed by invalidation",
        )?;
        let errors_total = counter(
            &registry,
            "cacheguard_store_errors_total",
            "Total number of store failures",
        )?;

        let get_duration = Histogram::with_opts(
            HistogramOpts::new(
                "cacheguard_get_duration_seconds",
                "Latency of cache reads including fetches",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(get_duration.clone()))?;

        let store_memory_bytes = gauge(
            &registry,
            "cacheguard_store_memory_bytes",
            "Memory used by the cache store",
        )?;
        let store_keys = gauge(&registry, "cacheguard_store_keys", "Number of keys in the store")?;

        Ok(Self {
            hits_total,
            misses_total,
            coalesced_total,
            sets_total,
            invalidated_keys_total,
            errors_total,
            get_duration,
            store_memory_bytes,
            store_keys,
            registry,
        })
    }

    /// 收集所有指标并返回Prometheus格式的文本
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// 记录一次缓存操作
    pub fn record_operation(&self, operation: &CacheOperation) {
        match operation.kind {
            OperationKind::Get => {
                self.get_duration.observe(operation.duration_ms / 1000.0);
                if operation.hit {
                    self.hits_total.inc();
                    if operation.source == OperationSource::Coalesced {
                        self.coalesced_total.inc();
                    }
                } else {
                    self.misses_total.inc();
                }
            }
            OperationKind::Set if operation.source == OperationSource::TagIndex => {}
            OperationKind::Set => self.sets_total.inc(),
            OperationKind::Delete => self.invalidated_keys_total.inc_by(operation.size as f64),
        }
    }

    /// 记录存储故障
    pub fn record_error(&self) {
        self.errors_total.inc();
    }

    /// 更新存储信息
    pub fn update_store_info(&self, info: &StoreInfo) {
        self.store_memory_bytes.set(info.memory_bytes as f64);
        self.store_keys.set(info.key_count as f64);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(feature = "monitoring")]
fn counter(registry: &Registry, name: &str, help: &str) -> Result<Counter, prometheus::Error> {
    let counter = Counter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

#[cfg(feature = "monitoring")]
fn gauge(registry: &Registry, name: &str, help: &str) -> Result<Gauge, prometheus::Error> {
    let gauge = Gauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}
