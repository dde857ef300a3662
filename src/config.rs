//! 配置模块
//!
//! 定义缓存层的配置结构，支持 YAML 与 TOML 两种格式。
//!
//! ```yaml
//! version: "1.0"
//! default_ttl_secs: 900
//! metrics_capacity: 1000
//! store:
//!   backend: redis
//!   url: redis://127.0.0.1:6379
//! strategies:
//!   - pattern: "patients:search:"
//!     ttl_secs: 900
//!     tags: [patients, search]
//! http:
//!   query_whitelist: [page, limit, search]
//! ```

use ahash::AHashSet as HashSet;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants::{
    DEFAULT_HEADER_WHITELIST, DEFAULT_MAX_BODY_BYTES, DEFAULT_METRICS_CAPACITY,
    DEFAULT_QUERY_WHITELIST, DEFAULT_STORE_CONNECT_TIMEOUT_MS, DEFAULT_STORE_IO_TIMEOUT_MS,
    DEFAULT_STORE_MAX_RETRIES, DEFAULT_STORE_OPERATION_TIMEOUT_MS,
    DEFAULT_TAG_SWEEP_INTERVAL_SECS, DEFAULT_TTL_SECS, HTTP_KEY_PREFIX, MAX_TTL_SECS,
};
use crate::error::CacheGuardError;
use crate::strategy::{CacheStrategy, StrategyResolver};

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub version: String,
    /// 未匹配任何策略时的TTL（秒）
    pub default_ttl_secs: u64,
    /// 操作日志环形缓冲区容量
    pub metrics_capacity: usize,
    /// 是否使用内置的诊所业务默认策略表
    pub use_default_strategies: bool,
    /// 标签清理间隔（秒，0 表示不启动后台清理）
    pub tag_sweep_interval_secs: u64,
    pub store: StoreConfig,
    pub strategies: Vec<CacheStrategy>,
    pub http: HttpCacheConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            default_ttl_secs: DEFAULT_TTL_SECS,
            metrics_capacity: DEFAULT_METRICS_CAPACITY,
            use_default_strategies: false,
            tag_sweep_interval_secs: DEFAULT_TAG_SWEEP_INTERVAL_SECS,
            store: StoreConfig::default(),
            strategies: Vec::new(),
            http: HttpCacheConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 YAML 文本解析
    pub fn from_yaml_str(content: &str) -> Result<Self, CacheGuardError> {
        let config: CacheConfig = serde_yaml::from_str(content)?;
        config.validate().map_err(CacheGuardError::ConfigError)?;
        Ok(config)
    }

    /// 从 TOML 文本解析
    pub fn from_toml_str(content: &str) -> Result<Self, CacheGuardError> {
        let config: CacheConfig = toml::from_str(content)?;
        config.validate().map_err(CacheGuardError::ConfigError)?;
        Ok(config)
    }

    /// 从文件加载，按扩展名选择格式
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CacheGuardError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            other => Err(CacheGuardError::ConfigError(format!(
                "不支持的配置文件格式: {:?}",
                other
            ))),
        }
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), String> {
        if self.version.is_empty() {
            return Err("版本号不能为空".to_string());
        }

        if self.default_ttl_secs == 0 {
            return Err("默认TTL必须大于0".to_string());
        }

        if self.default_ttl_secs > MAX_TTL_SECS {
            return Err(format!(
                "默认TTL不能超过 {} 秒: {}",
                MAX_TTL_SECS, self.default_ttl_secs
            ));
        }

        if self.metrics_capacity == 0 {
            return Err("指标缓冲区容量必须大于0".to_string());
        }

        self.store.validate()?;
        self.http.validate()?;

        let mut patterns = HashSet::new();
        for (index, strategy) in self.strategies.iter().enumerate() {
            if !patterns.insert(&strategy.pattern) {
                return Err(format!("策略前缀重复: {}", strategy.pattern));
            }

            strategy
                .validate()
                .map_err(|e| format!("策略[{}]校验失败: {}", index, e))?;
        }

        Ok(())
    }

    /// 设置默认TTL
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = ttl.as_secs();
        self
    }

    /// 设置指标缓冲区容量
    pub fn metrics_capacity(mut self, capacity: usize) -> Self {
        self.metrics_capacity = capacity;
        self
    }

    /// 追加策略
    pub fn strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// 是否启用默认策略表
    pub fn use_default_strategies(mut self, enable: bool) -> Self {
        self.use_default_strategies = enable;
        self
    }

    /// 设置标签清理间隔
    pub fn tag_sweep_interval(mut self, interval: Duration) -> Self {
        self.tag_sweep_interval_secs = interval.as_secs();
        self
    }

    /// 默认TTL
    pub fn default_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// 构建策略解析器
    ///
    /// 配置中的策略会覆盖默认表中前缀相同的条目。
    pub fn build_resolver(&self) -> Result<StrategyResolver, CacheGuardError> {
        let mut resolver = StrategyResolver::new(self.default_ttl_duration());

        if self.use_default_strategies {
            for strategy in StrategyResolver::with_defaults().strategies() {
                if self.strategies.iter().any(|s| s.pattern == strategy.pattern) {
                    continue;
                }
                resolver
                    .register(strategy.clone())
                    .map_err(CacheGuardError::ConfigError)?;
            }
        }

        for strategy in &self.strategies {
            resolver
                .register(strategy.clone())
                .map_err(CacheGuardError::ConfigError)?;
        }

        Ok(resolver)
    }
}

/// 存储后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Redis 连接 URL（仅 redis 后端使用）
    pub url: String,
    pub db: i64,
    /// 单条命令超时（毫秒）
    pub io_timeout_ms: u64,
    /// 单次操作（含重试）的总时限（毫秒）
    pub operation_timeout_ms: u64,
    /// 建立连接超时（毫秒）
    pub connect_timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: "redis://127.0.0.1:6379".to_string(),
            db: 0,
            io_timeout_ms: DEFAULT_STORE_IO_TIMEOUT_MS,
            operation_timeout_ms: DEFAULT_STORE_OPERATION_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_STORE_CONNECT_TIMEOUT_MS,
            max_retries: DEFAULT_STORE_MAX_RETRIES,
        }
    }
}

impl StoreConfig {
    /// 校验存储配置
    pub fn validate(&self) -> Result<(), String> {
        if self.io_timeout_ms == 0 {
            return Err("存储命令超时必须大于0".to_string());
        }

        if self.operation_timeout_ms < self.io_timeout_ms {
            return Err(format!(
                "存储操作总时限({}ms)不能小于单条命令超时({}ms)",
                self.operation_timeout_ms, self.io_timeout_ms
            ));
        }

        if self.connect_timeout_ms == 0 {
            return Err("连接超时必须大于0".to_string());
        }

        if self.backend == StoreBackend::Redis {
            if self.url.is_empty() {
                return Err("Redis URL不能为空".to_string());
            }
            if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
                return Err(format!("无效的Redis URL: {}", self.url));
            }
        }

        Ok(())
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// HTTP 响应缓存配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpCacheConfig {
    /// 缓存键前缀
    pub key_prefix: String,
    /// 参与缓存键的查询参数
    pub query_whitelist: Vec<String>,
    /// 回放时恢复的响应头
    pub header_whitelist: Vec<String>,
    /// 可缓存的最大响应体
    pub max_body_bytes: usize,
}

impl Default for HttpCacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: HTTP_KEY_PREFIX.to_string(),
            query_whitelist: DEFAULT_QUERY_WHITELIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
            header_whitelist: DEFAULT_HEADER_WHITELIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl HttpCacheConfig {
    /// 校验 HTTP 配置
    pub fn validate(&self) -> Result<(), String> {
        if self.key_prefix.is_empty() {
            return Err("HTTP缓存键前缀不能为空".to_string());
        }

        if self.key_prefix.contains(':') {
            return Err("HTTP缓存键前缀不能包含':'".to_string());
        }

        if self.max_body_bytes == 0 {
            return Err("最大响应体必须大于0".to_string());
        }

        Ok(())
    }
}
