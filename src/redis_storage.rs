//! Redis客户端封装
//!
//! 基于Redis的缓存存储，多个进程共享同一份缓存。
//!
//! # 特性
//!
//! - **连接管理**: 使用ConnectionManager管理连接，断线自动重连
//! - **重试机制**: 指数退避重试
//! - **命令超时**: 每次尝试受 `io_timeout` 约束，整个操作（含重试）受 `operation_timeout` 约束
//! - **标签集合**: 使用 SADD/SMEMBERS/SREM 维护标签成员

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, IntoConnectionInfo};
use secrecy::{ExposeSecret, Secret};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::constants::{
    DEFAULT_STORE_CONNECT_TIMEOUT_MS, DEFAULT_STORE_IO_TIMEOUT_MS, DEFAULT_STORE_MAX_RETRIES,
    DEFAULT_STORE_OPERATION_TIMEOUT_MS,
};
use crate::error::StorageError;
use crate::storage::{validate_key, CacheStore, StoreInfo};

/// Redis配置
#[derive(Clone)]
pub struct RedisConfig {
    /// Redis连接URL
    pub url: String,
    /// 数据库索引
    pub db: i64,
    /// 密码（使用 Secret 包装以防止意外泄露）
    pub password: Option<Secret<String>>,
    /// 连接超时
    pub connection_timeout: Duration,
    /// 单条命令超时
    pub io_timeout: Duration,
    /// 单次操作（含重试和重连）的总时限
    pub operation_timeout: Duration,
    /// 最大重试次数
    pub max_retries: u32,
    /// 重试初始退避时间
    pub retry_initial_backoff: Duration,
}

impl std::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConfig")
            .field("url", &self.url)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connection_timeout", &self.connection_timeout)
            .field("io_timeout", &self.io_timeout)
            .field("operation_timeout", &self.operation_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_initial_backoff", &self.retry_initial_backoff)
            .finish()
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            db: 0,
            password: None,
            connection_timeout: Duration::from_millis(DEFAULT_STORE_CONNECT_TIMEOUT_MS),
            io_timeout: Duration::from_millis(DEFAULT_STORE_IO_TIMEOUT_MS),
            operation_timeout: Duration::from_millis(DEFAULT_STORE_OPERATION_TIMEOUT_MS),
            max_retries: DEFAULT_STORE_MAX_RETRIES,
            retry_initial_backoff: Duration::from_millis(100),
        }
    }
}

impl From<&StoreConfig> for RedisConfig {
    fn from(config: &StoreConfig) -> Self {
        Self::new(config.url.clone())
            .db(config.db)
            .connection_timeout(config.connect_timeout())
            .io_timeout(config.io_timeout())
            .operation_timeout(config.operation_timeout())
            .max_retries(config.max_retries)
    }
}

impl RedisConfig {
    /// 创建新的Redis配置
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// 设置数据库索引
    pub fn db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// 设置密码
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Secret::new(password.into()));
        self
    }

    /// 设置密码（使用 Secret）
    pub fn password_secret(mut self, password: Secret<String>) -> Self {
        self.password = Some(password);
        self
    }

    /// 设置连接超时
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// 设置命令超时
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// 设置单次操作总时限
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// 设置最大重试次数
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// 设置重试初始退避时间
    pub fn retry_initial_backoff(mut self, backoff: Duration) -> Self {
        self.retry_initial_backoff = backoff;
        self
    }
}

/// 重试统计
#[derive(Debug, Default, Clone)]
pub struct RetryStats {
    total_retries: Arc<AtomicU64>,
    successful_retries: Arc<AtomicU64>,
    failed_retries: Arc<AtomicU64>,
}

impl RetryStats {
    /// 获取总重试次数
    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    /// 获取成功重试次数
    pub fn successful_retries(&self) -> u64 {
        self.successful_retries.load(Ordering::Relaxed)
    }

    /// 获取失败重试次数
    pub fn failed_retries(&self) -> u64 {
        self.failed_retries.load(Ordering::Relaxed)
    }

    /// 记录重试成功
    pub fn record_success(&self) {
        self.total_retries.fetch_add(1, Ordering::Relaxed);
        self.successful_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录重试失败
    pub fn record_failure(&self) {
        self.total_retries.fetch_add(1, Ordering::Relaxed);
        self.failed_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// 重置统计
    pub fn reset(&self) {
        self.total_retries.store(0, Ordering::Relaxed);
        self.successful_retries.store(0, Ordering::Relaxed);
        self.failed_retries.store(0, Ordering::Relaxed);
    }
}

/// Redis存储实现
#[derive(Clone)]
pub struct RedisStore {
    /// 连接管理器
    conn_manager: Arc<Mutex<Option<ConnectionManager>>>,
    /// 配置
    config: RedisConfig,
    /// 重试统计
    retry_stats: RetryStats,
}

impl RedisStore {
    /// 创建新的Redis存储
    pub async fn new(config: RedisConfig) -> Result<Self, StorageError> {
        info!("创建Redis存储, URL: {}", config.url);

        let store = Self {
            conn_manager: Arc::new(Mutex::new(None)),
            config,
            retry_stats: RetryStats::default(),
        };

        store.connect().await?;

        info!("Redis存储创建成功");
        Ok(store)
    }

    /// 建立连接
    async fn connect(&self) -> Result<(), StorageError> {
        debug!("建立Redis连接");

        let mut connection_info = self.config.url.as_str().into_connection_info().map_err(|e| {
            error!("解析Redis URL失败: {}", e);
            StorageError::ConnectionError(format!("解析Redis URL失败: {}", e))
        })?;
        connection_info.redis.db = self.config.db;
        if let Some(password) = &self.config.password {
            connection_info.redis.password = Some(password.expose_secret().clone());
        }

        let client = Client::open(connection_info).map_err(|e| {
            error!("创建Redis客户端失败: {}", e);
            StorageError::ConnectionError(format!("创建Redis客户端失败: {}", e))
        })?;

        let conn_manager =
            tokio::time::timeout(self.config.connection_timeout, ConnectionManager::new(client))
                .await
                .map_err(|_| {
                    error!("连接Redis超时: {:?}", self.config.connection_timeout);
                    StorageError::TimeoutError("连接Redis超时".to_string())
                })?
                .map_err(|e| {
                    error!("创建Redis连接管理器失败: {}", e);
                    StorageError::ConnectionError(format!("创建Redis连接管理器失败: {}", e))
                })?;

        *self.conn_manager.lock().await = Some(conn_manager);

        info!("Redis连接建立成功");
        Ok(())
    }

    /// 重新连接
    async fn reconnect(&self) -> Result<(), StorageError> {
        debug!("尝试重新连接Redis");
        *self.conn_manager.lock().await = None;
        self.connect().await
    }

    /// 获取连接（ConnectionManager 可廉价克隆）
    async fn connection(&self) -> Result<ConnectionManager, StorageError> {
        self.conn_manager
            .lock()
            .await
            .as_ref()
            .cloned()
            .ok_or_else(|| StorageError::ConnectionError("连接未初始化".to_string()))
    }

    /// 带超时和重试的执行，整体不超过 `operation_timeout`
    async fn execute_with_retry<F, Fut, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, StorageError>>,
    {
        match tokio::time::timeout(self.config.operation_timeout, self.retry_loop(f)).await {
            Ok(result) => result,
            Err(_) => {
                self.retry_stats.record_failure();
                warn!("操作超出总时限: {:?}", self.config.operation_timeout);
                Err(StorageError::TimeoutError(format!(
                    "操作超出总时限: {:?}",
                    self.config.operation_timeout
                )))
            }
        }
    }

    async fn retry_loop<F, Fut, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, StorageError>>,
    {
        let mut last_error = None;
        let mut backoff = self.config.retry_initial_backoff;

        for attempt in 0..=self.config.max_retries {
            let outcome = match tokio::time::timeout(self.config.io_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::TimeoutError(format!(
                    "命令超时: {:?}",
                    self.config.io_timeout
                ))),
            };

            match outcome {
                Ok(result) => {
                    if attempt > 0 {
                        self.retry_stats.record_success();
                        debug!("重试成功，尝试次数: {}", attempt);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    // 非连接类错误重试也无济于事
                    if !e.is_unavailable() {
                        return Err(e);
                    }
                    last_error = Some(e.clone());

                    if attempt < self.config.max_retries {
                        warn!(
                            "操作失败，将在 {:?} 后重试 (尝试 {}/{}): {}",
                            backoff,
                            attempt + 1,
                            self.config.max_retries,
                            e
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.mul_f32(2.0);

                        if matches!(e, StorageError::ConnectionError(_)) {
                            if let Err(reconnect_err) = self.reconnect().await {
                                error!("重新连接失败: {}", reconnect_err);
                            }
                        }
                    }
                }
            }
        }

        self.retry_stats.record_failure();
        error!("操作失败，已达最大重试次数: {:?}", last_error);

        Err(last_error.unwrap_or_else(|| StorageError::TimeoutError("操作超时".to_string())))
    }

    /// 获取重试统计
    pub fn retry_stats(&self) -> &RetryStats {
        &self.retry_stats
    }

    /// 配置
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}

/// 从 `INFO memory` 输出中解析 `used_memory`
fn parse_used_memory(info: &str) -> u64 {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory:"))
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        validate_key(key)?;
        let ttl_ms = u64::try_from(ttl.as_millis())
            .map_err(|_| StorageError::QueryError(format!("TTL过大: {}, {:?}", key, ttl)))?;
        if ttl_ms == 0 {
            return Err(StorageError::QueryError(format!("TTL必须大于0: {}", key)));
        }

        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<u64, StorageError> {
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
            Ok(removed)
        })
        .await
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<u64, StorageError> {
        if keys.is_empty() {
            return Ok(0);
        }

        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let removed: u64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
            Ok(removed)
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let count: u64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
            Ok(count > 0)
        })
        .await
    }

    async fn add_to_set(&self, set_key: &str, member: &str) -> Result<(), StorageError> {
        validate_key(set_key)?;
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let _: u64 = redis::cmd("SADD")
                .arg(set_key)
                .arg(member)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn members_of(&self, set_key: &str) -> Result<Vec<String>, StorageError> {
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let members: Vec<String> = redis::cmd("SMEMBERS")
                .arg(set_key)
                .query_async(&mut conn)
                .await?;
            Ok(members)
        })
        .await
    }

    async fn remove_from_set(
        &self,
        set_key: &str,
        members: &[String],
    ) -> Result<u64, StorageError> {
        if members.is_empty() {
            return Ok(0);
        }

        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let removed: u64 = redis::cmd("SREM")
                .arg(set_key)
                .arg(members)
                .query_async(&mut conn)
                .await?;
            Ok(removed)
        })
        .await
    }

    async fn ping(&self) -> Result<Duration, StorageError> {
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let start = Instant::now();
            let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(|e| {
                error!("Redis PING失败: {}", e);
                StorageError::from(e)
            })?;
            Ok(start.elapsed())
        })
        .await
    }

    async fn info(&self) -> Result<StoreInfo, StorageError> {
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let memory: String = redis::cmd("INFO")
                .arg("memory")
                .query_async(&mut conn)
                .await?;
            let key_count: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;

            Ok(StoreInfo {
                memory_bytes: parse_used_memory(&memory),
                key_count,
            })
        })
        .await
    }

    async fn flush(&self) -> Result<(), StorageError> {
        warn!("清空Redis数据库 db={}", self.config.db);
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }
}
