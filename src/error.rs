//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 错误类型定义
//!
//! 使用thiserror定义所有错误类型。
//!
//! 取数函数（fetcher）自身的错误不在这里：它们以调用方的错误类型原样返回，
//! 缓存层从不包装或吞掉业务错误。

use thiserror::Error;

/// CacheGuard 错误类型
#[derive(Error, Debug)]
pub enum CacheGuardError {
    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 存储错误
    #[error("存储错误: {0}")]
    StorageError(#[from] StorageError),

    /// IO错误
    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// YAML解析错误
    #[error("YAML解析错误: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML解析错误
    #[error("TOML解析错误: {0}")]
    TomlError(#[from] toml::de::Error),

    /// 其他错误
    #[error("未知错误: {0}")]
    Other(String),
}

/// 存储错误
///
/// 远端存储不可用（连接失败、超时）统一归入此类型。读路径上它被视为未命中，
/// 写路径上只记录日志。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// 连接错误
    #[error("连接错误: {0}")]
    ConnectionError(String),

    /// 查询错误
    #[error("查询错误: {0}")]
    QueryError(String),

    /// 超时错误
    #[error("超时错误: {0}")]
    TimeoutError(String),

    /// 未找到
    #[error("未找到: {0}")]
    NotFound(String),
}

impl StorageError {
    /// 是否属于"存储不可用"（连接或超时）
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StorageError::ConnectionError(_) | StorageError::TimeoutError(_)
        )
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StorageError::TimeoutError(err.to_string())
        } else if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
            StorageError::ConnectionError(err.to_string())
        } else {
            StorageError::QueryError(err.to_string())
        }
    }
}
