//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 缓存策略解析
//!
//! 将键前缀映射到缓存策略（TTL、标签、优先级、填充方式）。
//!
//! # 匹配规则
//!
//! - 键以某个已注册前缀开头即视为匹配
//! - 多个前缀同时匹配时，**最长前缀胜出**（最具体的策略）
//! - 没有任何前缀匹配时，使用默认TTL和空标签集
//!
//! 前缀集合在启动时注册一次，之后只读共享，解析复杂度为 O(前缀数量)。

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DAILY_TTL_SECS, DEFAULT_TTL_SECS, ENTITY_TTL_SECS, MASTER_DATA_TTL_SECS, MAX_TTL_SECS,
    RELATION_TTL_SECS, SEARCH_TTL_SECS, STATS_TTL_SECS,
};

/// 缓存填充方式
///
/// 编排器只区分 `ReadThrough` 与 `CacheAside`（两者经 `get_or_set` 的行为相同），
/// 其余两种仅作为声明性信息保存。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PopulationMode {
    /// 未命中时自动调用数据源填充
    #[default]
    ReadThrough,
    /// 调用方显式检查并填充
    CacheAside,
    /// 写入数据源的同时写缓存
    WriteThrough,
    /// 先写缓存，异步回写数据源
    WriteBehind,
}

/// 缓存优先级（仅供参考，例如决定预热顺序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// 缓存策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStrategy {
    /// 键前缀，例如 `patients:search:`
    pub pattern: String,
    /// TTL（秒，必须大于0）
    pub ttl_secs: u64,
    /// 填充方式
    #[serde(default)]
    pub mode: PopulationMode,
    /// 优先级
    #[serde(default)]
    pub priority: Priority,
    /// 标签集
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CacheStrategy {
    /// 创建新的缓存策略
    pub fn new(pattern: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            pattern: pattern.into(),
            ttl_secs,
            mode: PopulationMode::default(),
            priority: Priority::default(),
            tags: Vec::new(),
        }
    }

    /// 设置填充方式
    pub fn mode(mut self, mode: PopulationMode) -> Self {
        self.mode = mode;
        self
    }

    /// 设置优先级
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// 设置标签
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// TTL
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// 校验策略
    pub fn validate(&self) -> Result<(), String> {
        if self.pattern.is_empty() {
            return Err("策略前缀不能为空".to_string());
        }

        if self.ttl_secs == 0 {
            return Err(format!("策略 {} 的TTL必须大于0", self.pattern));
        }

        if self.ttl_secs > MAX_TTL_SECS {
            return Err(format!(
                "策略 {} 的TTL不能超过 {} 秒",
                self.pattern, MAX_TTL_SECS
            ));
        }

        if self.tags.iter().any(|t| t.is_empty()) {
            return Err(format!("策略 {} 包含空标签", self.pattern));
        }

        Ok(())
    }
}

/// 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPolicy {
    /// 命中的前缀（None 表示使用默认策略）
    pub pattern: Option<String>,
    pub ttl: Duration,
    pub tags: Vec<String>,
    pub mode: PopulationMode,
    pub priority: Priority,
}

impl ResolvedPolicy {
    /// 是否来自默认策略
    pub fn is_default(&self) -> bool {
        self.pattern.is_none()
    }
}

/// 策略解析器
#[derive(Debug, Clone)]
pub struct StrategyResolver {
    strategies: Vec<CacheStrategy>,
    default_ttl: Duration,
}

impl Default for StrategyResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TTL_SECS))
    }
}

impl StrategyResolver {
    /// 创建空的策略解析器
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            strategies: Vec::new(),
            default_ttl,
        }
    }

    /// 使用一组策略创建解析器
    pub fn with_strategies(
        default_ttl: Duration,
        strategies: impl IntoIterator<Item = CacheStrategy>,
    ) -> Result<Self, String> {
        let mut resolver = Self::new(default_ttl);
        for strategy in strategies {
            resolver.register(strategy)?;
        }
        Ok(resolver)
    }

    /// 诊所业务的默认策略表
    ///
    /// 主数据 1-2 小时，关系数据 30 分钟，搜索 15 分钟，
    /// 当日/最近列表 10 分钟，高频变化的统计 5 分钟。
    pub fn with_defaults() -> Self {
        let mut resolver = Self::default();
        for strategy in default_strategies() {
            // 默认表由常量构成，前缀互不重复
            if let Err(e) = resolver.register(strategy) {
                tracing::error!("默认策略注册失败: {}", e);
            }
        }
        resolver
    }

    /// 注册策略
    ///
    /// 前缀重复或策略非法时返回错误；已注册的策略不可修改。
    pub fn register(&mut self, strategy: CacheStrategy) -> Result<(), String> {
        strategy.validate()?;

        if self.strategies.iter().any(|s| s.pattern == strategy.pattern) {
            return Err(format!("策略前缀重复: {}", strategy.pattern));
        }

        tracing::debug!(
            "注册缓存策略: pattern={}, ttl={}s, tags={:?}",
            strategy.pattern,
            strategy.ttl_secs,
            strategy.tags
        );
        self.strategies.push(strategy);
        Ok(())
    }

    /// 查找最长匹配前缀的策略
    pub fn find(&self, key: &str) -> Option<&CacheStrategy> {
        self.strategies
            .iter()
            .filter(|s| key.starts_with(s.pattern.as_str()))
            .max_by_key(|s| s.pattern.len())
    }

    /// 解析键的有效策略
    pub fn resolve(&self, key: &str) -> ResolvedPolicy {
        match self.find(key) {
            Some(strategy) => ResolvedPolicy {
                pattern: Some(strategy.pattern.clone()),
                ttl: strategy.ttl(),
                tags: strategy.tags.clone(),
                mode: strategy.mode,
                priority: strategy.priority,
            },
            None => ResolvedPolicy {
                pattern: None,
                ttl: self.default_ttl,
                tags: Vec::new(),
                mode: PopulationMode::default(),
                priority: Priority::default(),
            },
        }
    }

    /// 默认TTL
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// 已注册的策略
    pub fn strategies(&self) -> &[CacheStrategy] {
        &self.strategies
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

fn default_strategies() -> Vec<CacheStrategy> {
    vec![
        CacheStrategy::new("patients:", ENTITY_TTL_SECS)
            .priority(Priority::High)
            .tags(["patients", "master_data"]),
        CacheStrategy::new("patients:search:", SEARCH_TTL_SECS)
            .mode(PopulationMode::CacheAside)
            .tags(["patients", "search"]),
        CacheStrategy::new("patients:relations:", RELATION_TTL_SECS)
            .tags(["patients", "relations"]),
        CacheStrategy::new("doctors:", MASTER_DATA_TTL_SECS)
            .priority(Priority::High)
            .tags(["doctors", "master_data"]),
        CacheStrategy::new("services:", MASTER_DATA_TTL_SECS)
            .priority(Priority::High)
            .tags(["services", "master_data"]),
        CacheStrategy::new("appointments:", RELATION_TTL_SECS)
            .tags(["appointments", "relations"]),
        CacheStrategy::new("appointments:today:", DAILY_TTL_SECS)
            .priority(Priority::High)
            .tags(["appointments", "daily"]),
        CacheStrategy::new("appointments:recent:", DAILY_TTL_SECS)
            .tags(["appointments", "recent"]),
        CacheStrategy::new("billing:", RELATION_TTL_SECS).tags(["billing", "relations"]),
        CacheStrategy::new("billing:stats:", STATS_TTL_SECS)
            .priority(Priority::Low)
            .tags(["billing", "stats"]),
        CacheStrategy::new("inventory:", ENTITY_TTL_SECS).tags(["inventory", "master_data"]),
        CacheStrategy::new("inventory:low-stock:", STATS_TTL_SECS)
            .priority(Priority::Low)
            .tags(["inventory", "stats"]),
        CacheStrategy::new("users:", ENTITY_TTL_SECS)
            .priority(Priority::Low)
            .tags(["users", "master_data"]),
    ]
}
