//! 缓存预热
//!
//! 按注册顺序对一组固定的 (键, 取数函数, TTL, 标签) 调用 `get_or_set`，
//! 单个条目失败不影响其余条目。

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::orchestrator::{CacheOptions, CacheOrchestrator};

type WarmupFetcher =
    Arc<dyn Fn() -> BoxFuture<'static, Result<serde_json::Value, String>> + Send + Sync>;

/// 预热条目
#[derive(Clone)]
pub struct WarmupEntry {
    key: String,
    ttl: Option<Duration>,
    tags: Option<Vec<String>>,
    fetcher: WarmupFetcher,
}

impl std::fmt::Debug for WarmupEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmupEntry")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("tags", &self.tags)
            .finish()
    }
}

impl WarmupEntry {
    /// 创建预热条目
    ///
    /// 取数结果以 JSON 形式写入缓存，与 `get_or_set` 写入的格式一致。
    pub fn new<F, Fut, V, E>(key: impl Into<String>, fetcher: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        V: Serialize + Send + 'static,
        E: Display + Send + 'static,
    {
        let fetcher: WarmupFetcher = Arc::new(move || {
            let fut = fetcher();
            async move {
                match fut.await {
                    Ok(value) => serde_json::to_value(value).map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                }
            }
            .boxed()
        });

        Self {
            key: key.into(),
            ttl: None,
            tags: None,
            fetcher,
        }
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

    pub fn key(&self) -> &str {
        &self.key
    }

    fn options(&self) -> CacheOptions {
        CacheOptions {
            ttl: self.ttl,
            tags: self.tags.clone(),
        }
    }
}

/// 预热结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WarmupSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
    /// 失败的键及原因
    pub failures: Vec<(String, String)>,
}

/// 预热控制器
#[derive(Debug, Clone, Default)]
pub struct WarmupController {
    entries: Vec<WarmupEntry>,
}

impl WarmupController {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册条目
    pub fn register(&mut self, entry: WarmupEntry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    /// 追加条目（构建器风格）
    pub fn entry(mut self, entry: WarmupEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 执行一次预热
    pub async fn run(&self, orchestrator: &CacheOrchestrator) -> WarmupSummary {
        let start = Instant::now();
        let mut summary = WarmupSummary::default();

        info!("开始缓存预热: entries={}", self.entries.len());

        for entry in &self.entries {
            let fetcher = entry.fetcher.clone();
            let result: Result<serde_json::Value, String> = orchestrator
                .get_or_set(&entry.key, move || fetcher(), entry.options())
                .await;

            match result {
                Ok(_) => {
                    debug!("预热成功: key={}", entry.key);
                    summary.succeeded += 1;
                }
                Err(e) => {
                    warn!("预热失败: key={}, error={}", entry.key, e);
                    summary.failed += 1;
                    summary.failures.push((entry.key.clone(), e));
                }
            }
        }

        summary.elapsed = start.elapsed();
        info!(
            "缓存预热完成: succeeded={}, failed={}, elapsed={:?}",
            summary.succeeded, summary.failed, summary.elapsed
        );

        summary
    }

    /// 在后台按固定间隔重复预热
    ///
    /// 第一次在启动后立即执行。返回的句柄被丢弃时任务随之停止。
    pub fn spawn_periodic(
        self: Arc<Self>,
        orchestrator: Arc<CacheOrchestrator>,
        interval: Duration,
    ) -> WarmupTask {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run(&orchestrator).await;
            }
        });

        WarmupTask {
            handle: Some(handle),
        }
    }
}

/// 周期预热任务句柄
pub struct WarmupTask {
    handle: Option<JoinHandle<()>>,
}

impl WarmupTask {
    /// 停止任务
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for WarmupTask {
    fn drop(&mut self) {
        self.stop();
    }
}
