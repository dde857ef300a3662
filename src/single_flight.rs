//! 单飞加载
//!
//! 同一个键的并发未命中只执行一次取数：第一个请求（leader）执行，
//! 其余请求（follower）等待同一个结果（成功或失败）。
//!
//! leader 结束（成功、失败或被取消）时条目被移除。leader 在发布结果前
//! 被取消时，等待者各自执行自己的取数函数。
//!
//! 不同调用方可能以不同的值类型使用这张表，结果以 `Arc<dyn Any>` 保存，
//! 等待者按自己的类型还原；类型不符时同样退化为自己取数。

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace};

type Outcome = Arc<dyn Any + Send + Sync>;

/// 结果由谁产生
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    /// 本请求执行了取数
    Leader,
    /// 复用了其他请求的结果
    Follower,
}

struct Flight {
    id: u64,
    tx: watch::Sender<Option<Outcome>>,
}

enum Join {
    Lead(u64, watch::Sender<Option<Outcome>>),
    Wait(watch::Receiver<Option<Outcome>>),
}

/// 单飞表
#[derive(Default)]
pub struct SingleFlight {
    pending: DashMap<String, Flight>,
    next_id: AtomicU64,
}

/// leader 的清理守卫：无论正常结束还是被取消都会移除自己的条目
struct LeaderGuard<'a> {
    pending: &'a DashMap<String, Flight>,
    key: &'a str,
    id: u64,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        let id = self.id;
        self.pending.remove_if(self.key, |_, flight| flight.id == id);
    }
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// 正在进行的加载数
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// 执行或等待同一个键的加载
    pub async fn run<T, E, F, Fut>(&self, key: &str, fetch: F) -> (Result<T, E>, FlightRole)
    where
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        // 先在锁内决定角色，等待发生在锁外
        let join = match self.pending.entry(key.to_string()) {
            Entry::Occupied(entry) => Join::Wait(entry.get().tx.subscribe()),
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, _) = watch::channel(None);
                entry.insert(Flight { id, tx: tx.clone() });
                Join::Lead(id, tx)
            }
        };

        let (id, tx) = match join {
            Join::Lead(id, tx) => (id, tx),
            Join::Wait(rx) => {
                trace!("等待进行中的加载 key={}", key);
                if let Some(result) = Self::wait::<T, E>(rx).await {
                    return (result, FlightRole::Follower);
                }

                debug!("进行中的加载未给出结果，自行取数 key={}", key);
                return (fetch().await, FlightRole::Leader);
            }
        };

        let guard = LeaderGuard {
            pending: &self.pending,
            key,
            id,
        };

        let result = fetch().await;

        // 即使当前没有等待者也要保存结果，守卫移除条目前订阅的请求仍能读到
        tx.send_replace(Some(Arc::new(result.clone()) as Outcome));
        drop(guard);

        (result, FlightRole::Leader)
    }

    async fn wait<T, E>(mut rx: watch::Receiver<Option<Outcome>>) -> Option<Result<T, E>>
    where
        T: Clone + 'static,
        E: Clone + 'static,
    {
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome.downcast_ref::<Result<T, E>>().cloned();
            }

            // 发送端被丢弃：leader 被取消
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }
}
