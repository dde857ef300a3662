//! 缓存击穿并发测试
//!
//! 验证同一个键的大量并发未命中只调用一次取数函数，
//! 以及不同键之间互不合并

use cacheguard::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== 缓存击穿并发测试 ===");

    let config = CacheConfig::default()
        .use_default_strategies(true)
        .tag_sweep_interval(Duration::ZERO);
    let guard = Arc::new(CacheGuard::in_memory(config).await?);

    test_concurrent_same_key(&guard).await?;
    test_concurrent_different_keys(&guard).await?;

    let metrics = guard.metrics().await;
    println!("\n--- 指标 ---");
    println!("总请求数: {}", metrics.total_requests);
    println!("命中: {}, 未命中: {}, 合并: {}", metrics.hits, metrics.misses, metrics.coalesced);
    println!("命中率: {:.2}%", metrics.hit_rate);

    Ok(())
}

async fn test_concurrent_same_key(guard: &Arc<CacheGuard>) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n--- 同一个键并发测试 ---");

    let request_count = 200;
    let fetch_count = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..request_count {
        let guard = guard.clone();
        let fetch_count = fetch_count.clone();

        handles.push(tokio::spawn(async move {
            guard
                .get_or_set(
                    "patients:search:q=garcia",
                    || async move {
                        fetch_count.fetch_add(1, Ordering::Relaxed);
                        // 模拟慢查询
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, String>(vec!["Ana Garcia".to_string(), "Luis Garcia".to_string()])
                    },
                    CacheOptions::default(),
                )
                .await
        }));
    }

    let mut ok = 0;
    for handle in handles {
        if handle.await?.is_ok() {
            ok += 1;
        }
    }

    let fetches = fetch_count.load(Ordering::Relaxed);
    println!("总请求数: {}", request_count);
    println!("成功请求: {}", ok);
    println!("取数次数: {}", fetches);
    println!("耗时: {:?}", start.elapsed());

    if fetches != 1 {
        return Err(format!("期望取数 1 次，实际 {} 次", fetches).into());
    }
    Ok(())
}

async fn test_concurrent_different_keys(
    guard: &Arc<CacheGuard>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n--- 不同键并发测试 ---");

    let key_count = 20;
    let requests_per_key = 10;
    let fetch_count = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::new();
    for key_index in 0..key_count {
        for _ in 0..requests_per_key {
            let guard = guard.clone();
            let fetch_count = fetch_count.clone();
            let key = format!("patients:{}", key_index);

            handles.push(tokio::spawn(async move {
                guard
                    .get_or_set(
                        &key,
                        || async move {
                            fetch_count.fetch_add(1, Ordering::Relaxed);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, String>(key_index)
                        },
                        CacheOptions::default(),
                    )
                    .await
            }));
        }
    }

    for handle in handles {
        handle.await?.map_err(|e| format!("取数失败: {}", e))?;
    }

    let fetches = fetch_count.load(Ordering::Relaxed);
    println!("总请求数: {}", key_count * requests_per_key);
    println!("取数次数: {} (键数 {})", fetches, key_count);

    if fetches != key_count as u64 {
        return Err(format!("期望取数 {} 次，实际 {} 次", key_count, fetches).into());
    }
    Ok(())
}
