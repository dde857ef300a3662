//! axum 集成
//!
//! - [`response_cache`] 读请求的响应缓存
//! - [`invalidate_on_success`] 写请求成功后的标签失效
//! - [`admin::router`] 运维路由

pub mod admin;
pub mod invalidation;
pub mod key;
pub mod response_cache;

pub use invalidation::{invalidate_on_success, InvalidationState};
pub use key::derive_cache_key;
pub use response_cache::{response_cache, Bypass, CachedResponse, ResponseCacheState};
