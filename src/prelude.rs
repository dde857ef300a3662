//! Prelude module - Commonly used types for quick imports
//!
//! `use cacheguard::prelude::*;` brings in everything needed to build a
//! guard, call `get_or_set` and invalidate by tag.

// Core types - always available
pub use crate::config::CacheConfig;
pub use crate::error::{CacheGuardError, StorageError};
pub use crate::guard::CacheGuard;
pub use crate::orchestrator::CacheOptions;
pub use crate::strategy::CacheStrategy;
pub use crate::tag_index::InvalidationOutcome;
pub use crate::warmup::{WarmupController, WarmupEntry};

// Storage
pub use crate::storage::{CacheStore, MemoryStore};

// Feature-gated exports
#[cfg(feature = "redis")]
pub use crate::redis_storage::{RedisConfig, RedisStore};

#[cfg(feature = "http")]
pub use crate::http::{invalidate_on_success, response_cache, InvalidationState, ResponseCacheState};
