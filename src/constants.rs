//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Centralized configuration constants for CacheGuard.
//!
//! This module provides well-documented constants used throughout the library.
//! All magic numbers are defined here with their purpose and usage context.

// ============================================================================
// TTL Table
// ============================================================================

/// Fallback TTL applied when no strategy matches a key (15 minutes).
///
/// Used by [`StrategyResolver`] when a key has no registered prefix.
///
/// [`StrategyResolver`]: crate::strategy::StrategyResolver
pub const DEFAULT_TTL_SECS: u64 = 900;

/// TTL for master/reference data that rarely changes (2 hours).
///
/// Doctors, services and similar catalogues.
pub const MASTER_DATA_TTL_SECS: u64 = 7200;

/// TTL for entity records read often but edited occasionally (1 hour).
pub const ENTITY_TTL_SECS: u64 = 3600;

/// TTL for relationship data such as a patient's appointments (30 minutes).
pub const RELATION_TTL_SECS: u64 = 1800;

/// TTL for search results (15 minutes).
pub const SEARCH_TTL_SECS: u64 = 900;

/// TTL for time-sensitive lists such as "today" or "recent" (10 minutes).
pub const DAILY_TTL_SECS: u64 = 600;

/// TTL for highly volatile aggregates such as billing statistics (5 minutes).
pub const STATS_TTL_SECS: u64 = 300;

/// Longest TTL accepted for any entry (1 year).
pub const MAX_TTL_SECS: u64 = 365 * 24 * 3600;

// ============================================================================
// Metrics Recorder Constants
// ============================================================================

/// Capacity of the cache operation ring buffer.
///
/// The oldest operations are dropped first once this many have been recorded.
pub const DEFAULT_METRICS_CAPACITY: usize = 1000;

// ============================================================================
// Key Grammar
// ============================================================================

/// Delimiter between key components.
pub const KEY_DELIMITER: char = ':';

/// Logical prefix for HTTP response cache keys.
pub const HTTP_KEY_PREFIX: &str = "api";

/// Prefix of the per-tag membership sets kept in the store.
pub const TAG_KEY_PREFIX: &str = "tag:";

/// Store key of the set that records every tag name ever used.
pub const TAG_REGISTRY_KEY: &str = "tag-registry";

/// Maximum key length accepted by the stores.
pub const MAX_KEY_LENGTH: usize = 1024;

/// Query parameters that discriminate cached responses by default.
pub const DEFAULT_QUERY_WHITELIST: &[&str] =
    &["page", "limit", "search", "filter", "sort", "organization_id"];

/// Response headers restored when a cached response is replayed.
pub const DEFAULT_HEADER_WHITELIST: &[&str] = &[
    "content-type",
    "content-language",
    "cache-control",
    "etag",
    "last-modified",
];

/// Largest response body the HTTP layer will capture (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

// ============================================================================
// Diagnostic Headers
// ============================================================================

/// `HIT`, `MISS` or `BYPASS`.
pub const HEADER_X_CACHE: &str = "x-cache";

/// Milliseconds spent serving the request from the cache layer.
pub const HEADER_X_CACHE_TIME: &str = "x-cache-time";

/// Seconds since the replayed response was captured.
pub const HEADER_X_CACHE_AGE: &str = "x-cache-age";

// ============================================================================
// Store Constants
// ============================================================================

/// Default per-attempt timeout for a remote store command.
pub const DEFAULT_STORE_IO_TIMEOUT_MS: u64 = 500;

/// Default deadline for one store operation, retries included.
pub const DEFAULT_STORE_OPERATION_TIMEOUT_MS: u64 = 1000;

/// Default timeout for (re)connecting to the remote store.
pub const DEFAULT_STORE_CONNECT_TIMEOUT_MS: u64 = 2000;

/// Default number of retries for a failing store command.
pub const DEFAULT_STORE_MAX_RETRIES: u32 = 3;

/// Default interval between tag sweeps (10 minutes).
pub const DEFAULT_TAG_SWEEP_INTERVAL_SECS: u64 = 600;
