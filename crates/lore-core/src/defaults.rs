//! Centralized default constants for lorekeep.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Confidence thresholds live in [`crate::confidence`].

// =============================================================================
// BATCHING
// =============================================================================

/// Notes per generation request.
pub const BATCH_SIZE: usize = 10;

/// Sleep between consecutive batches of one call, in milliseconds.
pub const BATCH_DELAY_MS: u64 = 1000;

/// Characters of note content sent to the model and hashed for the cache.
pub const CONTENT_PREVIEW_CHARS: usize = 2000;

/// Maximum high-confidence examples per category carried into later batches.
pub const CROSS_BATCH_CONTEXT_CAP: usize = 15;

// =============================================================================
// RESPONSE RECOVERY
// =============================================================================

/// Characters of an unparseable response kept for diagnostics.
pub const PARSE_EXCERPT_CHARS: usize = 500;

/// Confidence assigned to a note whose batch failed.
pub const FALLBACK_CONFIDENCE: f32 = 0.5;

/// Entities and relationships below this confidence are discarded by entity
/// extraction.
pub const ENTITY_CONFIDENCE_FLOOR: f32 = 0.5;

/// Characters of free text sent to single-call entity extraction.
pub const ENTITY_CONTENT_CHARS: usize = 8000;

// =============================================================================
// CACHE
// =============================================================================

/// Days a cache entry stays valid after being written.
pub const CACHE_TTL_DAYS: i64 = 30;

/// Window used by cache statistics for "expiring soon".
pub const CACHE_EXPIRING_SOON_DAYS: i64 = 7;

/// Context hash used when no player-character names are supplied.
pub const CACHE_NO_CONTEXT: &str = "no-context";

// =============================================================================
// WORKER
// =============================================================================

/// Capacity of the enrichment job channel.
pub const WORKER_QUEUE_CAPACITY: usize = 64;

/// Capacity of the worker event broadcast channel.
pub const WORKER_EVENT_CAPACITY: usize = 256;

/// Seconds run progress is retained after the last update.
pub const PROGRESS_RETENTION_SECS: u64 = 3600;

/// Seconds an uncommitted preview plan is retained.
pub const PLAN_RETENTION_SECS: u64 = 3600;

// =============================================================================
// GENERATION BACKENDS
// =============================================================================

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://localhost:11434";

/// Default generation model name (Ollama).
pub const GEN_MODEL: &str = "llama3.1:8b";

/// Default OpenAI-compatible base URL.
pub const OPENAI_URL: &str = "https://api.openai.com/v1";

/// Default OpenAI generation model.
pub const OPENAI_GEN_MODEL: &str = "gpt-4o-mini";

/// Request timeout for a single generation call, in seconds.
pub const GEN_TIMEOUT_SECS: u64 = 120;

/// Calls slower than this are logged with `slow = true`.
pub const SLOW_CALL_THRESHOLD_MS: u128 = 30_000;

// =============================================================================
// DATABASE POOL
// =============================================================================

/// Maximum connections in the PostgreSQL pool.
pub const POOL_MAX_CONNECTIONS: u32 = 10;

/// Minimum idle connections kept open.
pub const POOL_MIN_CONNECTIONS: u32 = 1;

/// Seconds to wait for a connection before failing.
pub const POOL_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Seconds an idle connection is kept before being closed.
pub const POOL_IDLE_TIMEOUT_SECS: u64 = 600;

/// Seconds before a connection is recycled regardless of activity.
pub const POOL_MAX_LIFETIME_SECS: u64 = 1800;
