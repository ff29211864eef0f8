//! Structured logging schema and field name constants for lorekeep.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Run-fatal failure, run marked failed |
//! | WARN  | Recoverable issue, fallback result applied |
//! | INFO  | Lifecycle events (worker start/stop, run start/finish) |
//! | DEBUG | Decision points, cache hit/miss counts, batch boundaries |
//! | TRACE | Per-note iteration, raw response sizes |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "inference", "db", "jobs", "cache"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "ollama", "provider", "recovery", "worker", "enrichment_cache"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "classify_notes", "extract_relationships", "get_batch", "run"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Enrichment run UUID.
pub const RUN_ID: &str = "run_id";

/// Import run UUID the enrichment was requested for.
pub const IMPORT_RUN_ID: &str = "import_run_id";

/// Note UUID being operated on.
pub const NOTE_ID: &str = "note_id";

/// Team scope for cache and run records.
pub const TEAM_ID: &str = "team_id";

/// Generation model identifier.
pub const MODEL: &str = "model";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by an operation.
pub const RESULT_COUNT: &str = "result_count";

/// Zero-based index of the batch being sent.
pub const BATCH_INDEX: &str = "batch_index";

/// Total number of batches in the current phase.
pub const BATCH_COUNT: &str = "batch_count";

/// Byte length of a prompt.
pub const PROMPT_LEN: &str = "prompt_len";

/// Byte length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

// ─── Cache fields ──────────────────────────────────────────────────────────

/// Cache hits in a bulk lookup.
pub const CACHE_HITS: &str = "cache_hits";

/// Cache misses in a bulk lookup.
pub const CACHE_MISSES: &str = "cache_misses";

/// Cache entry type ("classification" or "relationship").
pub const CACHE_TYPE: &str = "cache_type";

/// Rows removed by an invalidation or prune.
pub const ROWS_AFFECTED: &str = "rows_affected";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_are_snake_case() {
        for field in [
            SUBSYSTEM,
            COMPONENT,
            RUN_ID,
            IMPORT_RUN_ID,
            NOTE_ID,
            TEAM_ID,
            DURATION_MS,
            RESULT_COUNT,
            BATCH_INDEX,
            BATCH_COUNT,
            CACHE_HITS,
            CACHE_MISSES,
            ROWS_AFFECTED,
        ] {
            assert!(field
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }

    #[test]
    fn test_operation_field_is_short_form() {
        assert_eq!(OPERATION, "op");
    }
}
