//! # lore-core
//!
//! Core types, traits, and abstractions for the lorekeep enrichment pipeline.
//!
//! This crate provides the data model shared by the inference, storage and
//! job crates: classification and relationship results, enrichment runs,
//! review records, cache entries, the confidence thresholds every call site
//! must agree on, and the persistence traits implemented by `lore-db`.

pub mod confidence;
pub mod defaults;
pub mod ephemeral;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;
pub mod versions;

// Re-export commonly used types at crate root
pub use confidence::{clamp_confidence, ConfidenceBucket, ConfidenceTally};
pub use ephemeral::{Clock, EphemeralStore, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
pub use versions::{algorithm_version, AlgorithmVersion, OperationType, VersionChange};

/// Create a new time-ordered UUIDv7.
pub fn new_v7() -> uuid::Uuid {
    uuid::Uuid::now_v7()
}
